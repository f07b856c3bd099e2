//! ---
//! nest_section: "02-session-lifecycle"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Session lifecycle orchestration for flight sessions."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
//! Session lifecycle orchestration: snapshot the resolved settings, build
//! the requested subsystems in dependency order, hand control to the
//! blocking command loop and tear down whatever was built.

pub mod runner;
pub mod snapshot;
pub mod subsystems;
pub mod teardown;
pub mod worker;

pub use runner::{run_session, RunOutcome, SessionError, SessionPhase, SessionRunner};
pub use snapshot::{
    read_settings_snapshot, write_settings_snapshot, SnapshotError, SETTINGS_SNAPSHOT_FILE,
};
pub use subsystems::{
    CommandLoop, CommandLoopContext, MarkerDetection, Subsystem, SubsystemFactory,
    SwarmController, TelemetryFrame, TelemetryLog, VehicleCommand, VehicleLink, VisionDetector,
};
pub use teardown::{
    SessionHandles, StepStatus, TeardownReport, TeardownStep, DETECTOR_JOIN_TIMEOUT,
};
pub use worker::{DetectorWorker, JoinOutcome, WorkerMonitor};
