//! ---
//! nest_section: "11-simulation-test-harness"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Simulated collaborators for flight sessions."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
//! Simulated vehicles, swarm, vision detector and operator console, wired
//! together by [`SimFactory`] so a full session can run without hardware.

pub mod console;
pub mod detector;
pub mod factory;
pub mod link;
pub mod swarm;

pub use console::{
    append_waypoint, ConsoleCommand, ConsoleLoop, WaypointRecord, DEFAULT_TAKEOFF_HEIGHT_M,
    WAYPOINTS_FILE,
};
pub use detector::{dictionary_size, SimDetector, DEFAULT_FRAME_INTERVAL};
pub use factory::{SimFactory, DEFAULT_NOISE_SIGMA_M};
pub use link::{FlightState, SimTelemetryLog, SimVehicleLink};
pub use swarm::SimSwarm;
