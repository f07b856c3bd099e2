//! ---
//! nest_section: "02-session-lifecycle"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Session lifecycle sequencer."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
use std::cell::Cell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use anyhow::anyhow;
use nest_common::config::Settings;
use nest_common::logging::{init_tracing, log_system_event, LogContext, SystemEventOutcome};
use thiserror::Error;
use tracing::{debug, info};

use crate::snapshot::{write_settings_snapshot, SnapshotError};
use crate::subsystems::{CommandLoopContext, Subsystem, SubsystemFactory};
use crate::teardown::{SessionHandles, DETECTOR_JOIN_TIMEOUT};
use crate::worker::{panic_message, DetectorWorker};

/// Service name used for log files.
pub const DEFAULT_SERVICE_NAME: &str = "nest-fly";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Configuring,
    SnapshotWritten,
    DryRunExit,
    Initializing,
    Running,
    TearingDown,
    Done,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Configuring => "configuring",
            SessionPhase::SnapshotWritten => "snapshot-written",
            SessionPhase::DryRunExit => "dry-run-exit",
            SessionPhase::Initializing => "initializing",
            SessionPhase::Running => "running",
            SessionPhase::TearingDown => "tearing-down",
            SessionPhase::Done => "done",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of a session. Teardown problems never change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    DryRun,
    Failed,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed | RunOutcome::DryRun => 0,
            RunOutcome::Failed => 1,
        }
    }
}

/// Failure during start-up or while the command loop ran.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to initialise {subsystem}: {error:#}")]
    Init {
        subsystem: Subsystem,
        error: anyhow::Error,
    },
    #[error("command loop failed: {0:#}")]
    CommandLoop(anyhow::Error),
    #[error("panic while {phase}: {message}")]
    Panicked { phase: SessionPhase, message: String },
}

impl SessionError {
    pub fn subsystem(&self) -> Option<Subsystem> {
        match self {
            SessionError::Init { subsystem, .. } => Some(*subsystem),
            SessionError::CommandLoop(_) => Some(Subsystem::CommandLoop),
            SessionError::Panicked { .. } => None,
        }
    }
}

fn init_error(subsystem: Subsystem) -> impl FnOnce(anyhow::Error) -> SessionError {
    move |error| SessionError::Init { subsystem, error }
}

/// Drives one flight session from settings snapshot to teardown.
#[derive(Debug)]
pub struct SessionRunner<F> {
    factory: F,
    join_timeout: Duration,
}

impl<F: SubsystemFactory> SessionRunner<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            join_timeout: DETECTOR_JOIN_TIMEOUT,
        }
    }

    /// Override the bounded wait for the detector thread.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Run a complete session.
    ///
    /// Only a failed settings snapshot is returned as an error; start-up and
    /// command loop failures (including panics) are logged and reported as
    /// [`RunOutcome::Failed`] after teardown has run.
    pub fn run(&self, settings: &Settings) -> Result<RunOutcome, SnapshotError> {
        if let Err(err) = init_tracing(DEFAULT_SERVICE_NAME, &settings.run) {
            eprintln!("unable to initialise tracing: {err:#}");
        }
        let mode = settings.mode.as_str();
        enter(SessionPhase::Configuring, mode);

        let snapshot = write_settings_snapshot(settings, &settings.run.logs_dir)?;
        info!(path = %snapshot.display(), "settings snapshot written");
        enter(SessionPhase::SnapshotWritten, mode);

        if settings.dry_run {
            info!("dry-run enabled: skipping hardware + vision initialization");
            enter(SessionPhase::DryRunExit, mode);
            return Ok(RunOutcome::DryRun);
        }

        let mut handles = SessionHandles::new();
        let phase = Cell::new(SessionPhase::Initializing);
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.initialize_and_run(settings, &mut handles, &phase)
        }))
        .unwrap_or_else(|payload| {
            Err(SessionError::Panicked {
                phase: phase.get(),
                message: panic_message(payload.as_ref()),
            })
        });

        let outcome = match result {
            Ok(()) => {
                info!("run completed normally");
                RunOutcome::Completed
            }
            Err(err) => {
                let subsystem = err.subsystem().map(|s| s.as_str()).unwrap_or("session");
                let failed_phase = phase.get();
                let ctx = LogContext::new()
                    .with_subsystem(subsystem)
                    .with_mode(mode)
                    .with_phase(failed_phase.as_str());
                log_system_event(
                    Some(&ctx),
                    "session.failed",
                    &format!("fatal error in session: {err}"),
                    SystemEventOutcome::Fault,
                );
                RunOutcome::Failed
            }
        };

        enter(SessionPhase::TearingDown, mode);
        info!("shutting down subsystems");
        let report = handles.teardown(self.join_timeout, mode);
        info!(
            attempted = report.attempted().len(),
            failures = report.failures(),
            "teardown complete"
        );

        enter(SessionPhase::Done, mode);
        Ok(outcome)
    }

    fn initialize_and_run(
        &self,
        settings: &Settings,
        handles: &mut SessionHandles,
        phase: &Cell<SessionPhase>,
    ) -> Result<(), SessionError> {
        enter(SessionPhase::Initializing, settings.mode.as_str());

        let target = settings.connection_target().ok_or_else(|| SessionError::Init {
            subsystem: Subsystem::VehicleLink,
            error: anyhow!("no connection target resolved for mode={}", settings.mode),
        })?;
        info!(mode = %settings.mode, target = %target, "initializing vehicle connection");
        let link = self
            .factory
            .connect_vehicle(settings.mode, &target)
            .map_err(init_error(Subsystem::VehicleLink))?;
        handles.link = Some(link.clone());

        info!("initializing telemetry logging");
        let telemetry = self
            .factory
            .open_telemetry_log(link.clone())
            .map_err(init_error(Subsystem::TelemetryLog))?;
        handles.telemetry = Some(telemetry.clone());

        if settings.mode.is_swarm() {
            let channels = settings.swarm_channels().ok_or_else(|| SessionError::Init {
                subsystem: Subsystem::Swarm,
                error: anyhow!("swarm mode without channels"),
            })?;
            info!(channels = ?channels, "initializing swarm controller");
            let swarm = self
                .factory
                .start_swarm(&channels)
                .map_err(init_error(Subsystem::Swarm))?;
            handles.swarm = Some(swarm);
        }

        if settings.vision.enabled {
            info!(
                camera_index = ?settings.vision.camera_index,
                camera_url = ?settings.vision.camera_url,
                dictionary = %settings.vision.aruco_dict_name,
                "starting vision detector thread"
            );
            let detector = self
                .factory
                .build_detector(&settings.vision)
                .map_err(init_error(Subsystem::Detector))?;
            handles.detector = Some(detector.clone());
            let worker = DetectorWorker::spawn(detector).map_err(|err| SessionError::Init {
                subsystem: Subsystem::DetectorWorker,
                error: anyhow::Error::new(err).context("unable to spawn detector thread"),
            })?;
            handles.detector_worker = Some(worker);
        }

        info!("launching command/UI loop");
        let context = CommandLoopContext {
            link,
            telemetry,
            swarm: handles.swarm.clone(),
            vision: settings.vision.enabled,
            control: settings.vision.control_enabled,
            waypoints: settings.features.waypoints,
        };
        let mut command_loop = self
            .factory
            .build_command_loop(context)
            .map_err(init_error(Subsystem::CommandLoop))?;
        if let (Some(detector), Some(worker)) = (&handles.detector, &handles.detector_worker) {
            command_loop.attach_detector(detector.clone(), worker.monitor());
        }

        phase.set(SessionPhase::Running);
        enter(SessionPhase::Running, settings.mode.as_str());
        let result = command_loop.run().map_err(SessionError::CommandLoop);
        // The loop must release its borrowed handles before teardown starts.
        drop(command_loop);
        result
    }
}

/// Run `settings` through a fresh [`SessionRunner`] with default options.
pub fn run_session<F: SubsystemFactory>(
    settings: &Settings,
    factory: F,
) -> Result<RunOutcome, SnapshotError> {
    SessionRunner::new(factory).run(settings)
}

fn enter(phase: SessionPhase, mode: &str) {
    debug!(phase = %phase, mode, "session phase");
}
