//! ---
//! nest_section: "02-session-lifecycle"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Ordered, failure-isolated shutdown of session subsystems."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
//! Teardown of whatever a session actually built.
//!
//! Steps always run in [`TeardownStep::ORDER`]. Absent handles are skipped,
//! and an error or panic in one step is logged and never prevents the
//! following steps from running.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use nest_common::logging::{log_system_event, LogContext, SystemEventOutcome};
use tracing::debug;

use crate::subsystems::{Subsystem, SwarmController, TelemetryLog, VehicleLink, VisionDetector};
use crate::worker::{panic_message, DetectorWorker, JoinOutcome};

/// Bounded wait for the detector thread during teardown.
pub const DETECTOR_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeardownStep {
    StopDetector,
    JoinDetector,
    CloseSwarm,
    CloseTelemetryLog,
    CloseVehicleLink,
}

impl TeardownStep {
    pub const ORDER: [TeardownStep; 5] = [
        TeardownStep::StopDetector,
        TeardownStep::JoinDetector,
        TeardownStep::CloseSwarm,
        TeardownStep::CloseTelemetryLog,
        TeardownStep::CloseVehicleLink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownStep::StopDetector => "stop-detector",
            TeardownStep::JoinDetector => "join-detector",
            TeardownStep::CloseSwarm => "close-swarm",
            TeardownStep::CloseTelemetryLog => "close-telemetry-log",
            TeardownStep::CloseVehicleLink => "close-vehicle-link",
        }
    }

    pub fn subsystem(&self) -> Subsystem {
        match self {
            TeardownStep::StopDetector => Subsystem::Detector,
            TeardownStep::JoinDetector => Subsystem::DetectorWorker,
            TeardownStep::CloseSwarm => Subsystem::Swarm,
            TeardownStep::CloseTelemetryLog => Subsystem::TelemetryLog,
            TeardownStep::CloseVehicleLink => Subsystem::VehicleLink,
        }
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Skipped,
    Completed,
    Failed(String),
    TimedOut,
}

impl StepStatus {
    pub fn was_attempted(&self) -> bool {
        !matches!(self, StepStatus::Skipped)
    }
}

/// Per-step record of one teardown pass. Logged only; it never feeds the
/// session outcome.
#[derive(Debug, Clone)]
pub struct TeardownReport {
    mode: String,
    steps: Vec<(TeardownStep, StepStatus)>,
}

impl TeardownReport {
    fn new(mode: &str) -> Self {
        Self {
            mode: mode.to_owned(),
            steps: Vec::new(),
        }
    }

    /// Connection mode of the session that was torn down.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn steps(&self) -> &[(TeardownStep, StepStatus)] {
        &self.steps
    }

    pub fn status(&self, step: TeardownStep) -> Option<&StepStatus> {
        self.steps
            .iter()
            .find(|(recorded, _)| *recorded == step)
            .map(|(_, status)| status)
    }

    /// Steps that had a handle to act on, in execution order.
    pub fn attempted(&self) -> Vec<TeardownStep> {
        self.steps
            .iter()
            .filter(|(_, status)| status.was_attempted())
            .map(|(step, _)| *step)
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.steps
            .iter()
            .filter(|(_, status)| matches!(status, StepStatus::Failed(_) | StepStatus::TimedOut))
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures() == 0
    }

    fn record(&mut self, step: TeardownStep, status: StepStatus) {
        let subsystem = step.subsystem();
        let ctx = LogContext::new()
            .with_subsystem(subsystem.as_str())
            .with_mode(&self.mode)
            .with_phase("tearing-down");
        let event = format!("teardown.{}", step.as_str());
        match &status {
            StepStatus::Skipped => debug!(step = %step, "teardown step skipped; handle absent"),
            StepStatus::Completed => log_system_event(
                Some(&ctx),
                &event,
                &format!("{} shut down", subsystem),
                SystemEventOutcome::Success,
            ),
            StepStatus::Failed(reason) => log_system_event(
                Some(&ctx),
                &event,
                &format!("error during {} shutdown: {}", subsystem, reason),
                SystemEventOutcome::Fault,
            ),
            StepStatus::TimedOut => log_system_event(
                Some(&ctx),
                &event,
                &format!("{} did not stop within the join timeout; detached", subsystem),
                SystemEventOutcome::Fault,
            ),
        }
        self.steps.push((step, status));
    }
}

/// Optional ownership slots filled in start-up order and drained by
/// [`SessionHandles::teardown`].
#[derive(Default)]
pub struct SessionHandles {
    pub link: Option<Arc<dyn VehicleLink>>,
    pub telemetry: Option<Arc<dyn TelemetryLog>>,
    pub swarm: Option<Arc<dyn SwarmController>>,
    pub detector: Option<Arc<dyn VisionDetector>>,
    pub detector_worker: Option<DetectorWorker>,
}

impl fmt::Debug for SessionHandles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandles")
            .field("link", &self.link.is_some())
            .field("telemetry", &self.telemetry.is_some())
            .field("swarm", &self.swarm.is_some())
            .field("detector", &self.detector.is_some())
            .field("detector_worker", &self.detector_worker)
            .finish()
    }
}

impl SessionHandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shut down every present handle in the fixed order, isolating failures.
    pub fn teardown(self, join_timeout: Duration, mode: &str) -> TeardownReport {
        let SessionHandles {
            link,
            telemetry,
            swarm,
            detector,
            detector_worker,
        } = self;
        let mut report = TeardownReport::new(mode);

        let status = attempt(detector.as_ref().map(|detector| {
            move || detector.stop().map(|()| StepStatus::Completed)
        }));
        report.record(TeardownStep::StopDetector, status);

        let status = attempt(detector_worker.map(|worker| {
            move || {
                Ok(match worker.join_timeout(join_timeout) {
                    JoinOutcome::Joined => StepStatus::Completed,
                    JoinOutcome::Panicked(message) => {
                        StepStatus::Failed(format!("detector thread panicked: {}", message))
                    }
                    JoinOutcome::TimedOut => StepStatus::TimedOut,
                })
            }
        }));
        report.record(TeardownStep::JoinDetector, status);
        drop(detector);

        let status = attempt(
            swarm
                .as_ref()
                .map(|swarm| move || swarm.close().map(|()| StepStatus::Completed)),
        );
        report.record(TeardownStep::CloseSwarm, status);

        let status = attempt(
            telemetry
                .as_ref()
                .map(|telemetry| move || telemetry.close().map(|()| StepStatus::Completed)),
        );
        report.record(TeardownStep::CloseTelemetryLog, status);

        let status = attempt(
            link.as_ref()
                .map(|link| move || link.close().map(|()| StepStatus::Completed)),
        );
        report.record(TeardownStep::CloseVehicleLink, status);

        report
    }
}

fn attempt<F>(action: Option<F>) -> StepStatus
where
    F: FnOnce() -> Result<StepStatus>,
{
    let Some(action) = action else {
        return StepStatus::Skipped;
    };
    match catch_unwind(AssertUnwindSafe(action)) {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => StepStatus::Failed(format!("{err:#}")),
        Err(payload) => StepStatus::Failed(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Instant;

    use anyhow::anyhow;
    use nest_common::config::ConnectionTarget;
    use parking_lot::Mutex;

    use super::*;
    use crate::subsystems::{TelemetryFrame, VehicleCommand};

    type Journal = Arc<Mutex<Vec<&'static str>>>;

    struct Link(Journal, bool);

    impl VehicleLink for Link {
        fn target(&self) -> ConnectionTarget {
            ConnectionTarget::Uri("radio://0/7/2M".into())
        }

        fn send(&self, _command: &VehicleCommand) -> Result<()> {
            Ok(())
        }

        fn close(&self) -> Result<()> {
            self.0.lock().push("link.close");
            if self.1 {
                return Err(anyhow!("radio dongle vanished"));
            }
            Ok(())
        }
    }

    struct Log(Journal);

    impl TelemetryLog for Log {
        fn latest(&self) -> Option<TelemetryFrame> {
            None
        }

        fn close(&self) -> Result<()> {
            self.0.lock().push("log.close");
            panic!("log buffer poisoned");
        }
    }

    struct Swarm(Journal);

    impl SwarmController for Swarm {
        fn channels(&self) -> Vec<String> {
            vec!["7".into()]
        }

        fn broadcast(&self, _command: &VehicleCommand) -> Result<()> {
            Ok(())
        }

        fn close(&self) -> Result<()> {
            self.0.lock().push("swarm.close");
            Err(anyhow!("swarm radio busy"))
        }
    }

    struct Detector(Journal, AtomicBool);

    impl VisionDetector for Detector {
        fn run(&self) -> Result<()> {
            while !self.1.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(2));
            }
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.0.lock().push("detector.stop");
            self.1.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Keeps capturing for a while regardless of stop requests.
    struct DeafDetector(Journal);

    impl VisionDetector for DeafDetector {
        fn run(&self) -> Result<()> {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.0.lock().push("detector.stop");
            Ok(())
        }
    }

    #[test]
    fn empty_handles_skip_every_step() {
        let report = SessionHandles::new().teardown(DETECTOR_JOIN_TIMEOUT, "swarm");
        assert_eq!(report.steps().len(), TeardownStep::ORDER.len());
        assert!(report.attempted().is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn every_step_runs_despite_errors_and_panics() {
        let journal: Journal = Arc::default();
        let detector = Arc::new(Detector(journal.clone(), AtomicBool::new(false)));
        let worker = DetectorWorker::spawn(detector.clone()).expect("spawn");
        let handles = SessionHandles {
            link: Some(Arc::new(Link(journal.clone(), true))),
            telemetry: Some(Arc::new(Log(journal.clone()))),
            swarm: Some(Arc::new(Swarm(journal.clone()))),
            detector: Some(detector),
            detector_worker: Some(worker),
        };

        let report = handles.teardown(DETECTOR_JOIN_TIMEOUT, "swarm");

        assert_eq!(
            *journal.lock(),
            vec!["detector.stop", "swarm.close", "log.close", "link.close"]
        );
        assert_eq!(report.attempted(), TeardownStep::ORDER.to_vec());
        assert_eq!(
            report.status(TeardownStep::JoinDetector),
            Some(&StepStatus::Completed)
        );
        assert!(matches!(
            report.status(TeardownStep::CloseTelemetryLog),
            Some(StepStatus::Failed(reason)) if reason.contains("log buffer poisoned")
        ));
        assert_eq!(report.failures(), 3);
    }

    #[test]
    fn only_present_handles_are_attempted() {
        let journal: Journal = Arc::default();
        let handles = SessionHandles {
            link: Some(Arc::new(Link(journal.clone(), false))),
            telemetry: Some(Arc::new(Log(journal.clone()))),
            ..SessionHandles::default()
        };
        let report = handles.teardown(DETECTOR_JOIN_TIMEOUT, "swarm");
        assert_eq!(
            report.attempted(),
            vec![TeardownStep::CloseTelemetryLog, TeardownStep::CloseVehicleLink]
        );
        assert_eq!(*journal.lock(), vec!["log.close", "link.close"]);
        assert_eq!(
            report.status(TeardownStep::CloseVehicleLink),
            Some(&StepStatus::Completed)
        );
    }

    #[test]
    fn detector_ignoring_stop_times_out_and_closes_continue() {
        let journal: Journal = Arc::default();
        let detector = Arc::new(DeafDetector(journal.clone()));
        let worker = DetectorWorker::spawn(detector.clone()).expect("spawn");
        let handles = SessionHandles {
            link: Some(Arc::new(Link(journal.clone(), false))),
            telemetry: Some(Arc::new(Log(journal.clone()))),
            swarm: Some(Arc::new(Swarm(journal.clone()))),
            detector: Some(detector),
            detector_worker: Some(worker),
        };

        let started = Instant::now();
        let report = handles.teardown(Duration::from_millis(50), "swarm");

        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(report.mode(), "swarm");
        assert_eq!(
            report.status(TeardownStep::JoinDetector),
            Some(&StepStatus::TimedOut)
        );
        assert_eq!(
            *journal.lock(),
            vec!["detector.stop", "swarm.close", "log.close", "link.close"]
        );
        assert_eq!(
            report.status(TeardownStep::CloseVehicleLink),
            Some(&StepStatus::Completed)
        );
        assert_eq!(report.attempted(), TeardownStep::ORDER.to_vec());
    }
}
