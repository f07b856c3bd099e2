//! ---
//! nest_section: "02-session-lifecycle"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Vision detector worker thread with bounded join."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
use std::any::Any;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::subsystems::VisionDetector;

pub const DETECTOR_THREAD_NAME: &str = "vision-detector";

#[derive(Debug, Default)]
struct Completion {
    finished: Mutex<bool>,
    signal: Condvar,
}

/// Marks the worker finished when the thread body exits, including by panic.
struct FinishGuard(Arc<Completion>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        *self.0.finished.lock() = true;
        self.0.signal.notify_all();
    }
}

/// Read-only view of the detector worker, lent to the command loop.
#[derive(Debug, Clone)]
pub struct WorkerMonitor {
    completion: Arc<Completion>,
}

impl WorkerMonitor {
    pub fn is_alive(&self) -> bool {
        !*self.completion.finished.lock()
    }
}

/// Result of a bounded join on the worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Panicked(String),
    /// Still running after the timeout; the thread was detached.
    TimedOut,
}

/// Background thread running a detector's capture/detect loop.
#[derive(Debug)]
pub struct DetectorWorker {
    handle: Option<JoinHandle<()>>,
    completion: Arc<Completion>,
}

impl DetectorWorker {
    /// Start `detector.run()` on a dedicated named thread.
    pub fn spawn(detector: Arc<dyn VisionDetector>) -> io::Result<Self> {
        let completion = Arc::new(Completion::default());
        let guard = FinishGuard(completion.clone());
        let handle = thread::Builder::new()
            .name(DETECTOR_THREAD_NAME.to_owned())
            .spawn(move || {
                let _guard = guard;
                match detector.run() {
                    Ok(()) => debug!("vision detector loop exited"),
                    Err(err) => error!(error = %format!("{err:#}"), "vision detector loop failed"),
                }
            })?;
        Ok(Self {
            handle: Some(handle),
            completion,
        })
    }

    pub fn monitor(&self) -> WorkerMonitor {
        WorkerMonitor {
            completion: self.completion.clone(),
        }
    }

    /// Wait up to `timeout` for the thread to finish. Never blocks longer.
    pub fn join_timeout(mut self, timeout: Duration) -> JoinOutcome {
        let finished = {
            let mut done = self.completion.finished.lock();
            if !*done {
                let _ = self
                    .completion
                    .signal
                    .wait_while_for(&mut done, |done| !*done, timeout);
            }
            *done
        };

        let Some(handle) = self.handle.take() else {
            return JoinOutcome::Joined;
        };
        if !finished {
            drop(handle);
            return JoinOutcome::TimedOut;
        }
        match handle.join() {
            Ok(()) => JoinOutcome::Joined,
            Err(payload) => JoinOutcome::Panicked(panic_message(payload.as_ref())),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    use anyhow::Result;

    use super::*;

    #[derive(Default)]
    struct CooperativeDetector {
        stop: AtomicBool,
    }

    impl VisionDetector for CooperativeDetector {
        fn run(&self) -> Result<()> {
            while !self.stop.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.stop.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubbornDetector;

    impl VisionDetector for StubbornDetector {
        fn run(&self) -> Result<()> {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    struct PanickingDetector;

    impl VisionDetector for PanickingDetector {
        fn run(&self) -> Result<()> {
            panic!("camera unplugged");
        }

        fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stopped_detector_joins_within_timeout() {
        let detector = Arc::new(CooperativeDetector::default());
        let worker = DetectorWorker::spawn(detector.clone()).expect("spawn");
        let monitor = worker.monitor();
        assert!(monitor.is_alive());

        detector.stop().expect("stop");
        assert_eq!(worker.join_timeout(Duration::from_secs(2)), JoinOutcome::Joined);
        assert!(!monitor.is_alive());
    }

    #[test]
    fn stubborn_detector_is_detached_after_timeout() {
        let worker = DetectorWorker::spawn(Arc::new(StubbornDetector)).expect("spawn");
        let started = Instant::now();
        assert_eq!(
            worker.join_timeout(Duration::from_millis(50)),
            JoinOutcome::TimedOut
        );
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn panicking_detector_reports_payload() {
        let worker = DetectorWorker::spawn(Arc::new(PanickingDetector)).expect("spawn");
        match worker.join_timeout(Duration::from_secs(2)) {
            JoinOutcome::Panicked(message) => assert!(message.contains("camera unplugged")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
