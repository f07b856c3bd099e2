//! ---
//! nest_section: "02-session-lifecycle"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Capability interfaces for session collaborators."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
//! Capability traits the session runner builds its subsystems through.
//!
//! The runner never names a concrete vehicle, swarm, vision or console
//! implementation. A [`SubsystemFactory`] is bound at build time and every
//! handle it returns is owned by the runner for exactly one session.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use nest_common::config::{ConnectionMode, ConnectionTarget, VisionSettings};
use serde::{Deserialize, Serialize};

use crate::worker::WorkerMonitor;

/// Subsystems a session can construct, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    VehicleLink,
    TelemetryLog,
    Swarm,
    Detector,
    DetectorWorker,
    CommandLoop,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::VehicleLink => "vehicle-link",
            Subsystem::TelemetryLog => "telemetry-log",
            Subsystem::Swarm => "swarm",
            Subsystem::Detector => "vision-detector",
            Subsystem::DetectorWorker => "detector-worker",
            Subsystem::CommandLoop => "command-loop",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-level commands forwarded to vehicles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum VehicleCommand {
    Takeoff { height_m: f64 },
    Land,
    Hover,
    GoTo { x_m: f64, y_m: f64, z_m: f64 },
    Stop,
}

/// Latest known vehicle state as reported by the telemetry log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub position_m: [f64; 3],
    pub battery_v: f64,
    pub flying: bool,
}

/// A fiducial marker seen by the vision detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetection {
    pub marker_id: u32,
    pub position_m: [f64; 3],
    pub captured_at: DateTime<Utc>,
}

/// Live link to one vehicle, or to the set of vehicles on a channel list.
pub trait VehicleLink: Send + Sync {
    fn target(&self) -> ConnectionTarget;
    fn send(&self, command: &VehicleCommand) -> Result<()>;
    /// Release the link. Called once, during teardown.
    fn close(&self) -> Result<()>;
}

/// Telemetry reader bound to a live vehicle link.
pub trait TelemetryLog: Send + Sync {
    fn latest(&self) -> Option<TelemetryFrame>;
    /// Called once, during teardown.
    fn close(&self) -> Result<()>;
}

/// Multi-vehicle command fan-out for swarm sessions.
pub trait SwarmController: Send + Sync {
    fn channels(&self) -> Vec<String>;
    fn broadcast(&self, command: &VehicleCommand) -> Result<()>;
    /// Called once, during teardown.
    fn close(&self) -> Result<()>;
}

/// Continuous capture/detect loop run on the detector worker thread.
pub trait VisionDetector: Send + Sync {
    /// Blocks until [`VisionDetector::stop`] is observed or capture fails.
    fn run(&self) -> Result<()>;
    /// Cooperative stop request. Must not block on the capture loop.
    fn stop(&self) -> Result<()>;
    fn detections(&self) -> Vec<MarkerDetection> {
        Vec::new()
    }
}

/// Blocking operator loop that owns the session while it runs.
pub trait CommandLoop {
    /// Register a started detector and a view of its worker thread.
    fn attach_detector(&mut self, detector: Arc<dyn VisionDetector>, worker: WorkerMonitor);
    /// Blocks until the operator exits or the loop fails.
    fn run(&mut self) -> Result<()>;
}

/// Everything the command loop is lent for the duration of the session.
pub struct CommandLoopContext {
    pub link: Arc<dyn VehicleLink>,
    pub telemetry: Arc<dyn TelemetryLog>,
    pub swarm: Option<Arc<dyn SwarmController>>,
    pub vision: bool,
    pub control: bool,
    pub waypoints: bool,
}

/// Constructors for every session collaborator.
pub trait SubsystemFactory {
    fn connect_vehicle(
        &self,
        mode: ConnectionMode,
        target: &ConnectionTarget,
    ) -> Result<Arc<dyn VehicleLink>>;

    fn open_telemetry_log(&self, link: Arc<dyn VehicleLink>) -> Result<Arc<dyn TelemetryLog>>;

    fn start_swarm(&self, channels: &[String]) -> Result<Arc<dyn SwarmController>>;

    fn build_detector(&self, vision: &VisionSettings) -> Result<Arc<dyn VisionDetector>>;

    fn build_command_loop(&self, context: CommandLoopContext) -> Result<Box<dyn CommandLoop>>;
}
