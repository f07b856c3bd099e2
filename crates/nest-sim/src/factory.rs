//! ---
//! nest_section: "11-simulation-test-harness"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Subsystem factory binding sessions to the simulated backend."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
use std::io::{self, Cursor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nest_common::config::{ConnectionMode, ConnectionTarget, VisionSettings};
use nest_core::{
    CommandLoop, CommandLoopContext, SubsystemFactory, SwarmController, TelemetryLog,
    VehicleLink, VisionDetector,
};
use parking_lot::Mutex;
use tracing::info;

use crate::console::{ConsoleLoop, WAYPOINTS_FILE};
use crate::detector::{SimDetector, DEFAULT_FRAME_INTERVAL};
use crate::link::{SimTelemetryLog, SimVehicleLink};
use crate::swarm::SimSwarm;

pub const DEFAULT_NOISE_SIGMA_M: f64 = 0.005;

/// Builds simulated collaborators. The console reads stdin unless a script
/// is supplied.
#[derive(Debug)]
pub struct SimFactory {
    data_dir: PathBuf,
    script: Option<String>,
    frame_interval: Duration,
    noise_sigma_m: f64,
    seed: u64,
    current_link: Mutex<Option<Arc<SimVehicleLink>>>,
}

impl SimFactory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            script: None,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            noise_sigma_m: DEFAULT_NOISE_SIGMA_M,
            seed: rand::random(),
            current_link: Mutex::new(None),
        }
    }

    /// Feed the console from `script` instead of stdin.
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn waypoints_path(&self) -> PathBuf {
        self.data_dir.join(WAYPOINTS_FILE)
    }
}

fn check_scheme(mode: ConnectionMode, target: &ConnectionTarget) -> Result<()> {
    match (mode, target) {
        (ConnectionMode::Udp, ConnectionTarget::Uri(uri)) if uri.starts_with("udp://") => Ok(()),
        (ConnectionMode::Radio, ConnectionTarget::Uri(uri)) if uri.starts_with("radio://") => {
            Ok(())
        }
        (ConnectionMode::Swarm, ConnectionTarget::Channels(channels)) if !channels.is_empty() => {
            Ok(())
        }
        (mode, target) => bail!("target {target} is not valid for {mode} mode"),
    }
}

impl SubsystemFactory for SimFactory {
    fn connect_vehicle(
        &self,
        mode: ConnectionMode,
        target: &ConnectionTarget,
    ) -> Result<Arc<dyn VehicleLink>> {
        check_scheme(mode, target)?;
        let link = Arc::new(SimVehicleLink::new(target.clone()));
        *self.current_link.lock() = Some(link.clone());
        info!(mode = %mode, target = %target, "simulated vehicle connected");
        Ok(link)
    }

    fn open_telemetry_log(&self, link: Arc<dyn VehicleLink>) -> Result<Arc<dyn TelemetryLog>> {
        let target = link.target();
        let sim = self
            .current_link
            .lock()
            .clone()
            .filter(|sim| sim.target() == target)
            .with_context(|| format!("no simulated vehicle behind {target}"))?;
        let log = SimTelemetryLog::new(sim, self.noise_sigma_m, self.seed)?;
        Ok(Arc::new(log))
    }

    fn start_swarm(&self, channels: &[String]) -> Result<Arc<dyn SwarmController>> {
        let mut swarm = SimSwarm::new(channels)?;
        let lead = self
            .current_link
            .lock()
            .clone()
            .filter(|link| matches!(link.target(), ConnectionTarget::Channels(_)));
        if let Some(lead) = lead {
            swarm = swarm.with_lead(lead);
        }
        Ok(Arc::new(swarm))
    }

    fn build_detector(&self, vision: &VisionSettings) -> Result<Arc<dyn VisionDetector>> {
        let detector = SimDetector::new(vision, self.frame_interval, self.seed)?;
        Ok(Arc::new(detector))
    }

    fn build_command_loop(&self, context: CommandLoopContext) -> Result<Box<dyn CommandLoop>> {
        let waypoints = self.waypoints_path();
        let console: Box<dyn CommandLoop> = match &self.script {
            Some(script) => Box::new(ConsoleLoop::new(
                context,
                Cursor::new(script.clone().into_bytes()),
                io::stdout(),
                waypoints,
            )),
            None => Box::new(ConsoleLoop::new(
                context,
                io::stdin().lock(),
                io::stdout(),
                waypoints,
            )),
        };
        Ok(console)
    }
}
