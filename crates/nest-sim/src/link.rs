//! ---
//! nest_section: "11-simulation-test-harness"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Simulated vehicle link and telemetry log."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use nest_common::config::ConnectionTarget;
use nest_core::{TelemetryFrame, TelemetryLog, VehicleCommand, VehicleLink};
use parking_lot::Mutex;
use rand::prelude::*;
use rand_distr::Normal;
use tracing::{debug, info};

const FULL_BATTERY_V: f64 = 4.2;
const BATTERY_DRAIN_PER_COMMAND_V: f64 = 0.01;
const MAX_ALTITUDE_M: f64 = 3.0;

/// Kinematic state the simulated vehicle reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightState {
    pub position_m: [f64; 3],
    pub battery_v: f64,
    pub flying: bool,
    pub commands: u64,
}

impl Default for FlightState {
    fn default() -> Self {
        Self {
            position_m: [0.0; 3],
            battery_v: FULL_BATTERY_V,
            flying: false,
            commands: 0,
        }
    }
}

/// In-memory vehicle that applies commands instantly.
#[derive(Debug)]
pub struct SimVehicleLink {
    target: ConnectionTarget,
    state: Mutex<FlightState>,
    closed: AtomicBool,
}

impl SimVehicleLink {
    pub fn new(target: ConnectionTarget) -> Self {
        Self {
            target,
            state: Mutex::new(FlightState::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> FlightState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl VehicleLink for SimVehicleLink {
    fn target(&self) -> ConnectionTarget {
        self.target.clone()
    }

    fn send(&self, command: &VehicleCommand) -> Result<()> {
        if self.is_closed() {
            bail!("link {} is closed", self.target);
        }
        let mut state = self.state.lock();
        match *command {
            VehicleCommand::Takeoff { height_m } => {
                if height_m <= 0.0 || height_m > MAX_ALTITUDE_M {
                    bail!("takeoff height {height_m} m outside (0, {MAX_ALTITUDE_M}]");
                }
                state.flying = true;
                state.position_m[2] = height_m;
            }
            VehicleCommand::Land | VehicleCommand::Stop => {
                state.flying = false;
                state.position_m[2] = 0.0;
            }
            VehicleCommand::Hover => {
                if !state.flying {
                    bail!("cannot hover while landed");
                }
            }
            VehicleCommand::GoTo { x_m, y_m, z_m } => {
                if !state.flying {
                    bail!("cannot go to a position while landed");
                }
                if !(0.0..=MAX_ALTITUDE_M).contains(&z_m) {
                    bail!("altitude {z_m} m outside [0, {MAX_ALTITUDE_M}]");
                }
                state.position_m = [x_m, y_m, z_m];
            }
        }
        state.commands += 1;
        state.battery_v = (state.battery_v - BATTERY_DRAIN_PER_COMMAND_V).max(0.0);
        debug!(target = %self.target, ?command, "command applied");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            bail!("link {} already closed", self.target);
        }
        info!(target = %self.target, "vehicle link closed");
        Ok(())
    }
}

/// Telemetry reader sampling a [`SimVehicleLink`] with gaussian sensor noise.
#[derive(Debug)]
pub struct SimTelemetryLog {
    link: Arc<SimVehicleLink>,
    rng: Mutex<StdRng>,
    noise: Normal<f64>,
    closed: AtomicBool,
}

impl SimTelemetryLog {
    pub fn new(link: Arc<SimVehicleLink>, noise_sigma: f64, seed: u64) -> Result<Self> {
        let noise = Normal::new(0.0, noise_sigma)
            .map_err(|err| anyhow!("invalid telemetry noise sigma {noise_sigma}: {err}"))?;
        Ok(Self {
            link,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            noise,
            closed: AtomicBool::new(false),
        })
    }
}

impl TelemetryLog for SimTelemetryLog {
    fn latest(&self) -> Option<TelemetryFrame> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let state = self.link.state();
        let mut rng = self.rng.lock();
        let mut position_m = state.position_m;
        for axis in position_m.iter_mut() {
            *axis += self.noise.sample(&mut *rng);
        }
        position_m[2] = position_m[2].max(0.0);
        Some(TelemetryFrame {
            source: self.link.target().to_string(),
            timestamp: Utc::now(),
            position_m,
            battery_v: state.battery_v,
            flying: state.flying,
        })
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            bail!("telemetry log already closed");
        }
        info!("telemetry log closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> SimVehicleLink {
        SimVehicleLink::new(ConnectionTarget::Uri("udp://127.0.0.1:2390".into()))
    }

    #[test]
    fn takeoff_goto_and_land_update_state() {
        let link = link();
        link.send(&VehicleCommand::Takeoff { height_m: 0.5 }).unwrap();
        link.send(&VehicleCommand::GoTo {
            x_m: 1.0,
            y_m: -0.5,
            z_m: 1.2,
        })
        .unwrap();
        assert_eq!(link.state().position_m, [1.0, -0.5, 1.2]);
        assert!(link.state().flying);

        link.send(&VehicleCommand::Land).unwrap();
        let state = link.state();
        assert!(!state.flying);
        assert_eq!(state.position_m[2], 0.0);
        assert_eq!(state.commands, 3);
        assert!(state.battery_v < FULL_BATTERY_V);
    }

    #[test]
    fn goto_requires_flight() {
        let link = link();
        let err = link
            .send(&VehicleCommand::GoTo {
                x_m: 0.0,
                y_m: 0.0,
                z_m: 1.0,
            })
            .unwrap_err();
        assert!(err.to_string().contains("landed"));
        assert_eq!(link.state().commands, 0);
    }

    #[test]
    fn closed_link_rejects_commands_and_second_close() {
        let link = link();
        link.close().unwrap();
        assert!(link.is_closed());
        assert!(link.send(&VehicleCommand::Hover).is_err());
        assert!(link.close().is_err());
    }

    #[test]
    fn telemetry_tracks_link_state_with_noise() {
        let link = Arc::new(link());
        link.send(&VehicleCommand::Takeoff { height_m: 1.0 }).unwrap();
        let log = SimTelemetryLog::new(link.clone(), 0.01, 7).unwrap();

        let frame = log.latest().expect("frame");
        assert!(frame.flying);
        assert!((frame.position_m[2] - 1.0).abs() < 0.1);
        assert_eq!(frame.source, "udp://127.0.0.1:2390");

        log.close().unwrap();
        assert!(log.latest().is_none());
    }

    #[test]
    fn negative_noise_sigma_is_rejected() {
        assert!(SimTelemetryLog::new(Arc::new(link()), -1.0, 1).is_err());
    }
}
