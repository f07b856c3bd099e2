//! ---
//! nest_section: "11-simulation-test-harness"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Simulated multi-vehicle swarm controller."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{bail, Result};
use nest_common::config::ConnectionTarget;
use nest_core::{SwarmController, VehicleCommand, VehicleLink};
use tracing::{info, warn};

use crate::link::SimVehicleLink;

/// One simulated vehicle per radio channel, plus an optional lead link that
/// mirrors every broadcast so telemetry bound to it follows the formation.
#[derive(Debug)]
pub struct SimSwarm {
    members: Vec<(String, SimVehicleLink)>,
    lead: Option<Arc<SimVehicleLink>>,
}

impl SimSwarm {
    pub fn new(channels: &[String]) -> Result<Self> {
        if channels.is_empty() {
            bail!("swarm requires at least one channel");
        }
        let members = channels
            .iter()
            .map(|channel| {
                let uri = format!("radio://0/{channel}/2M");
                (channel.clone(), SimVehicleLink::new(ConnectionTarget::Uri(uri)))
            })
            .collect();
        info!(channels = ?channels, "swarm members connected");
        Ok(Self {
            members,
            lead: None,
        })
    }

    /// Mirror broadcasts onto `lead`. The lead is not closed by the swarm.
    pub fn with_lead(mut self, lead: Arc<SimVehicleLink>) -> Self {
        self.lead = Some(lead);
        self
    }

    pub fn member(&self, channel: &str) -> Option<&SimVehicleLink> {
        self.members
            .iter()
            .find(|(name, _)| name == channel)
            .map(|(_, link)| link)
    }
}

impl SwarmController for SimSwarm {
    fn channels(&self) -> Vec<String> {
        self.members.iter().map(|(channel, _)| channel.clone()).collect()
    }

    /// Sends to every member; reports the channels that refused.
    fn broadcast(&self, command: &VehicleCommand) -> Result<()> {
        let mut refused = Vec::new();
        for (channel, link) in &self.members {
            if let Err(err) = link.send(command) {
                warn!(channel = %channel, error = %err, "swarm member rejected command");
                refused.push(channel.as_str());
            }
        }
        if let Some(lead) = &self.lead {
            if let Err(err) = lead.send(command) {
                warn!(target = %lead.target(), error = %err, "swarm lead rejected command");
                refused.push("lead");
            }
        }
        if !refused.is_empty() {
            bail!("command rejected on channel(s) {}", refused.join(","));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut failed = Vec::new();
        for (channel, link) in &self.members {
            if let Err(err) = link.close() {
                warn!(channel = %channel, error = %err, "swarm member close failed");
                failed.push(channel.as_str());
            }
        }
        if !failed.is_empty() {
            bail!("failed to close channel(s) {}", failed.join(","));
        }
        info!("swarm controller closed");
        Ok(())
    }
}
