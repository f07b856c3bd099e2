//! ---
//! nest_section: "01-core-functionality"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Shared settings and logging primitives."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
//! Shared primitives for the NEST flight session workspace.
//! This crate resolves the session [`Settings`] from a CLI request plus the
//! process environment, and owns the process-wide tracing setup.

pub mod config;
pub mod logging;

pub use config::{
    read_dotenv, ConfigError, ConnectionMode, ConnectionTarget, FeatureFlags, RadioSettings,
    RunSettings, Settings, SettingsRequest, SwarmSettings, VisionSettings, DOTENV_FILE,
};
pub use logging::{
    effective_log_level, init_tracing, log_system_event, LogContext, LogFormat,
    SystemEventOutcome,
};
