//! ---
//! nest_section: "03-persistence-logging"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Process-wide tracing setup and lifecycle event helpers."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as subscriber_fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::RunSettings;

/// Environment default for the session log level.
pub const LOG_LEVEL_ENV: &str = "NEST_LOG_LEVEL";
pub const DEFAULT_LOG_LEVEL: &str = "INFO";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Console log formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    StructuredJson,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" | "structured-json" => Ok(LogFormat::StructuredJson),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Pick the session log level: explicit override, else `NEST_LOG_LEVEL`,
/// else `INFO`. Always upper-cased.
pub fn effective_log_level<F>(override_level: Option<&str>, env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    override_level
        .map(str::to_owned)
        .or_else(|| env(LOG_LEVEL_ENV))
        .map(|level| level.trim().to_owned())
        .filter(|level| !level.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned())
        .to_uppercase()
}

/// Map an operator-facing level name onto a tracing filter directive.
/// Unknown names fall back to `info`.
pub fn level_directive(level: &str) -> &'static str {
    match level.to_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" | "FATAL" => "error",
        "OFF" => "off",
        _ => "info",
    }
}

/// Initialise the process-wide subscriber for a session.
///
/// Console output follows `run.log_format`; a daily rolling JSON file is
/// written under `run.logs_dir`. Calling this more than once keeps the first
/// subscriber.
pub fn init_tracing(service_name: &str, run: &RunSettings) -> Result<()> {
    std::fs::create_dir_all(&run.logs_dir)
        .with_context(|| format!("unable to create log directory {}", run.logs_dir.display()))?;

    let file_appender = daily(&run.logs_dir, format!("{}.log", service_name));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let directive = level_directive(&run.log_level);
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|err| {
        eprintln!("invalid log level {} ({}); defaulting to info", run.log_level, err);
        EnvFilter::new("info")
    });

    let console_layer = match run.log_format {
        LogFormat::Pretty => subscriber_fmt::layer()
            .with_target(true)
            .with_timer(subscriber_fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::StructuredJson => subscriber_fmt::layer()
            .with_target(false)
            .with_timer(subscriber_fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = subscriber_fmt::layer()
        .with_target(true)
        .with_timer(subscriber_fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        let _ = FILE_GUARD.set(file_guard);
        let _ = STDOUT_GUARD.set(stdout_guard);
        info!(service = %service_name, level = %run.log_level, log_dir = %run.logs_dir.display(), format = ?run.log_format, "tracing initialised");
    }
    Ok(())
}

/// Structured context attached to lifecycle events.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Subsystem the event concerns (`vehicle-link`, `swarm`, ...).
    pub subsystem: Option<&'a str>,
    /// Connection mode of the session.
    pub mode: Option<&'a str>,
    /// Lifecycle phase the session was in.
    pub phase: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subsystem(mut self, subsystem: &'a str) -> Self {
        self.subsystem = Some(subsystem);
        self
    }

    pub fn with_mode(mut self, mode: &'a str) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_phase(mut self, phase: &'a str) -> Self {
        self.phase = Some(phase);
        self
    }
}

/// Outcome carried by a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    Success,
    Fault,
}

impl SystemEventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

impl fmt::Display for SystemEventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emit a lifecycle event. Faults are logged at error level.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let default_ctx = LogContext::default();
    let ctx = context.unwrap_or(&default_ctx);
    let subsystem = ctx.subsystem.unwrap_or("");
    let mode = ctx.mode.unwrap_or("");
    let phase = ctx.phase.unwrap_or("");
    match outcome {
        SystemEventOutcome::Success => info!(
            event,
            outcome = outcome.as_str(),
            subsystem,
            mode,
            phase,
            "{}",
            message
        ),
        SystemEventOutcome::Fault => error!(
            event,
            outcome = outcome.as_str(),
            subsystem,
            mode,
            phase,
            "{}",
            message
        ),
    }
}
