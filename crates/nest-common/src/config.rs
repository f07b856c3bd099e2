//! ---
//! nest_section: "01-core-functionality"
//! nest_subsection: "module"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Session settings model and environment resolution."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::logging::{effective_log_level, LogFormat};

/// Radio channel keys checked for `RADIO_CHANNEL_<key>` URIs.
pub const RADIO_CHANNEL_KEYS: [&str; 3] = ["7", "8", "9"];

pub const ENV_PROJECT_ROOT: &str = "NEST_PROJECT_ROOT";
pub const ENV_LOGS_DIR: &str = "NEST_LOGS_DIR";
pub const ENV_DATA_DIR: &str = "NEST_DATA_DIR";
pub const ENV_CACHE_DIR: &str = "NEST_CACHE_DIR";
pub const ENV_LOG_FORMAT: &str = "NEST_LOG_FORMAT";
pub const ENV_CAMERA_INDEX: &str = "NEST_CAMERA_INDEX";
pub const ENV_CAMERA_URL: &str = "NEST_CAMERA_URL";
pub const ENV_ARUCO_DICT: &str = "NEST_ARUCO_DICT";
pub const ENV_MARKER_SIZE_M: &str = "NEST_MARKER_SIZE_M";
pub const ENV_SHOW_WINDOW: &str = "NEST_VISION_SHOW_WINDOW";
pub const ENV_UDP_URI: &str = "CF_URI_UDP";

/// Optional file under the project root holding variables the process lacks.
pub const DOTENV_FILE: &str = ".env";

fn default_aruco_dict() -> String {
    "DICT_4X4_50".to_owned()
}

fn default_marker_size_m() -> f64 {
    0.040
}

fn default_show_window() -> bool {
    true
}

fn default_log_level() -> String {
    "INFO".to_owned()
}

/// Errors raised while resolving settings, before any session starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("`control` requires `vision` (click-to-go needs vision)")]
    ControlRequiresVision,
    #[error("mode=radio requires a channel")]
    MissingChannel,
    #[error("no URI configured for channel={channel}; set RADIO_CHANNEL_{channel} in .env")]
    MissingRadioUri { channel: String },
    #[error("no CF_URI_UDP configured for udp mode")]
    MissingUdpUri,
    #[error("mode=swarm requires at least one channel")]
    MissingSwarmChannels,
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("no connection target resolved for mode={0}")]
    MissingTarget(ConnectionMode),
    #[error("unknown connection mode: {0}")]
    UnknownMode(String),
    #[error("unable to read {path}: {reason}")]
    Dotenv { path: String, reason: String },
}

/// Read `KEY=value` pairs from a dotenv file. A missing file yields no
/// variables; the first definition of a repeated key wins.
pub fn read_dotenv(path: &Path) -> Result<IndexMap<String, String>, ConfigError> {
    let dotenv_error = |err: dotenvy::Error| ConfigError::Dotenv {
        path: path.display().to_string(),
        reason: err.to_string(),
    };
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(err) if err.not_found() => return Ok(IndexMap::new()),
        Err(err) => return Err(dotenv_error(err)),
    };
    let mut vars = IndexMap::new();
    for entry in entries {
        let (key, value) = entry.map_err(dotenv_error)?;
        vars.entry(key).or_insert(value);
    }
    debug!(path = %path.display(), count = vars.len(), "dotenv file loaded");
    Ok(vars)
}

/// How the session reaches its vehicles.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Single link over UDP.
    Udp,
    /// Single radio link selected by channel key.
    Radio,
    /// One radio link per channel, driven through the swarm controller.
    Swarm,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::Udp => "udp",
            ConnectionMode::Radio => "radio",
            ConnectionMode::Swarm => "swarm",
        }
    }

    pub fn is_swarm(&self) -> bool {
        matches!(self, ConnectionMode::Swarm)
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "udp" => Ok(ConnectionMode::Udp),
            "radio" => Ok(ConnectionMode::Radio),
            "swarm" => Ok(ConnectionMode::Swarm),
            other => Err(ConfigError::UnknownMode(other.to_owned())),
        }
    }
}

/// Resolved address of the vehicle(s) for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    Uri(String),
    Channels(Vec<String>),
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionTarget::Uri(uri) => f.write_str(uri),
            ConnectionTarget::Channels(channels) => write!(f, "channels[{}]", channels.join(",")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSettings {
    pub project_root: PathBuf,
    pub logs_dir: PathBuf,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl RunSettings {
    /// Lay out the standard `logs`, `data` and `cache` directories under `root`.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            logs_dir: root.join("logs"),
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
            project_root: root,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RadioSettings {
    /// Channel key (`"7"`, `"8"`, ...) to radio URI. Empty when unset.
    #[serde(default)]
    pub uri_by_channel: IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SwarmSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisionSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub control_enabled: bool,
    #[serde(default)]
    pub camera_index: Option<i32>,
    #[serde(default)]
    pub camera_url: Option<String>,
    #[serde(default = "default_aruco_dict")]
    pub aruco_dict_name: String,
    #[serde(default = "default_marker_size_m")]
    pub marker_size_m: f64,
    #[serde(default = "default_show_window")]
    pub show_window: bool,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            control_enabled: false,
            camera_index: None,
            camera_url: None,
            aruco_dict_name: default_aruco_dict(),
            marker_size_m: default_marker_size_m(),
            show_window: default_show_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FeatureFlags {
    #[serde(default)]
    pub waypoints: bool,
}

/// Fully resolved configuration for one flight session. Read-only once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub mode: ConnectionMode,
    pub dry_run: bool,
    pub run: RunSettings,
    #[serde(default)]
    pub radio: RadioSettings,
    #[serde(default)]
    pub swarm: SwarmSettings,
    #[serde(default)]
    pub vision: VisionSettings,
    #[serde(default)]
    pub features: FeatureFlags,
    /// Resolved single-link target, when the mode has one.
    #[serde(default)]
    pub uri: Option<String>,
}

/// Operator intent collected by the command line, before environment lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsRequest {
    pub mode: ConnectionMode,
    pub dry_run: bool,
    pub channel: Option<String>,
    pub channels: Option<Vec<String>>,
    pub vision: bool,
    pub control: bool,
    pub waypoints: bool,
    pub log_level: Option<String>,
}

impl SettingsRequest {
    pub fn new(mode: ConnectionMode) -> Self {
        Self {
            mode,
            dry_run: false,
            channel: None,
            channels: None,
            vision: false,
            control: false,
            waypoints: false,
            log_level: None,
        }
    }
}

impl Settings {
    /// Resolve settings against the process environment, falling back to
    /// `<project_root>/.env` for variables the process does not set.
    pub fn from_env(request: SettingsRequest) -> Result<Self, ConfigError> {
        let root = std::env::var(ENV_PROJECT_ROOT)
            .ok()
            .filter(|root| !root.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        Self::resolve_with_dotenv(
            request,
            |key| std::env::var(key).ok(),
            &root.join(DOTENV_FILE),
        )
    }

    /// [`Settings::resolve`] with `dotenv_path` supplying variables `env`
    /// does not define.
    pub fn resolve_with_dotenv<F>(
        request: SettingsRequest,
        env: F,
        dotenv_path: &Path,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dotenv = read_dotenv(dotenv_path)?;
        Self::resolve(request, |key| env(key).or_else(|| dotenv.get(key).cloned()))
    }

    /// Resolve settings using `env` as the variable lookup.
    pub fn resolve<F>(request: SettingsRequest, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if request.control && !request.vision {
            return Err(ConfigError::ControlRequiresVision);
        }
        let lookup = |key: &str| env(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let root = lookup(ENV_PROJECT_ROOT)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let mut run = RunSettings::rooted_at(&root);
        if let Some(dir) = lookup(ENV_LOGS_DIR) {
            run.logs_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            run.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            run.cache_dir = PathBuf::from(dir);
        }
        run.log_level = effective_log_level(request.log_level.as_deref(), &env);
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            run.log_format = format.parse().map_err(|reason| ConfigError::InvalidEnv {
                key: ENV_LOG_FORMAT,
                value: format.clone(),
                reason,
            })?;
        }

        let radio = RadioSettings {
            uri_by_channel: RADIO_CHANNEL_KEYS
                .iter()
                .map(|key| {
                    let uri = env(&format!("RADIO_CHANNEL_{key}")).unwrap_or_default();
                    ((*key).to_owned(), uri.trim().to_owned())
                })
                .collect(),
        };

        let is_swarm = request.mode.is_swarm();
        let swarm = SwarmSettings {
            enabled: is_swarm,
            channels: if is_swarm { request.channels.clone() } else { None },
        };

        let camera_index = match lookup(ENV_CAMERA_INDEX) {
            Some(raw) => Some(raw.parse::<i32>().map_err(|err| ConfigError::InvalidEnv {
                key: ENV_CAMERA_INDEX,
                value: raw.clone(),
                reason: err.to_string(),
            })?),
            None => None,
        };
        let marker_size_m = match lookup(ENV_MARKER_SIZE_M) {
            Some(raw) => raw.parse::<f64>().map_err(|err| ConfigError::InvalidEnv {
                key: ENV_MARKER_SIZE_M,
                value: raw.clone(),
                reason: err.to_string(),
            })?,
            None => default_marker_size_m(),
        };
        let show_window = env(ENV_SHOW_WINDOW)
            .map(|raw| !matches!(raw.as_str(), "0" | "false" | "False"))
            .unwrap_or_else(default_show_window);
        let vision = VisionSettings {
            enabled: request.vision,
            control_enabled: request.control,
            camera_index,
            camera_url: lookup(ENV_CAMERA_URL),
            aruco_dict_name: env(ENV_ARUCO_DICT).unwrap_or_else(default_aruco_dict),
            marker_size_m,
            show_window,
        };

        let uri = match request.mode {
            ConnectionMode::Radio => {
                let channel = request.channel.as_deref().ok_or(ConfigError::MissingChannel)?;
                let uri = radio
                    .uri_by_channel
                    .get(channel)
                    .filter(|uri| !uri.is_empty())
                    .cloned();
                if uri.is_none() && !request.dry_run {
                    return Err(ConfigError::MissingRadioUri {
                        channel: channel.to_owned(),
                    });
                }
                uri
            }
            ConnectionMode::Udp => {
                let uri = lookup(ENV_UDP_URI);
                if uri.is_none() && !request.dry_run {
                    return Err(ConfigError::MissingUdpUri);
                }
                uri
            }
            ConnectionMode::Swarm => None,
        };

        let settings = Settings {
            mode: request.mode,
            dry_run: request.dry_run,
            run,
            radio,
            swarm,
            vision,
            features: FeatureFlags {
                waypoints: request.waypoints,
            },
            uri,
        };
        settings.validate()?;
        debug!(mode = %settings.mode, dry_run = settings.dry_run, "settings resolved");
        Ok(settings)
    }

    /// Check the structural invariants every session relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vision.control_enabled && !self.vision.enabled {
            return Err(ConfigError::ControlRequiresVision);
        }
        if self.mode.is_swarm()
            && self.swarm.channels.as_ref().map_or(true, |c| c.is_empty())
        {
            return Err(ConfigError::MissingSwarmChannels);
        }
        if !self.dry_run && self.connection_target().is_none() {
            return Err(ConfigError::MissingTarget(self.mode));
        }
        Ok(())
    }

    /// Target handed to the vehicle link: the URI for single-link modes, the
    /// channel list for swarms.
    pub fn connection_target(&self) -> Option<ConnectionTarget> {
        match self.mode {
            ConnectionMode::Udp | ConnectionMode::Radio => self
                .uri
                .clone()
                .filter(|uri| !uri.is_empty())
                .map(ConnectionTarget::Uri),
            ConnectionMode::Swarm => self.swarm_channels().map(ConnectionTarget::Channels),
        }
    }

    /// Non-empty swarm channel list, if any.
    pub fn swarm_channels(&self) -> Option<Vec<String>> {
        self.swarm.channels.clone().filter(|c| !c.is_empty())
    }
}
