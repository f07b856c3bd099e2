//! ---
//! nest_section: "01-core-functionality"
//! nest_subsection: "binary"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Command-line surface of the nest-fly launcher."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
use clap::{ArgAction, Args, Parser, Subcommand};
use nest_common::config::{ConnectionMode, SettingsRequest};

/// Trailing words older launch scripts pass instead of flags.
pub const LEGACY_TOKENS: [&str; 4] = ["vision", "control", "waypoint", "waypoints"];

#[derive(Debug, Parser)]
#[command(
    name = "nest-fly",
    author,
    disable_version_flag = true,
    about = "NEST flight session launcher",
    long_about = None
)]
pub struct Cli {
    #[arg(long, global = true, help = "Run without hardware or camera")]
    pub dry_run: bool,

    #[arg(
        long,
        global = true,
        value_name = "LEVEL",
        help = "Override log level (e.g. INFO, DEBUG)"
    )]
    pub log_level: Option<String>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    pub version: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct FeatureArgs {
    #[arg(long, help = "Enable the vision subsystem")]
    pub vision: bool,

    #[arg(long, help = "Enable click-to-go (requires --vision)")]
    pub control: bool,

    #[arg(long, help = "Enable waypoint logging")]
    pub waypoints: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Connect via UDP (URI from CF_URI_UDP)")]
    Udp {
        #[command(flatten)]
        features: FeatureArgs,
        #[arg(value_name = "EXTRAS", help = "Legacy tokens: vision control waypoint")]
        extras: Vec<String>,
    },
    #[command(about = "Connect via radio using a channel key (e.g. 7, 8, 9)")]
    Radio {
        #[arg(value_name = "CHANNEL", help = "Radio channel key")]
        channel: String,
        #[command(flatten)]
        features: FeatureArgs,
        #[arg(value_name = "EXTRAS", help = "Legacy tokens: vision control waypoint")]
        extras: Vec<String>,
    },
    #[command(about = "Connect to a swarm over several radio channels")]
    Swarm {
        #[arg(
            value_name = "CHANNEL",
            required = true,
            num_args = 1..,
            help = "Radio channel keys, optionally followed by legacy tokens"
        )]
        channels: Vec<String>,
        #[command(flatten)]
        features: FeatureArgs,
    },
}

pub fn is_legacy_token(token: &str) -> bool {
    LEGACY_TOKENS.contains(&token.to_lowercase().as_str())
}

/// Fold legacy trailing tokens into `features`. Unknown tokens are ignored.
pub fn merge_legacy_tokens<'a>(
    mut features: FeatureArgs,
    tokens: impl IntoIterator<Item = &'a str>,
) -> FeatureArgs {
    for token in tokens {
        match token.to_lowercase().as_str() {
            "vision" => features.vision = true,
            "control" => features.control = true,
            "waypoint" | "waypoints" => features.waypoints = true,
            _ => {}
        }
    }
    features
}

impl Cli {
    /// Settings request for the chosen subcommand, or `None` without one.
    pub fn into_request(self) -> Option<SettingsRequest> {
        let (mut request, features) = match self.command? {
            Commands::Udp { features, extras } => (
                SettingsRequest::new(ConnectionMode::Udp),
                merge_legacy_tokens(features, extras.iter().map(String::as_str)),
            ),
            Commands::Radio {
                channel,
                features,
                extras,
            } => (
                SettingsRequest {
                    channel: Some(channel),
                    ..SettingsRequest::new(ConnectionMode::Radio)
                },
                merge_legacy_tokens(features, extras.iter().map(String::as_str)),
            ),
            Commands::Swarm { channels, features } => {
                let (tokens, channels): (Vec<String>, Vec<String>) =
                    channels.into_iter().partition(|token| is_legacy_token(token));
                (
                    SettingsRequest {
                        channels: Some(channels),
                        ..SettingsRequest::new(ConnectionMode::Swarm)
                    },
                    merge_legacy_tokens(features, tokens.iter().map(String::as_str)),
                )
            }
        };
        request.dry_run = self.dry_run;
        request.log_level = self.log_level;
        request.vision = features.vision;
        request.control = features.control;
        request.waypoints = features.waypoints;
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn request(args: &[&str]) -> SettingsRequest {
        Cli::try_parse_from(args)
            .expect("arguments parse")
            .into_request()
            .expect("subcommand present")
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn radio_with_flags_and_global_options() {
        let request = request(&[
            "nest-fly",
            "--dry-run",
            "--log-level",
            "debug",
            "radio",
            "8",
            "--vision",
            "--control",
        ]);
        assert_eq!(request.mode, ConnectionMode::Radio);
        assert_eq!(request.channel.as_deref(), Some("8"));
        assert!(request.dry_run);
        assert_eq!(request.log_level.as_deref(), Some("debug"));
        assert!(request.vision && request.control && !request.waypoints);
    }

    #[test]
    fn legacy_tokens_enable_features_and_unknown_are_ignored() {
        let request = request(&["nest-fly", "udp", "Vision", "waypoint", "banana"]);
        assert_eq!(request.mode, ConnectionMode::Udp);
        assert!(request.vision);
        assert!(request.waypoints);
        assert!(!request.control);
    }

    #[test]
    fn swarm_separates_channels_from_legacy_tokens() {
        let request = request(&["nest-fly", "swarm", "7", "8", "9", "vision", "--dry-run"]);
        assert_eq!(
            request.channels,
            Some(vec!["7".to_owned(), "8".to_owned(), "9".to_owned()])
        );
        assert!(request.vision);
        assert!(request.dry_run);
    }

    #[test]
    fn swarm_requires_a_channel() {
        assert!(Cli::try_parse_from(["nest-fly", "swarm"]).is_err());
    }

    #[test]
    fn version_flag_needs_no_subcommand() {
        let cli = Cli::try_parse_from(["nest-fly", "-V"]).expect("parse");
        assert!(cli.version);
        assert!(cli.into_request().is_none());
    }
}
