//! ---
//! nest_section: "01-core-functionality"
//! nest_subsection: "binary"
//! nest_type: "source"
//! nest_scope: "code"
//! nest_description: "Binary entrypoint for the nest-fly launcher."
//! nest_version: "v0.0.0-prealpha"
//! nest_owner: "tbd"
//! ---
mod cli;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use nest_common::config::Settings;
use nest_core::SessionRunner;
use nest_sim::SimFactory;
use tracing::error;

use crate::cli::Cli;

fn version_line() -> String {
    format!(
        "nest-fly {} (git {}, built {}, target {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown"),
    )
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("nest-fly: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<u8> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", version_line());
        return Ok(0);
    }
    let Some(request) = cli.into_request() else {
        Cli::command()
            .error(ErrorKind::MissingSubcommand, "a connection mode is required")
            .exit();
    };

    let settings = Settings::from_env(request).context("invalid flight configuration")?;
    let factory = SimFactory::new(settings.run.data_dir.clone());
    let outcome = SessionRunner::new(factory).run(&settings).map_err(|err| {
        error!(error = %err, "session aborted before start-up");
        err
    })?;
    Ok(u8::try_from(outcome.exit_code()).unwrap_or(1))
}
