//! ---
//! cg_section: "04-interfaces"
//! cg_subsection: "binary"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Control CLI for validating and running chaosgate evaluations."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chaosgate_common::{init_tracing, EngineConfig, LoadedEngineConfig, LogTarget};
use clap::{Parser, Subcommand};
use tracing::debug;

mod evaluate;
mod inspect;

const CONFIG_CANDIDATES: [&str; 2] = ["chaosgate.toml", "configs/chaosgate.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "chaosgate steady-state and hypothesis evaluation utility",
    long_about = None
)]
struct Cli {
    /// Engine configuration file (takes precedence over CHAOSGATE_CONFIG).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse and validate a request or experiment definition.
    Validate(inspect::ValidateCommand),
    /// Print the post-experiment evaluation window for a definition.
    Window(inspect::WindowCommand),
    /// Run an evaluation and print the verdict.
    Evaluate(evaluate::EvaluateCommand),
}

fn load_config(explicit: Option<&Path>) -> Result<LoadedEngineConfig> {
    match explicit {
        Some(path) => Ok(LoadedEngineConfig {
            config: EngineConfig::from_path(path)
                .with_context(|| format!("failed to load configuration {}", path.display()))?,
            source: Some(path.to_path_buf()),
        }),
        None => EngineConfig::load_with_source(&CONFIG_CANDIDATES),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let LoadedEngineConfig { config, source } = load_config(cli.config.as_deref())?;

    // stdout carries command output only.
    let mut logging = config.logging.clone();
    logging.target = LogTarget::Stderr;
    init_tracing("chaosgatectl", &logging)?;
    debug!(source = ?source, "configuration resolved");

    match cli.command {
        Commands::Validate(cmd) => {
            cmd.execute(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Window(cmd) => {
            cmd.execute(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Evaluate(cmd) => cmd.execute(&config).await,
    }
}
