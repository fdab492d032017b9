//! Promote: release promotion CLI.
//!
//! # Usage
//!
//! ```text
//! promote run --tag <TAG> --env <pre-prod|prod> [--commit SHA]
//!             [--skip-merge|--no-skip-merge] [--delete-branch] [--finalize]
//!             [--summary PATH] [--json]
//! promote plan --tag <TAG> --env <ENV>
//! promote config check
//! ```
//!
//! `--config` (or `PROMOTE_CONFIG`) and `--log-json` apply to every command.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigCommand, plan::PlanArgs, run::RunArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "promote",
    version,
    about = "Promote a release tag through descriptor update, checks, merge and rollout",
    long_about = None,
)]
struct Cli {
    /// Configuration file (default: ~/.promote/config.yaml).
    #[arg(long, global = true, env = "PROMOTE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Promote a tag: commit the descriptor, wait for checks, merge, roll out.
    Run(RunArgs),

    /// Show what a promotion would change without touching anything.
    Plan(PlanArgs),

    /// Inspect the configuration file.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    promote_runtime::init_tracing(cli.log_json);
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run(args) => args.run(config),
        Commands::Plan(args) => args.run(config).map(|()| ExitCode::SUCCESS),
        Commands::Config { command } => {
            commands::config::run(command, config).map(|()| ExitCode::SUCCESS)
        }
    }
}
