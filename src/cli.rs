// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `snapd`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "snapd",
    version,
    about = "Schedule, discover and track blockchain snapshot uploads.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `$SNAPD_CONFIG`, else `/etc/snapd/config.toml`.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SNAPD_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Human-readable logs instead of JSON lines when running the daemon.
    #[arg(long, global = true)]
    pub console: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the scheduler until SIGINT/SIGTERM (default).
    Daemon,
    /// Show uploads currently in progress.
    Status,
    /// Start an upload for one node now.
    Upload {
        /// Node name as configured under `[nodes.<name>]`.
        node: String,
    },
    /// Print version information.
    Version,
}

impl CliArgs {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Daemon)
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
