// src/lib.rs

pub mod agent;
pub mod cli;
pub mod commands;
pub mod config;
pub mod errors;
pub mod exec;
pub mod jobs;
pub mod logging;
pub mod notification;
pub mod protocol;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod upload;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::Agent;
use crate::cli::{CliArgs, Command};
use crate::config::{default_config_path, load_and_validate};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and registry checks
/// - the SQLite store and the command runner
/// - the requested subcommand
pub async fn run(args: CliArgs) -> Result<()> {
    let command = args.command();
    if command == Command::Version {
        println!("snapd {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    debug!(path = %config_path.display(), "loading config");
    let cfg = load_and_validate(&config_path)?;
    info!(
        path = %config_path.display(),
        nodes = cfg.nodes.len(),
        "config loaded"
    );

    let agent = Agent::bootstrap(cfg).await?;

    match command {
        Command::Daemon => agent.run_daemon().await?,
        Command::Status => {
            let nodes = agent.config().nodes.keys().map(String::as_str);
            let report = commands::status_report(agent.store().as_ref(), nodes, Utc::now()).await?;
            print!("{report}");
        }
        Command::Upload { node } => {
            let cancel = CancellationToken::new();
            let id = commands::manual_upload(&agent, &node, &cancel).await?;
            println!("Upload started for {node} (id {id})");
        }
        Command::Version => {}
    }

    Ok(())
}
