// src/main.rs

use snapd::cli::{self, Command};
use snapd::logging::{self, LogFormat};
use snapd::run;

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("snapd error: {err:?}");
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    let format = match args.command() {
        Command::Daemon if !args.console => LogFormat::Json,
        _ => LogFormat::Console,
    };
    logging::init_logging(args.log_level, format)?;
    run(args).await
}
