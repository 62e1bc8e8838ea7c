//! stowage command-line entry point.
//!
//! Usage: `stowage [--config <file>] [--force] <push|pull>`

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let direction = cli.command.direction();
    let path = config::config_path(cli.config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        %direction,
        config = %path.display(),
        "starting stowage"
    );
    let mut config = config::Config::load(&path)?;
    if cli.force {
        config.sync.force = true;
    }

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(app::run(config, direction))?;

    tracing::info!(
        transferred = summary.transferred,
        skipped = summary.skipped,
        unverifiable = summary.unverifiable,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "done"
    );
    if summary.failed > 0 || summary.cancelled > 0 {
        std::process::exit(1);
    }
    Ok(())
}
