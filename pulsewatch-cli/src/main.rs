mod cli;
mod commands;

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

/// How long shutdown waits for blocking work, such as a pending stdin
/// read, before abandoning it.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries reports and stdin carries samples, so logs go to stderr.
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    run_to_completion(execute(cli.command))?
}

async fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Run { config, dry_run, json } => commands::run(config.as_deref(), dry_run, json).await,
        Commands::Replay {
            file,
            config,
            live_alerts,
            record,
            json,
        } => commands::replay(&file, config.as_deref(), live_alerts, record, json).await,
        Commands::Config { action } => commands::config(action),
    }
}

/// Drive `future` on a fresh runtime and shut it down without waiting on
/// blocking threads. Tokio's stdin reader parks one of those in a read
/// that only returns on the next input line.
fn run_to_completion<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    let output = runtime.block_on(future);
    debug!("Shutting down runtime");
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    Ok(output)
}
