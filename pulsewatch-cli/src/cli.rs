use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "pulsewatch",
    about = "Real-time heart-rate monitor with rate-limited SMS and voice alerts",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Monitor samples read from stdin, one BPM value or hex data page per line
    Run {
        /// Configuration file (defaults to the user config directory)
        #[arg(short, long, env = "PULSEWATCH_CONFIG")]
        config: Option<PathBuf>,

        /// Log alerts instead of sending them
        #[arg(long)]
        dry_run: bool,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Feed a recorded sample log back through the engine
    Replay {
        /// CSV log written by a previous run
        #[arg(index = 1)]
        file: PathBuf,

        #[arg(short, long, env = "PULSEWATCH_CONFIG")]
        config: Option<PathBuf>,

        /// Send alerts through the configured notifier instead of logging them
        #[arg(long)]
        live_alerts: bool,

        /// Also append replayed samples to the configured sample log
        #[arg(long)]
        record: bool,

        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a default configuration file
    Init {
        #[arg(short, long, env = "PULSEWATCH_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration
    Show {
        #[arg(short, long, env = "PULSEWATCH_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Check the configuration for errors
    Validate {
        #[arg(short, long, env = "PULSEWATCH_CONFIG")]
        config: Option<PathBuf>,
    },
}
