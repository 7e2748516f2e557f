//! Command line and logging setup

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// BFT Connect command-line interface
#[derive(Parser, Debug)]
#[command(name = "bft-connect")]
#[command(about = "Send firmware and files to a Marlin printer over binary file transfer", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log level: error, warn, info, debug or trace
    #[arg(short, long, value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Prefix log lines with timestamps
    #[arg(long, default_value = "true")]
    pub timestamps: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show configuration and transfer settings
    ShowConfig,

    /// Toggle reconnecting to the printer after a successful transfer
    ToggleReconnect,

    /// Toggle sending post-transfer commands
    TogglePostTransfer,

    /// Set when uploaded files are deleted (never, only-on-success, only-on-fail, always)
    SetDeletePolicy { policy: String },

    /// Set post-transfer commands as a `;`-separated line
    SetPostCommands { line: String },

    /// Set the delay before reconnecting, in milliseconds
    SetReconnectDelay { delay_ms: u64 },

    /// Upload a file and transfer it to the printer
    Send {
        /// File to send
        file: PathBuf,

        /// JSON lines of server notifications to replay instead of the
        /// built-in run
        #[arg(long, value_name = "FILE")]
        events: Option<PathBuf>,

        /// Make the built-in run end in failure
        #[arg(long)]
        fail: bool,

        /// Pretend the printer is running a job
        #[arg(long)]
        printing: bool,

        /// Answer the disconnect prompt with Continue
        #[arg(long, conflicts_with = "assume_no")]
        assume_yes: bool,

        /// Answer the disconnect prompt with Cancel
        #[arg(long)]
        assume_no: bool,

        /// Seconds without progress before asking the server for its phase
        #[arg(long, default_value = "30")]
        idle_timeout: u64,
    },
}

/// Install the global subscriber, writing to stderr
pub fn init_logging(cli: &Cli) -> Result<()> {
    let level: Level = cli
        .log_level
        .parse()
        .with_context(|| format!("Unknown log level '{}'", cli.log_level))?;

    // RUST_LOG wins over --log-level
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level.as_str()).context("Bad log filter")?,
    };

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        level = %level,
        json = cli.json_logs,
        "bft-connect {} starting",
        env!("CARGO_PKG_VERSION")
    );

    Ok(())
}
