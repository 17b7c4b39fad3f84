//! Host resource anomaly watcher CLI
//!
//! Samples OS resource counters, runs statistical anomaly detection
//! over them, and renders the results as tables, JSON, or text.

mod commands;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use opswatch_engine::EngineConfig;
use tracing_subscriber::EnvFilter;

use commands::Signal;

/// Host resource anomaly watcher
#[derive(Parser)]
#[command(name = "opswatch")]
#[command(author, version, about = "Statistical anomaly detection over host resource counters", long_about = None)]
pub struct Cli {
    /// Path to a TOML config file (defaults to ./opswatch.toml if present)
    #[arg(long, short, env = "OPSWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose logging on stderr
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sample a signal and print the raw readings
    Collect {
        /// Signal to sample
        #[arg(long, short, value_enum)]
        signal: Signal,

        /// Number of sampling ticks
        #[arg(long, short = 'n', default_value_t = 10)]
        count: usize,

        /// Seconds between ticks
        #[arg(long, short, default_value_t = 1)]
        interval: u64,
    },

    /// Run the configured detectors over live or recorded samples
    Detect {
        /// Signal to analyze
        #[arg(long, short, value_enum)]
        signal: Signal,

        /// JSON file with a recorded sample array instead of live collection
        #[arg(long)]
        input: Option<PathBuf>,

        /// Number of live sampling ticks
        #[arg(long, short = 'n', default_value_t = 30)]
        count: usize,

        /// Seconds between live ticks
        #[arg(long, short, default_value_t = 1)]
        interval: u64,
    },

    /// Continuously monitor all signals until Ctrl-C
    Monitor {
        /// Override the per-signal sampling intervals, in seconds
        #[arg(long, short)]
        interval: Option<u64>,

        /// Persist detected events as alerts under this directory
        #[arg(long)]
        alert_dir: Option<PathBuf>,
    },

    /// Inspect and manage persisted alerts
    #[command(subcommand)]
    Alerts(AlertCommands),

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum AlertCommands {
    /// List recorded alerts
    List {
        /// Alert storage directory
        #[arg(long, default_value = commands::alerts::DEFAULT_ALERT_DIR)]
        dir: PathBuf,

        /// Only alerts in this lifecycle state
        #[arg(long, value_enum)]
        status: Option<commands::alerts::StatusFilter>,

        /// Only alerts of this severity
        #[arg(long, value_enum)]
        severity: Option<commands::alerts::SeverityFilter>,
    },

    /// Acknowledge the oldest firing alert of a kind
    Ack {
        /// Signal kind, e.g. high_cpu
        kind: String,

        /// Who acknowledged it
        #[arg(long, default_value = "operator")]
        by: String,

        /// Alert storage directory
        #[arg(long, default_value = commands::alerts::DEFAULT_ALERT_DIR)]
        dir: PathBuf,
    },

    /// Resolve the oldest open alert of a kind
    Resolve {
        /// Signal kind, e.g. high_cpu
        kind: String,

        /// Alert storage directory
        #[arg(long, default_value = commands::alerts::DEFAULT_ALERT_DIR)]
        dir: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Collect {
            signal,
            count,
            interval,
        } => {
            commands::collect::run(
                signal,
                count,
                Duration::from_secs(interval),
                &config,
                cli.format,
            )
            .await?;
        }
        Commands::Detect {
            signal,
            input,
            count,
            interval,
        } => {
            commands::detect::run(
                signal,
                input.as_deref(),
                count,
                Duration::from_secs(interval),
                &config,
                cli.format,
            )
            .await?;
        }
        Commands::Monitor {
            interval,
            alert_dir,
        } => {
            commands::monitor::run(interval, alert_dir.as_deref(), &config, cli.format).await?;
        }
        Commands::Alerts(command) => match command {
            AlertCommands::List {
                dir,
                status,
                severity,
            } => {
                commands::alerts::list(&dir, status, severity, cli.format)?;
            }
            AlertCommands::Ack { kind, by, dir } => {
                commands::alerts::acknowledge(&dir, &kind, &by)?;
            }
            AlertCommands::Resolve { kind, dir } => {
                commands::alerts::resolve(&dir, &kind)?;
            }
        },
        Commands::Config(ConfigCommands::Show) => {
            commands::show_config::run(&config, cli.format)?;
        }
    }

    Ok(())
}
