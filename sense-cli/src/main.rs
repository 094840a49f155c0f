//! # senselink
//!
//! CLI tool for trying out SenseLink streaming.
//!
//! ## Commands
//!
//! - `demo`: Stream simulated sensors from a "watch" node to a "phone" node
//! - `loopback`: Subscribe a node to its own sensors
//! - `config`: Print the configuration as TOML
//!
//! ## Example
//!
//! ```bash
//! # Two paired nodes, accelerometer and gyroscope at 10 updates/s
//! senselink demo --sources 1,4 --interval-ms 100 --duration-ms 3000
//!
//! # Self-subscription to the heart rate sensor
//! senselink loopback --sources 21
//!
//! # Write a config file to edit
//! senselink config > senselink.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use sense_node::{Clock, SystemClock};
use sense_types::SourceTag;
use std::path::PathBuf;
use std::sync::Arc;

mod commands;

use commands::{config, demo, loopback, StreamOptions};

/// CLI tool for trying out SenseLink streaming.
#[derive(Parser, Debug)]
#[command(name = "senselink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults apply when omitted)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by the streaming commands.
#[derive(clap::Args, Debug)]
struct StreamArgs {
    /// How long to stream, in milliseconds
    #[arg(long, default_value = "3000")]
    duration_ms: u64,

    /// Update interval requested from the provider
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Source tags to request
    #[arg(long, value_delimiter = ',', default_value = "1")]
    sources: Vec<SourceTag>,

    /// Sampling rate of the simulated sensors
    #[arg(long, default_value = "50")]
    rate_hz: u32,
}

impl From<StreamArgs> for StreamOptions {
    fn from(args: StreamArgs) -> Self {
        Self {
            duration_ms: args.duration_ms,
            interval_ms: args.interval_ms,
            sources: args.sources,
            rate_hz: args.rate_hz,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a paired phone/watch demo in-process
    Demo(StreamArgs),

    /// Subscribe a node to its own sensors
    Loopback(StreamArgs),

    /// Print the configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = commands::load_config(cli.config.as_deref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Commands::Demo(args) => {
            demo::run(settings, &args.into(), clock).await?;
        }
        Commands::Loopback(args) => {
            loopback::run(settings, &args.into(), clock).await?;
        }
        Commands::Config => {
            config::run(&settings)?;
        }
    }

    Ok(())
}
