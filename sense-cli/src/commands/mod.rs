//! CLI command implementations.

pub mod config;
pub mod demo;
pub mod loopback;

use anyhow::{Context, Result};
use sense_node::{Config, StreamUpdate};
use sense_types::SourceTag;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

/// What to stream and for how long.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// How long to collect updates.
    pub duration_ms: u64,
    /// Requested update interval; the config default when `None`.
    pub interval_ms: Option<u64>,
    /// Source tags to request.
    pub sources: Vec<SourceTag>,
    /// Sampling rate of the simulated sensors.
    pub rate_hz: u32,
}

/// Totals printed at the end of a streaming command.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Updates received.
    pub updates: usize,
    /// Samples across all updates.
    pub samples: usize,
}

/// Load `path`, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Print updates until `duration` has passed.
pub async fn collect_updates(
    updates: &mut broadcast::Receiver<StreamUpdate>,
    duration: Duration,
) -> StreamSummary {
    let mut summary = StreamSummary::default();
    let deadline = tokio::time::Instant::now() + duration;

    loop {
        match tokio::time::timeout_at(deadline, updates.recv()).await {
            Ok(Ok(update)) => {
                summary.updates += 1;
                summary.samples += update.samples.len();
                print_update(&update);
            }
            Ok(Err(RecvError::Lagged(skipped))) => {
                tracing::warn!("Display fell behind, skipped {} update(s)", skipped);
            }
            Ok(Err(RecvError::Closed)) | Err(_) => break,
        }
    }

    summary
}

fn print_update(update: &StreamUpdate) {
    let newest = update
        .samples
        .last()
        .map(|s| format_values(s.values()))
        .unwrap_or_default();
    println!(
        "  [{}..{}] {} {} ({}): {} sample(s), latest {}",
        update.start_timestamp,
        update.end_timestamp,
        update.device,
        update.source,
        update.source_type,
        update.samples.len(),
        newest
    );
}

fn format_values(values: &[f32]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{:.2}", v)).collect();
    format!("[{}]", parts.join(", "))
}

/// Print the end-of-run totals.
pub fn print_summary(summary: &StreamSummary) {
    println!();
    println!(
        "Received {} update(s), {} sample(s)",
        summary.updates, summary.samples
    );
}
