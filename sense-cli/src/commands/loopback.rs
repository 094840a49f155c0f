//! Self-subscription: one node streams its own sensors to itself.

use anyhow::{Context, Result};
use sense_node::{Clock, Config, LinkNode, MockTransport, SimulatedSensorSource};
use sense_types::{DeviceId, Node};
use std::sync::Arc;
use std::time::Duration;

use super::{collect_updates, print_summary, StreamOptions, StreamSummary};

/// Run the loopback command.
pub async fn run(
    settings: Config,
    options: &StreamOptions,
    clock: Arc<dyn Clock>,
) -> Result<StreamSummary> {
    let transport = MockTransport::new(Node::nearby("self", &settings.node.label));
    let node = LinkNode::new(
        settings,
        Arc::new(transport),
        Arc::new(SimulatedSensorSource::new(options.rate_hz, Arc::clone(&clock))),
        clock,
    );
    node.start().await.context("Failed to start node")?;

    println!("=== senselink loopback ===");
    println!();

    let mut updates = node.collector().updates();
    let request = node
        .requester()
        .request(&DeviceId::local(), options.sources.iter().copied(), options.interval_ms)
        .context("Failed to request stream")?;
    println!(
        "Streaming {:?} to this device every {}ms for {}ms",
        request.sources, request.update_interval_ms, options.duration_ms
    );

    let summary = collect_updates(&mut updates, Duration::from_millis(options.duration_ms)).await;

    node.shutdown().await.context("Failed to stop node")?;
    print_summary(&summary);
    Ok(summary)
}
