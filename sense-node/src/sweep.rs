//! Background reachability sweep.
//!
//! Periodically pings every nearby node so reachability stays current
//! without inbound traffic.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::config::ReachabilityConfig;
use crate::reachability::ReachabilityTracker;

/// Spawn the sweep task.
///
/// Returns a handle that can be used to abort the task. The task exits at
/// once when the sweep is disabled.
pub fn spawn_reachability_sweep(
    tracker: Arc<ReachabilityTracker>,
    config: ReachabilityConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !config.sweep_enabled {
            tracing::info!("Reachability sweep disabled");
            return;
        }

        let period = config.sweep_interval();
        tracing::info!("Reachability sweep started (interval: {:?})", period);
        let mut timer = interval(period);

        loop {
            timer.tick().await;

            if let Err(e) = tracker.messenger().refresh_connected_nodes().await {
                tracing::debug!("Sweep: could not refresh nodes: {}", e);
            }
            let checks = tracker.check_reachabilities(None);
            tracing::debug!("Sweep: pinging {} node(s)", checks.len());
        }
    })
}
