//! A paired-device node.
//!
//! [`LinkNode`] wires the router, messenger, reachability tracker, sensor
//! manager and both sides of the streaming protocol around one transport.
//!
//! # Example
//!
//! ```ignore
//! use senselink_node::{Config, LinkNode, MockTransport, SimulatedSensorSource, SystemClock};
//!
//! let node = LinkNode::new(Config::default(), transport, sensors, Arc::new(SystemClock));
//! node.start().await?;
//! node.requester().request(&watch_id, [1], None)?;
//! let mut updates = node.collector().updates();
//! ```

use std::sync::{Arc, Mutex};

use sense_types::{paths, DeviceId, Message, NodeStatus};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::NodeError;
use crate::handlers::ProviderHandlers;
use crate::locks;
use crate::messenger::Messenger;
use crate::reachability::ReachabilityTracker;
use crate::requester::{ResponseCollector, StreamRequester};
use crate::router::MessageRouter;
use crate::sensors::{SensorDataManager, SensorSource};
use crate::subscription::SubscriptionService;
use crate::sweep::spawn_reachability_sweep;
use crate::transport::{Transport, TransportError};

/// Tasks owned by a started node.
struct Running {
    stop: oneshot::Sender<()>,
    pump: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

/// One device taking part in the link.
pub struct LinkNode {
    config: Config,
    router: Arc<MessageRouter>,
    messenger: Messenger,
    sensors: Arc<SensorDataManager>,
    tracker: Arc<ReachabilityTracker>,
    subscriptions: Arc<SubscriptionService>,
    provider: Arc<ProviderHandlers>,
    requester: StreamRequester,
    collector: Arc<ResponseCollector>,
    running: Mutex<Option<Running>>,
}

impl LinkNode {
    /// Assemble a node. Nothing touches the transport until [`start`](Self::start).
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        source: Arc<dyn SensorSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let label = config.node.label.clone();
        let router = Arc::new(MessageRouter::new());
        let messenger = Messenger::new(transport, &router);
        let sensors = Arc::new(SensorDataManager::new(source, config.streaming.capacity()));
        let tracker = Arc::new(ReachabilityTracker::new(
            messenger.clone(),
            Arc::clone(&clock),
            config.reachability.clone(),
            &label,
        ));
        let subscriptions = Arc::new(SubscriptionService::new(
            messenger.clone(),
            Arc::clone(&sensors),
            Arc::clone(&clock),
            config.streaming.max_consecutive_failures,
        ));
        let provider = Arc::new(ProviderHandlers::new(
            &label,
            messenger.clone(),
            Arc::clone(&sensors),
            Arc::clone(&subscriptions),
            Arc::clone(&tracker),
            Arc::clone(&clock),
        ));
        let requester = StreamRequester::new(
            messenger.clone(),
            clock,
            config.streaming.default_update_interval_ms,
        );
        let collector = Arc::new(ResponseCollector::new(config.streaming.capacity()));

        Self {
            config,
            router,
            messenger,
            sensors,
            tracker,
            subscriptions,
            provider,
            requester,
            collector,
            running: Mutex::new(None),
        }
    }

    /// Connect, register every handler and start the receive pump and the
    /// reachability sweep.
    pub async fn start(&self) -> Result<(), NodeError> {
        if locks::lock(&self.running).is_some() {
            return Err(NodeError::AlreadyStarted);
        }

        self.messenger.connect().await?;

        self.tracker.register_message_handlers(&self.router);
        self.provider.register(&self.router);
        self.collector.register(&self.router);

        let (stop, stop_rx) = oneshot::channel();
        let pump = spawn_pump(
            Arc::clone(self.messenger.transport()),
            Arc::clone(&self.router),
            stop_rx,
        );
        let sweep = spawn_reachability_sweep(
            Arc::clone(&self.tracker),
            self.config.reachability.clone(),
        );

        let mut running = locks::lock(&self.running);
        if running.is_some() {
            pump.abort();
            sweep.abort();
            return Err(NodeError::AlreadyStarted);
        }
        *running = Some(Running { stop, pump, sweep });
        tracing::info!(
            "Node {} started as {}",
            self.config.node.label,
            self.local_id()
        );
        Ok(())
    }

    /// Whether [`start`](Self::start) succeeded and no shutdown followed.
    pub fn is_started(&self) -> bool {
        locks::lock(&self.running).is_some()
    }

    /// Announce `/closing` to nearby nodes, stop streaming in both
    /// directions, stop the background tasks and disconnect.
    ///
    /// Returns `false` if the node was not started.
    pub async fn shutdown(&self) -> Result<bool, NodeError> {
        let Some(running) = locks::lock(&self.running).take() else {
            return Ok(false);
        };
        tracing::info!("Node {} shutting down", self.config.node.label);

        self.announce_closing().await;
        self.subscriptions.stop_all();
        let cancelled = self.requester.close().await;
        if cancelled > 0 {
            tracing::debug!("Cancelled {} outgoing stream(s)", cancelled);
        }

        drop(running.stop);
        if let Err(e) = running.pump.await {
            if !e.is_cancelled() {
                tracing::warn!("Receive pump ended abnormally: {}", e);
            }
        }
        running.sweep.abort();

        self.tracker.unregister_message_handlers(&self.router);
        self.provider.unregister(&self.router);
        self.collector.unregister(&self.router);
        self.router.clear();

        self.messenger.disconnect().await?;
        Ok(true)
    }

    async fn announce_closing(&self) {
        if let Err(e) = self.messenger.refresh_connected_nodes().await {
            tracing::debug!("Could not refresh nodes before closing: {}", e);
        }
        let label = self.config.node.label.as_bytes().to_vec();
        for node in self.messenger.last_connected_nearby_nodes() {
            if let Err(e) = self
                .messenger
                .send_with_result(paths::CLOSING, label.clone(), &node.id)
                .await
            {
                tracing::debug!("Could not tell {} we are closing: {}", node.id, e);
            }
        }
    }

    /// Ping `device`; the task resolves to whether it answered in time.
    pub fn ping(&self, device: &DeviceId) -> JoinHandle<bool> {
        self.tracker.check_reachability(device, None)
    }

    /// This node's status.
    pub fn status(&self) -> NodeStatus {
        self.provider.status()
    }

    /// The transport's id for this device, or the local sentinel before
    /// connecting.
    pub fn local_id(&self) -> DeviceId {
        self.messenger.local_node_id().unwrap_or_else(DeviceId::local)
    }

    /// Node configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Inbound message router.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Transport adapter.
    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// Reachability tracker.
    pub fn tracker(&self) -> &Arc<ReachabilityTracker> {
        &self.tracker
    }

    /// Local sensor buffers.
    pub fn sensors(&self) -> &Arc<SensorDataManager> {
        &self.sensors
    }

    /// Streams this node serves.
    pub fn subscriptions(&self) -> &Arc<SubscriptionService> {
        &self.subscriptions
    }

    /// Streams this node requests.
    pub fn requester(&self) -> &StreamRequester {
        &self.requester
    }

    /// Data and discovery replies received from other nodes.
    pub fn collector(&self) -> &Arc<ResponseCollector> {
        &self.collector
    }
}

impl Drop for LinkNode {
    fn drop(&mut self) {
        if let Some(running) = locks::lock(&self.running).take() {
            running.pump.abort();
            running.sweep.abort();
        }
    }
}

/// Feed inbound messages to the router until stopped or the transport
/// closes.
fn spawn_pump(
    transport: Arc<dyn Transport>,
    router: Arc<MessageRouter>,
    mut stop: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let message: Message = tokio::select! {
                biased;
                _ = &mut stop => break,
                received = transport.recv() => match received {
                    Ok(message) => message,
                    Err(TransportError::ConnectionClosed | TransportError::NotConnected) => {
                        tracing::info!("Transport closed, receive pump stopping");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Receive failed: {}", e);
                        continue;
                    }
                },
            };
            tracing::trace!("Received {:?}", message);
            router.dispatch(&message);
        }
    })
}
