//! Transport adapter: addressing, loopback and connected-node caching.
//!
//! Every send is either fire-and-forget ([`Messenger::send`], which logs
//! failures) or awaited ([`Messenger::send_with_result`], used where a
//! failure must change state). Messages addressed to this device never reach
//! the transport: they are dispatched to the local router on a fresh task.

use std::sync::{Arc, RwLock, Weak};

use sense_types::{DeviceId, Message, Node};

use crate::locks;
use crate::router::MessageRouter;
use crate::transport::{Transport, TransportError};

/// Sends messages to devices by id.
///
/// Cheap to clone; clones share the transport and the node cache.
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<MessengerInner>,
}

struct MessengerInner {
    transport: Arc<dyn Transport>,
    router: Weak<MessageRouter>,
    local_node: RwLock<Option<Node>>,
    connected_nodes: RwLock<Vec<Node>>,
}

impl Messenger {
    /// Create a messenger over `transport`, looping local messages back to
    /// `router`.
    pub fn new(transport: Arc<dyn Transport>, router: &Arc<MessageRouter>) -> Self {
        Self {
            inner: Arc::new(MessengerInner {
                transport,
                router: Arc::downgrade(router),
                local_node: RwLock::new(None),
                connected_nodes: RwLock::new(Vec::new()),
            }),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    // ===== Connection =====

    /// Bring the transport up. Returns `false` if it was already connected.
    pub async fn connect(&self) -> Result<bool, TransportError> {
        if self.inner.transport.is_connected() {
            return Ok(false);
        }
        self.inner.transport.connect().await?;
        tracing::info!("Transport connected");

        if let Err(e) = self.refresh_local_node().await {
            tracing::warn!("Could not read local node: {}", e);
        }
        if let Err(e) = self.refresh_connected_nodes().await {
            tracing::warn!("Could not list connected nodes: {}", e);
        }
        Ok(true)
    }

    /// Take the transport down and forget cached nodes. Returns `false` if
    /// it was not connected.
    pub async fn disconnect(&self) -> Result<bool, TransportError> {
        if !self.inner.transport.is_connected() {
            return Ok(false);
        }
        self.inner.transport.close().await?;
        locks::write(&self.inner.connected_nodes).clear();
        tracing::info!("Transport disconnected");
        Ok(true)
    }

    /// Check if the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    // ===== Node cache =====

    /// Re-read the local node from the transport.
    pub async fn refresh_local_node(&self) -> Result<Node, TransportError> {
        let node = self.inner.transport.local_node().await?;
        tracing::debug!("Local node is {} ({})", node.id, node.display_name);
        *locks::write(&self.inner.local_node) = Some(node.clone());
        Ok(node)
    }

    /// Re-read the connected nodes from the transport.
    pub async fn refresh_connected_nodes(&self) -> Result<Vec<Node>, TransportError> {
        let nodes = self.inner.transport.connected_nodes().await?;
        tracing::debug!("{} connected node(s)", nodes.len());
        *locks::write(&self.inner.connected_nodes) = nodes.clone();
        Ok(nodes)
    }

    /// The local node's real id, once known.
    pub fn local_node_id(&self) -> Option<DeviceId> {
        locks::read(&self.inner.local_node)
            .as_ref()
            .map(|node| node.id.clone())
    }

    /// Connected nodes as of the last refresh.
    pub fn last_connected_nodes(&self) -> Vec<Node> {
        locks::read(&self.inner.connected_nodes).clone()
    }

    /// Nearby connected nodes as of the last refresh.
    pub fn last_connected_nearby_nodes(&self) -> Vec<Node> {
        locks::read(&self.inner.connected_nodes)
            .iter()
            .filter(|node| node.nearby)
            .cloned()
            .collect()
    }

    /// Look up a cached node (the local node included).
    pub fn node_by_id(&self, id: &DeviceId) -> Option<Node> {
        if let Some(local) = locks::read(&self.inner.local_node).as_ref() {
            if &local.id == id {
                return Some(local.clone());
            }
        }
        locks::read(&self.inner.connected_nodes)
            .iter()
            .find(|node| &node.id == id)
            .cloned()
    }

    /// Display name of a node, falling back to its id.
    pub fn node_name(&self, id: &DeviceId) -> String {
        self.node_by_id(id)
            .map(|node| node.display_name)
            .unwrap_or_else(|| id.to_string())
    }

    /// Whether `id` addresses this device (sentinel or real id).
    pub fn is_local(&self, id: &DeviceId) -> bool {
        id.is_local_sentinel()
            || locks::read(&self.inner.local_node)
                .as_ref()
                .is_some_and(|node| &node.id == id)
    }

    // ===== Sending =====

    /// Fire-and-forget send. Failures are logged.
    pub fn send(&self, path: &str, payload: Vec<u8>, device_id: &DeviceId) {
        let messenger = self.clone();
        let path = path.to_string();
        let device_id = device_id.clone();
        tokio::spawn(async move {
            if let Err(e) = messenger.send_with_result(&path, payload, &device_id).await {
                tracing::warn!("Send {} to {} failed: {}", path, device_id, e);
            }
        });
    }

    /// Send and report the outcome.
    pub async fn send_with_result(
        &self,
        path: &str,
        payload: Vec<u8>,
        device_id: &DeviceId,
    ) -> Result<(), TransportError> {
        if device_id.is_missing() {
            return Err(TransportError::MissingDestination);
        }

        if self.is_local(device_id) {
            self.loopback(path, payload);
            return Ok(());
        }

        if !self.inner.transport.is_connected() {
            return Err(TransportError::NotConnected);
        }

        if self.node_by_id(device_id).is_none() {
            self.refresh_connected_nodes().await?;
            if self.node_by_id(device_id).is_none() {
                return Err(TransportError::UnknownDevice(device_id.clone()));
            }
        }

        tracing::trace!("Sending {} ({} bytes) to {}", path, payload.len(), device_id);
        self.inner.transport.send(device_id, path, &payload).await
    }

    /// Send to every nearby node, refreshing the node list first.
    pub fn send_to_nearby(&self, path: &str, payload: Vec<u8>) {
        let messenger = self.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            if let Err(e) = messenger.refresh_connected_nodes().await {
                tracing::warn!("Could not refresh nodes before {}: {}", path, e);
            }
            for node in messenger.last_connected_nearby_nodes() {
                if let Err(e) = messenger
                    .send_with_result(&path, payload.clone(), &node.id)
                    .await
                {
                    tracing::warn!("Send {} to nearby {} failed: {}", path, node.id, e);
                }
            }
        });
    }

    fn loopback(&self, path: &str, payload: Vec<u8>) {
        let Some(router) = self.inner.router.upgrade() else {
            tracing::debug!("Router gone, dropping local {}", path);
            return;
        };
        let source = self.local_node_id().unwrap_or_else(DeviceId::local);
        let message = Message::new(path, source, payload);
        tokio::spawn(async move {
            router.dispatch(&message);
        });
    }
}
