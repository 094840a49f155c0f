//! Mock transport for testing.
//!
//! Captures sent messages, queues inbound ones and can be paired with a
//! second mock so that two nodes talk to each other in-process.

use super::{Transport, TransportError};
use async_trait::async_trait;
use sense_types::{DeviceId, Message, Node};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;

/// A message captured by [`MockTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Destination device.
    pub node_id: DeviceId,
    /// Message path.
    pub path: String,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

/// Mock transport for testing.
///
/// Clones share state. Sends to a paired peer are delivered to the peer's
/// inbound queue with this mock's local id as the source.
#[derive(Debug, Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<MockTransportInner>,
    inbound_ready: Notify,
}

#[derive(Debug)]
struct MockTransportInner {
    connected: bool,
    closed: bool,
    local: Node,
    nodes: Vec<Node>,
    sent_messages: Vec<SentMessage>,
    receive_queue: VecDeque<Message>,
    unreachable: HashSet<DeviceId>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
    send_delay: Option<Duration>,
    peer: Option<Weak<Shared>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, message: Message) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.receive_queue.push_back(message);
        drop(inner);
        self.inbound_ready.notify_waiters();
    }
}

impl MockTransport {
    /// Create a new mock whose local node is `local`.
    pub fn new(local: Node) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(MockTransportInner {
                    connected: false,
                    closed: false,
                    local,
                    nodes: Vec::new(),
                    sent_messages: Vec::new(),
                    receive_queue: VecDeque::new(),
                    unreachable: HashSet::new(),
                    fail_next_connect: None,
                    fail_next_send: None,
                    fail_next_recv: None,
                    send_delay: None,
                    peer: None,
                }),
                inbound_ready: Notify::new(),
            }),
        }
    }

    /// Create two mocks that see each other as connected nodes and deliver
    /// sends into each other's inbound queue.
    pub fn pair(a: Node, b: Node) -> (Self, Self) {
        let first = Self::new(a.clone());
        let second = Self::new(b.clone());

        {
            let mut inner = first.shared.lock();
            inner.nodes.push(b);
            inner.peer = Some(Arc::downgrade(&second.shared));
        }
        {
            let mut inner = second.shared.lock();
            inner.nodes.push(a);
            inner.peer = Some(Arc::downgrade(&first.shared));
        }

        (first, second)
    }

    /// Add a connected node.
    pub fn add_node(&self, node: Node) {
        let mut inner = self.shared.lock();
        inner.nodes.retain(|n| n.id != node.id);
        inner.nodes.push(node);
    }

    /// Remove a connected node.
    pub fn remove_node(&self, node_id: &DeviceId) {
        self.shared.lock().nodes.retain(|n| &n.id != node_id);
    }

    /// Make every send to `node_id` fail until [`set_reachable`](Self::set_reachable).
    pub fn set_unreachable(&self, node_id: &DeviceId) {
        self.shared.lock().unreachable.insert(node_id.clone());
    }

    /// Undo [`set_unreachable`](Self::set_unreachable).
    pub fn set_reachable(&self, node_id: &DeviceId) {
        self.shared.lock().unreachable.remove(node_id);
    }

    /// Queue a message to be returned by `recv()`.
    pub fn queue_inbound(&self, message: Message) {
        self.shared.deliver(message);
    }

    /// Get all messages that were sent.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.shared.lock().sent_messages.clone()
    }

    /// Get the messages sent on `path`.
    pub fn sent_on(&self, path: &str) -> Vec<SentMessage> {
        self.shared
            .lock()
            .sent_messages
            .iter()
            .filter(|m| m.path == path)
            .cloned()
            .collect()
    }

    /// Get the last message that was sent.
    pub fn last_sent(&self) -> Option<SentMessage> {
        self.shared.lock().sent_messages.last().cloned()
    }

    /// Forget captured messages.
    pub fn clear_sent(&self) {
        self.shared.lock().sent_messages.clear();
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.shared.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.shared.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.shared.lock().fail_next_recv = Some(error.to_string());
    }

    /// Make every send() wait `delay` before it is processed.
    pub fn set_send_delay(&self, delay: Duration) {
        self.shared.lock().send_delay = Some(delay);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut inner = self.shared.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.closed = false;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        {
            let mut inner = self.shared.lock();
            inner.connected = false;
            inner.closed = true;
            inner.receive_queue.clear();
        }
        self.shared.inbound_ready.notify_waiters();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    async fn local_node(&self) -> Result<Node, TransportError> {
        Ok(self.shared.lock().local.clone())
    }

    async fn connected_nodes(&self) -> Result<Vec<Node>, TransportError> {
        let inner = self.shared.lock();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(inner.nodes.clone())
    }

    async fn send(
        &self,
        node_id: &DeviceId,
        path: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let delay = self.shared.lock().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (peer, source) = {
            let mut inner = self.shared.lock();

            if !inner.connected {
                return Err(TransportError::NotConnected);
            }

            // Check for forced failure
            if let Some(error) = inner.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }
            if inner.unreachable.contains(node_id) {
                return Err(TransportError::SendFailed(format!("{} unreachable", node_id)));
            }
            if !inner.nodes.iter().any(|n| &n.id == node_id) {
                return Err(TransportError::SendFailed(format!("{} not connected", node_id)));
            }

            inner.sent_messages.push(SentMessage {
                node_id: node_id.clone(),
                path: path.to_string(),
                payload: payload.to_vec(),
            });
            (
                inner.peer.as_ref().and_then(Weak::upgrade),
                inner.local.id.clone(),
            )
        };

        if let Some(peer) = peer {
            let is_target = peer.lock().local.id == *node_id;
            if is_target {
                peer.deliver(Message::new(path, source, payload.to_vec()));
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Message, TransportError> {
        loop {
            let notified = self.shared.inbound_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.shared.lock();
                if inner.closed {
                    return Err(TransportError::ConnectionClosed);
                }
                if !inner.connected {
                    return Err(TransportError::NotConnected);
                }
                if let Some(error) = inner.fail_next_recv.take() {
                    return Err(TransportError::ReceiveFailed(error));
                }
                if let Some(message) = inner.receive_queue.pop_front() {
                    return Ok(message);
                }
            }

            notified.await;
        }
    }
}
