//! Transport abstraction for SenseLink.
//!
//! The transport is the platform's device-to-device messaging layer. It
//! knows which peers are connected, delivers addressed `(path, payload)`
//! pairs to one of them and hands inbound messages to the node.
//!
//! # Design
//!
//! - `connect()` / `close()` manage the link
//! - `local_node()` / `connected_nodes()` report identity and peers
//! - `send()` delivers to one peer by device id
//! - `recv()` waits for the next inbound message
//!
//! # Example
//!
//! ```ignore
//! let (phone, watch) = MockTransport::pair(
//!     Node::nearby("P1", "Phone"),
//!     Node::nearby("W1", "Watch"),
//! );
//! phone.connect().await?;
//! watch.connect().await?;
//! phone.send(&DeviceId::new("W1"), paths::PING, b"Phone").await?;
//! let msg = watch.recv().await?;
//! ```

mod mock;

pub use mock::{MockTransport, SentMessage};

use async_trait::async_trait;
use sense_types::{DeviceId, Message, Node};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The message has no destination id.
    #[error("missing destination device id")]
    MissingDestination,

    /// The destination is not among the connected nodes.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Operation timed out.
    #[error("timeout")]
    Timeout,
}

/// Device-to-device messaging used by a node.
///
/// Implementations wrap the platform messaging API (or an in-process mock).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bring the link up.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Take the link down. Pending and future `recv()` calls return
    /// [`TransportError::ConnectionClosed`].
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Identity of this device as assigned by the transport.
    async fn local_node(&self) -> Result<Node, TransportError>;

    /// Peers currently connected.
    async fn connected_nodes(&self) -> Result<Vec<Node>, TransportError>;

    /// Send `payload` on `path` to the peer `node_id`.
    async fn send(
        &self,
        node_id: &DeviceId,
        path: &str,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Wait for the next inbound message.
    async fn recv(&self) -> Result<Message, TransportError>;
}
