//! Status payload exchanged on `/get_status` / `/set_status`.

use serde::{Deserialize, Serialize};

use crate::{DeviceId, LinkError};

/// Snapshot of a node's link state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Human-readable device label
    pub device_label: String,
    /// Whether the transport is connected
    pub connected: bool,
    /// Transport-assigned id of the node, once known
    pub local_node_id: Option<DeviceId>,
    /// Devices currently considered reachable
    pub reachable_nodes: Vec<DeviceId>,
    /// Number of requesters currently being streamed to
    pub active_subscriptions: u32,
    /// When the snapshot was taken (ms since epoch)
    pub updated_at: i64,
}

impl NodeStatus {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LinkError> {
        rmp_serde::to_vec(self).map_err(LinkError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        rmp_serde::from_slice(bytes).map_err(LinkError::Deserialization)
    }
}
