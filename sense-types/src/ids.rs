//! Identity types for SenseLink.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric tag identifying one kind of sensor source on a device
/// (accelerometer, gyroscope, heart rate, ...).
pub type SourceTag = i32;

/// Opaque identifier of a paired device, as assigned by the transport.
///
/// The distinguished [`DeviceId::local`] value addresses "this device" and
/// is valid before the transport has reported the real local id.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    const LOCAL: &'static str = "local";

    /// Create a DeviceId from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The sentinel id addressing the local device.
    pub fn local() -> Self {
        Self(Self::LOCAL.to_string())
    }

    /// Check if this is the local sentinel.
    pub fn is_local_sentinel(&self) -> bool {
        self.0 == Self::LOCAL
    }

    /// Check if the id is missing (empty).
    pub fn is_missing(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

/// A peer device as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Transport-assigned device id
    pub id: DeviceId,
    /// Human-readable name
    pub display_name: String,
    /// Whether the device is directly connected (not routed through the cloud)
    pub nearby: bool,
}

impl Node {
    /// Create a nearby node.
    pub fn nearby(id: impl Into<DeviceId>, display_name: &str) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.to_string(),
            nearby: true,
        }
    }

    /// Create a node that is connected but not nearby.
    pub fn remote(id: impl Into<DeviceId>, display_name: &str) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.to_string(),
            nearby: false,
        }
    }
}
