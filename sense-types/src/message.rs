//! Path-routed protocol messages.

use serde::{Deserialize, Serialize};

use crate::DeviceId;

/// Message paths (the wire contract, case-sensitive).
pub mod paths {
    /// Wildcard: a handler registered for this path receives every message.
    pub const ANY: &str = "/*";
    /// Liveness probe, payload is the sender's device label.
    pub const PING: &str = "/ping";
    /// Liveness reply broadcast to nearby devices.
    pub const ECHO: &str = "/echo";
    /// Graceful-shutdown notice.
    pub const CLOSING: &str = "/closing";
    /// Ask a device for its status.
    pub const GET_STATUS: &str = "/get_status";
    /// Status reply.
    pub const SET_STATUS: &str = "/set_status";
    /// Ask a device which sensors it offers.
    pub const GET_SENSORS: &str = "/get_sensors";
    /// Sensor list reply.
    pub const SET_SENSORS: &str = "/set_sensors";
    /// Open, update or close a streaming subscription.
    pub const SENSOR_DATA_REQUEST: &str = "/sensor_data_request";
    /// Streamed data for an open subscription.
    pub const SENSOR_DATA_REQUEST_RESPONSE: &str = "/sensor_data_request_response";
}

/// An inbound or loopback message.
///
/// The source device id travels out-of-band (the transport provides it);
/// the payload is opaque at this layer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Route string identifying the message's purpose
    pub path: String,
    /// Device that sent the message
    pub source: DeviceId,
    /// Opaque payload
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a new message.
    pub fn new(path: &str, source: DeviceId, payload: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            source,
            payload,
        }
    }

    /// Payload interpreted as UTF-8 (lossy), used for label payloads.
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("path", &self.path)
            .field("source", &self.source)
            .field("payload", &format!("[{} bytes]", self.payload.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_slash_prefixed() {
        for path in [
            paths::ANY,
            paths::PING,
            paths::ECHO,
            paths::CLOSING,
            paths::GET_STATUS,
            paths::SET_STATUS,
            paths::GET_SENSORS,
            paths::SET_SENSORS,
            paths::SENSOR_DATA_REQUEST,
            paths::SENSOR_DATA_REQUEST_RESPONSE,
        ] {
            assert!(path.starts_with('/'), "{} is not slash-prefixed", path);
        }
    }

    #[test]
    fn payload_str_decodes_label() {
        let msg = Message::new(paths::PING, DeviceId::new("W1"), b"Pixel Watch".to_vec());
        assert_eq!(msg.payload_str(), "Pixel Watch");
    }

    #[test]
    fn debug_summarises_payload() {
        let msg = Message::new(paths::ECHO, DeviceId::new("W1"), vec![0xAB; 12]);
        let debug = format!("{:?}", msg);
        assert!(debug.contains("[12 bytes]"));
        assert!(!debug.contains("171"));
    }
}
