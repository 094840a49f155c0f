//! Error types for sense-node.

use sense_types::{LinkError, SourceTag};
use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Error returned by a message handler.
///
/// The router logs it and moves on to the next handler; only the message
/// being handled is affected.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload could not be decoded.
    #[error("failed to decode {path} payload: {source}")]
    Decode {
        /// Path of the message.
        path: String,
        /// Underlying decoding error.
        source: LinkError,
    },

    /// A reply could not be encoded.
    #[error("failed to encode reply: {0}")]
    Encode(#[source] LinkError),

    /// The sensor layer rejected the operation.
    #[error(transparent)]
    Sensor(#[from] SensorError),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    /// Build a decode error for a message on `path`.
    pub fn decode(path: &str, source: LinkError) -> Self {
        Self::Decode {
            path: path.to_string(),
            source,
        }
    }
}

/// Sensor subscription errors.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The device does not offer this source.
    #[error("unknown sensor source {0}")]
    UnknownSource(SourceTag),

    /// The sensor backend refused the subscription.
    #[error("failed to subscribe to source {tag}: {reason}")]
    SubscribeFailed {
        /// Source tag.
        tag: SourceTag,
        /// Backend-specific reason.
        reason: String,
    },
}

/// Node lifecycle errors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration failure.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Payload encoding failure.
    #[error("encoding error: {0}")]
    Encode(#[from] LinkError),

    /// The node has already been started.
    #[error("node already started")]
    AlreadyStarted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sense_types::DataRequest;

    #[test]
    fn decode_error_names_path() {
        let source = DataRequest::from_bytes(&[0xc1]).unwrap_err();
        let err = HandlerError::decode("/sensor_data_request", source);
        assert!(err.to_string().contains("/sensor_data_request"));
    }

    #[test]
    fn sensor_error_converts() {
        let err: HandlerError = SensorError::UnknownSource(7).into();
        assert_eq!(err.to_string(), "unknown sensor source 7");
    }

    #[test]
    fn transport_error_converts_to_node_error() {
        let err: NodeError = TransportError::NotConnected.into();
        assert!(matches!(err, NodeError::Transport(TransportError::NotConnected)));
    }
}
