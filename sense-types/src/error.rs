//! Error types for SenseLink wire types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding SenseLink payloads.
#[derive(Debug, Error)]
pub enum LinkError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}
