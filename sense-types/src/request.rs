//! Streaming subscription requests and their responses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{DeviceId, LinkError, SampleBuffer, SourceTag};

/// Request a recurring stream of samples from one or more sources.
///
/// A request is immutable wire data. The requester keeps its own copy and
/// cancels the subscription by setting `end_timestamp` and resending it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    /// Device that issued the request
    pub source_device_id: DeviceId,
    /// Source tags to stream
    pub sources: BTreeSet<SourceTag>,
    /// Milliseconds between two responses
    pub update_interval_ms: u64,
    /// When the subscription started (ms since epoch)
    pub start_timestamp: i64,
    /// When the subscription ends; `None` keeps it open
    pub end_timestamp: Option<i64>,
}

impl DataRequest {
    /// One response per second.
    pub const UPDATE_INTERVAL_DEFAULT: u64 = 1_000;
    /// 20 responses per second.
    pub const UPDATE_INTERVAL_FAST: u64 = 50;
    /// 10 responses per second.
    pub const UPDATE_INTERVAL_NORMAL: u64 = 100;
    /// 2 responses per second.
    pub const UPDATE_INTERVAL_SLOW: u64 = 500;

    /// Create an open request with the default interval.
    pub fn new(
        source_device_id: DeviceId,
        sources: impl IntoIterator<Item = SourceTag>,
        start_timestamp: i64,
    ) -> Self {
        Self {
            source_device_id,
            sources: sources.into_iter().collect(),
            update_interval_ms: Self::UPDATE_INTERVAL_DEFAULT,
            start_timestamp,
            end_timestamp: None,
        }
    }

    /// Set the update interval.
    pub fn with_interval(mut self, update_interval_ms: u64) -> Self {
        self.update_interval_ms = update_interval_ms;
        self
    }

    /// Mark the request as ending at `timestamp`.
    pub fn cancel_at(&mut self, timestamp: i64) {
        self.end_timestamp = Some(timestamp);
    }

    /// Whether no end has been set.
    pub fn is_active(&self) -> bool {
        self.end_timestamp.is_none()
    }

    /// Whether the end timestamp is set and has been reached at `now`.
    pub fn has_ended(&self, now: i64) -> bool {
        matches!(self.end_timestamp, Some(end) if end <= now)
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LinkError> {
        rmp_serde::to_vec(self).map_err(LinkError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        rmp_serde::from_slice(bytes).map_err(LinkError::Deserialization)
    }
}

/// The delta of samples produced in `[start_timestamp, end_timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequestResponse {
    /// One snapshot per requested source
    pub batches: Vec<SampleBuffer>,
    /// Window start (inclusive)
    pub start_timestamp: i64,
    /// Window end (exclusive)
    pub end_timestamp: i64,
}

impl DataRequestResponse {
    /// Create a response for the given window.
    pub fn new(batches: Vec<SampleBuffer>, start_timestamp: i64, end_timestamp: i64) -> Self {
        Self {
            batches,
            start_timestamp,
            end_timestamp,
        }
    }

    /// Total number of samples across all batches.
    pub fn sample_count(&self) -> usize {
        self.batches.iter().map(SampleBuffer::len).sum()
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LinkError> {
        rmp_serde::to_vec(self).map_err(LinkError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        rmp_serde::from_slice(bytes).map_err(LinkError::Deserialization)
    }
}
