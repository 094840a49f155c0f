//! # sense-types
//!
//! Wire format types for the SenseLink paired-device streaming protocol.
//!
//! This crate provides the foundational types used across all SenseLink crates:
//! - [`DeviceId`], [`Node`] - Device identity as reported by the transport
//! - [`Message`] and the [`paths`] constants - Path-routed protocol messages
//! - [`Sample`], [`SampleBuffer`] - Timestamped readings and bounded FIFO buffers
//! - [`DataRequest`], [`DataRequestResponse`] - The streaming subscription protocol
//! - [`SensorList`], [`NodeStatus`] - Capability discovery and status payloads
//! - [`LinkError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod message;
mod request;
mod sample;
mod sensors;
mod status;

pub use error::LinkError;
pub use ids::{DeviceId, Node, SourceTag};
pub use message::{paths, Message};
pub use request::{DataRequest, DataRequestResponse};
pub use sample::{Sample, SampleBuffer, DEFAULT_CAPACITY};
pub use sensors::{DeviceSensor, SensorList};
pub use status::NodeStatus;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn unix_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
