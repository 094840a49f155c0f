//! # senselink-node
//!
//! Messaging, reachability and sensor streaming between paired devices.
//!
//! ## Layout
//!
//! ```text
//! Transport → LinkNode pump → MessageRouter → handlers
//!                                  ↑               ↓
//!                              loopback ←── Messenger → Transport
//! ```
//!
//! - [`MessageRouter`]: path-keyed dispatch to registered handlers
//! - [`Messenger`]: addressing, loopback for this device, node caching
//! - [`ReachabilityTracker`]: `/ping`, `/echo` and `/closing`
//! - [`SubscriptionService`] / [`ResponseGenerator`]: serve sensor streams
//! - [`StreamRequester`] / [`ResponseCollector`]: request and receive them
//! - [`LinkNode`]: all of the above around one transport
//!
//! ## Example
//!
//! ```ignore
//! use senselink_node::{Config, LinkNode, MockTransport, SimulatedSensorSource, SystemClock};
//!
//! let (phone_link, watch_link) = MockTransport::pair(phone, watch);
//! let node = LinkNode::new(Config::default(), Arc::new(phone_link), sensors, clock);
//! node.start().await?;
//!
//! node.requester().request(&watch_id, [1, 4], Some(100))?;
//! let mut updates = node.collector().updates();
//! while let Ok(update) = updates.recv().await {
//!     println!("{} samples from {}", update.samples.len(), update.device);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
mod locks;
pub mod messenger;
pub mod node;
pub mod reachability;
pub mod requester;
pub mod router;
pub mod sensors;
pub mod subscription;
pub mod sweep;
pub mod transport;

pub use clock::{Clock, SystemClock, TokioClock};
pub use config::{Config, ConfigError, NodeConfig, ReachabilityConfig, StreamingConfig};
pub use error::{HandlerError, NodeError, SensorError};
pub use handlers::ProviderHandlers;
pub use messenger::Messenger;
pub use node::LinkNode;
pub use reachability::{ObserverRef, ReachabilityObserver, ReachabilityTracker, Subject};
pub use requester::{ResponseCollector, StreamRequester, StreamUpdate};
pub use router::{handler_fn, HandlerRef, MessageHandler, MessageRouter, PathFilter};
pub use sensors::{
    MockSensorSource, SampleSink, SensorCall, SensorDataManager, SensorSource,
    SimulatedSensorSource,
};
pub use subscription::{ResponseGenerator, SubscriptionService};
pub use sweep::spawn_reachability_sweep;
pub use transport::{MockTransport, SentMessage, Transport, TransportError};
