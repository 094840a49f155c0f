//! # sense-core
//!
//! Pure logic for SenseLink (no I/O, instant tests).
//!
//! This crate holds the state machines behind the reachability protocol and
//! the streaming subscriptions, without any network access, timers or tasks.
//!
//! ## Design Philosophy
//!
//! Every type here takes the current time as an argument and returns what
//! changed. The I/O crate (`sense-node`) owns the clock, the transport and
//! the tasks, and interprets the results:
//! - [`ReachabilityTable`] reports a [`Transition`] only when a device's
//!   state actually changes, so observers are never notified twice.
//! - [`DeliveryCursor`] computes each response window and decides when a
//!   subscription starts, keeps running or stops.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod delivery;
pub mod reachability;

pub use delivery::{DeliveryCursor, RequestDecision, StopReason, TickOutcome, Window};
pub use reachability::{Reachability, ReachabilityEntry, ReachabilityTable, Transition};
