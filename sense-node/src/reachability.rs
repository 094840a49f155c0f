//! Ping/echo liveness protocol.
//!
//! A check sends `/ping` to one device and waits for the configured timeout.
//! Any device receiving a ping marks the sender reachable and broadcasts
//! `/echo` to its nearby nodes; receiving an echo marks the sender reachable
//! and records when. If no echo arrived since the ping was issued, the device
//! is marked unreachable. `/closing` marks the sender unreachable at once.
//!
//! Observers are notified only on actual state changes, outside any lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sense_core::{Reachability, ReachabilityTable, Transition};
use sense_types::{paths, DeviceId, Message};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::ReachabilityConfig;
use crate::locks;
use crate::messenger::Messenger;
use crate::router::{handler_fn, HandlerRef, MessageRouter, PathFilter};

/// Receives reachability changes.
pub trait ReachabilityObserver: Send + Sync {
    /// Called after `device` became reachable (`true`) or unreachable (`false`).
    fn on_reachability_changed(&self, device: &DeviceId, reachable: bool);
}

impl<F> ReachabilityObserver for F
where
    F: Fn(&DeviceId, bool) + Send + Sync,
{
    fn on_reachability_changed(&self, device: &DeviceId, reachable: bool) {
        self(device, reachable)
    }
}

/// Shared handle to an observer. Identity is the allocation.
pub type ObserverRef = Arc<dyn ReachabilityObserver>;

/// What an observer is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// One device.
    Device(DeviceId),
    /// Every device.
    Any,
}

/// Tracks which paired devices answer pings.
pub struct ReachabilityTracker {
    messenger: Messenger,
    clock: Arc<dyn Clock>,
    config: ReachabilityConfig,
    label: String,
    table: Mutex<ReachabilityTable>,
    observers: Mutex<HashMap<Subject, Vec<ObserverRef>>>,
    handlers: Mutex<Vec<HandlerRef>>,
}

impl ReachabilityTracker {
    /// Create a tracker. `label` is the payload of outgoing pings and echoes.
    pub fn new(
        messenger: Messenger,
        clock: Arc<dyn Clock>,
        config: ReachabilityConfig,
        label: &str,
    ) -> Self {
        Self {
            messenger,
            clock,
            config,
            label: label.to_string(),
            table: Mutex::new(ReachabilityTable::new()),
            observers: Mutex::new(HashMap::new()),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// The messenger pings are sent through.
    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    // ===== State =====

    /// Set a device reachable or unreachable, notifying observers on change.
    ///
    /// Returns whether the state changed.
    pub fn set_reachability(&self, device: &DeviceId, reachable: bool) -> bool {
        let transition = locks::lock(&self.table).set_reachable(device, reachable);
        self.publish(transition)
    }

    /// Record an echo from `device` received now.
    pub fn record_echo(&self, device: &DeviceId) -> bool {
        let now = self.clock.now_millis();
        let transition = locks::lock(&self.table).record_echo(device, now);
        self.publish(transition)
    }

    /// Current state of a device.
    pub fn reachability(&self, device: &DeviceId) -> Reachability {
        locks::lock(&self.table).state(device)
    }

    /// Whether an echo from `device` was recorded at or after `timestamp`.
    pub fn has_reached_since(&self, device: &DeviceId, timestamp: i64) -> bool {
        locks::lock(&self.table).has_reached_since(device, timestamp)
    }

    /// Whether an echo from `device` was recorded within the recency window.
    pub fn has_reached_recently(&self, device: &DeviceId) -> bool {
        let now = self.clock.now_millis();
        locks::lock(&self.table).has_reached_recently(
            device,
            now,
            self.config.recent_window_ms as i64,
        )
    }

    /// Ids of every reachable device.
    pub fn reachable_node_ids(&self) -> Vec<DeviceId> {
        locks::lock(&self.table).reachable_ids()
    }

    /// Nearby connected devices that are not currently reachable.
    pub fn unreachable_nearby_node_ids(&self) -> Vec<DeviceId> {
        let nearby: Vec<DeviceId> = self
            .messenger
            .last_connected_nearby_nodes()
            .into_iter()
            .map(|node| node.id)
            .collect();
        locks::lock(&self.table).not_reachable_among(&nearby)
    }

    // ===== Observers =====

    /// Register an observer. Returns `false` if it already watches `subject`.
    pub fn register_observer(&self, subject: Subject, observer: ObserverRef) -> bool {
        let mut observers = locks::lock(&self.observers);
        let list = observers.entry(subject).or_default();
        if list.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            return false;
        }
        list.push(observer);
        true
    }

    /// Remove an observer from every subject. Returns whether it was found.
    pub fn unregister_observer(&self, observer: &ObserverRef) -> bool {
        let mut observers = locks::lock(&self.observers);
        let mut removed = false;
        for list in observers.values_mut() {
            let before = list.len();
            list.retain(|o| !Arc::ptr_eq(o, observer));
            removed |= list.len() != before;
        }
        observers.retain(|_, list| !list.is_empty());
        removed
    }

    fn publish(&self, transition: Option<Transition>) -> bool {
        let Some(transition) = transition else {
            return false;
        };
        tracing::debug!(
            "{} is now {:?} (was {:?})",
            transition.device,
            transition.to,
            transition.from
        );

        let targets: Vec<ObserverRef> = {
            let observers = locks::lock(&self.observers);
            observers
                .get(&Subject::Device(transition.device.clone()))
                .into_iter()
                .chain(observers.get(&Subject::Any))
                .flatten()
                .cloned()
                .collect()
        };

        let reachable = transition.is_reachable();
        for observer in targets {
            observer.on_reachability_changed(&transition.device, reachable);
        }
        true
    }

    // ===== Checks =====

    /// Ping `device` and mark it unreachable unless it echoes in time.
    ///
    /// `observer`, if given, is registered for `device` first. The returned
    /// task resolves to whether the device answered.
    pub fn check_reachability(
        self: &Arc<Self>,
        device: &DeviceId,
        observer: Option<ObserverRef>,
    ) -> JoinHandle<bool> {
        if let Some(observer) = observer {
            self.register_observer(Subject::Device(device.clone()), observer);
        }

        let tracker = Arc::clone(self);
        let device = device.clone();
        tokio::spawn(async move {
            let issued_at = tracker.clock.now_millis();
            let ping = tracker.label.as_bytes().to_vec();

            if let Err(e) = tracker
                .messenger
                .send_with_result(paths::PING, ping, &device)
                .await
            {
                tracing::debug!("Ping to {} failed: {}", device, e);
                tracker.set_reachability(&device, false);
                return false;
            }

            tokio::time::sleep(tracker.config.timeout()).await;

            if tracker.has_reached_since(&device, issued_at) {
                true
            } else {
                tracing::debug!("No echo from {} within {:?}", device, tracker.config.timeout());
                tracker.set_reachability(&device, false);
                false
            }
        })
    }

    /// Check every nearby node from the last connected-node refresh.
    pub fn check_reachabilities(
        self: &Arc<Self>,
        observer: Option<ObserverRef>,
    ) -> Vec<JoinHandle<bool>> {
        self.messenger
            .last_connected_nearby_nodes()
            .into_iter()
            .map(|node| self.check_reachability(&node.id, observer.clone()))
            .collect()
    }

    // ===== Protocol handlers =====

    /// Register the `/ping`, `/echo` and `/closing` handlers.
    pub fn register_message_handlers(self: &Arc<Self>, router: &MessageRouter) {
        let mut handlers = locks::lock(&self.handlers);
        if !handlers.is_empty() {
            return;
        }

        let tracker = Arc::downgrade(self);
        let on_ping = handler_fn(move |message: &Message| {
            let Some(tracker) = tracker.upgrade() else {
                return Ok(());
            };
            tracing::trace!("Ping from {} ({})", message.source, message.payload_str());
            tracker.set_reachability(&message.source, true);
            tracker
                .messenger
                .send_to_nearby(paths::ECHO, tracker.label.as_bytes().to_vec());
            Ok(())
        });

        let tracker = Arc::downgrade(self);
        let on_echo = handler_fn(move |message: &Message| {
            if let Some(tracker) = tracker.upgrade() {
                tracing::trace!("Echo from {} ({})", message.source, message.payload_str());
                tracker.record_echo(&message.source);
            }
            Ok(())
        });

        let tracker = Arc::downgrade(self);
        let on_closing = handler_fn(move |message: &Message| {
            if let Some(tracker) = tracker.upgrade() {
                tracing::info!("{} is closing", message.source);
                tracker.set_reachability(&message.source, false);
            }
            Ok(())
        });

        router.register(Arc::clone(&on_ping), PathFilter::path(paths::PING));
        router.register(Arc::clone(&on_echo), PathFilter::path(paths::ECHO));
        router.register(Arc::clone(&on_closing), PathFilter::path(paths::CLOSING));
        handlers.extend([on_ping, on_echo, on_closing]);
    }

    /// Remove the handlers added by [`register_message_handlers`](Self::register_message_handlers).
    pub fn unregister_message_handlers(&self, router: &MessageRouter) {
        for handler in locks::lock(&self.handlers).drain(..) {
            router.unregister(&handler);
        }
    }
}
