//! Provider-side request handlers.
//!
//! - `/sensor_data_request` → [`SubscriptionService`]
//! - `/get_status` → replies `/set_status` with a [`NodeStatus`]
//! - `/get_sensors` → replies `/set_sensors` with the [`SensorList`](sense_types::SensorList)
//!
//! Replies go to the message's sender.

use std::sync::{Arc, Mutex, Weak};

use sense_types::{paths, DeviceId, Message, NodeStatus};

use crate::clock::Clock;
use crate::error::HandlerError;
use crate::locks;
use crate::messenger::Messenger;
use crate::reachability::ReachabilityTracker;
use crate::router::{handler_fn, HandlerRef, MessageRouter, PathFilter};
use crate::sensors::SensorDataManager;
use crate::subscription::SubscriptionService;

/// Answers requests from paired devices.
pub struct ProviderHandlers {
    label: String,
    messenger: Messenger,
    sensors: Arc<SensorDataManager>,
    subscriptions: Arc<SubscriptionService>,
    tracker: Arc<ReachabilityTracker>,
    clock: Arc<dyn Clock>,
    handlers: Mutex<Vec<HandlerRef>>,
}

impl ProviderHandlers {
    /// Create the handlers. Nothing is registered until [`register`](Self::register).
    pub fn new(
        label: &str,
        messenger: Messenger,
        sensors: Arc<SensorDataManager>,
        subscriptions: Arc<SubscriptionService>,
        tracker: Arc<ReachabilityTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            label: label.to_string(),
            messenger,
            sensors,
            subscriptions,
            tracker,
            clock,
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// This node's current status.
    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            device_label: self.label.clone(),
            connected: self.messenger.is_connected(),
            local_node_id: self.messenger.local_node_id(),
            reachable_nodes: self.tracker.reachable_node_ids(),
            active_subscriptions: self.subscriptions.active_count() as u32,
            updated_at: self.clock.now_millis(),
        }
    }

    fn reply_target(message: &Message) -> DeviceId {
        if message.source.is_missing() {
            DeviceId::local()
        } else {
            message.source.clone()
        }
    }

    fn on_get_status(&self, message: &Message) -> Result<(), HandlerError> {
        let payload = self.status().to_bytes().map_err(HandlerError::Encode)?;
        self.messenger
            .send(paths::SET_STATUS, payload, &Self::reply_target(message));
        Ok(())
    }

    fn on_get_sensors(&self, message: &Message) -> Result<(), HandlerError> {
        let sensors = self.sensors.available_sensors();
        tracing::debug!(
            "Offering {} sensor(s) to {}",
            sensors.sensors.len(),
            message.source
        );
        let payload = sensors.to_bytes().map_err(HandlerError::Encode)?;
        self.messenger
            .send(paths::SET_SENSORS, payload, &Self::reply_target(message));
        Ok(())
    }

    /// Register the three provider handlers on `router`.
    pub fn register(self: &Arc<Self>, router: &MessageRouter) {
        let mut handlers = locks::lock(&self.handlers);
        if !handlers.is_empty() {
            return;
        }

        let subscriptions = Arc::clone(&self.subscriptions);
        let on_request = handler_fn(move |message: &Message| subscriptions.handle_message(message));

        let me: Weak<Self> = Arc::downgrade(self);
        let on_status = handler_fn(move |message: &Message| match me.upgrade() {
            Some(me) => me.on_get_status(message),
            None => Ok(()),
        });

        let me: Weak<Self> = Arc::downgrade(self);
        let on_sensors = handler_fn(move |message: &Message| match me.upgrade() {
            Some(me) => me.on_get_sensors(message),
            None => Ok(()),
        });

        router.register(
            Arc::clone(&on_request),
            PathFilter::path(paths::SENSOR_DATA_REQUEST),
        );
        router.register(Arc::clone(&on_status), PathFilter::path(paths::GET_STATUS));
        router.register(Arc::clone(&on_sensors), PathFilter::path(paths::GET_SENSORS));
        handlers.extend([on_request, on_status, on_sensors]);
    }

    /// Remove the handlers added by [`register`](Self::register).
    pub fn unregister(&self, router: &MessageRouter) {
        for handler in locks::lock(&self.handlers).drain(..) {
            router.unregister(&handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::config::ReachabilityConfig;
    use crate::sensors::MockSensorSource;
    use crate::transport::MockTransport;
    use sense_types::{DeviceSensor, Node, SensorList};
    use std::time::Duration;

    struct Fixture {
        transport: MockTransport,
        router: Arc<MessageRouter>,
        handlers: Arc<ProviderHandlers>,
        tracker: Arc<ReachabilityTracker>,
    }

    async fn fixture() -> Fixture {
        let transport = MockTransport::new(Node::nearby("W1", "Watch"));
        transport.add_node(Node::nearby("P1", "Phone"));
        let router = Arc::new(MessageRouter::new());
        let messenger = Messenger::new(Arc::new(transport.clone()), &router);
        messenger.connect().await.unwrap();

        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(5_000));
        let source = Arc::new(MockSensorSource::new(SensorList::new(vec![
            DeviceSensor::new(1, "Accelerometer"),
        ])));
        let sensors = Arc::new(SensorDataManager::new(source, None));
        let subscriptions = Arc::new(SubscriptionService::new(
            messenger.clone(),
            Arc::clone(&sensors),
            Arc::clone(&clock),
            10,
        ));
        let tracker = Arc::new(ReachabilityTracker::new(
            messenger.clone(),
            Arc::clone(&clock),
            ReachabilityConfig::default(),
            "Watch",
        ));
        let handlers = Arc::new(ProviderHandlers::new(
            "Watch",
            messenger,
            sensors,
            subscriptions,
            Arc::clone(&tracker),
            clock,
        ));
        handlers.register(&router);

        Fixture {
            transport,
            router,
            handlers,
            tracker,
        }
    }

    fn phone() -> DeviceId {
        DeviceId::new("P1")
    }

    #[tokio::test]
    async fn get_sensors_replies_with_list() {
        let f = fixture().await;

        f.router
            .dispatch(&Message::new(paths::GET_SENSORS, phone(), Vec::new()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let reply = f.transport.last_sent().unwrap();
        assert_eq!(reply.path, paths::SET_SENSORS);
        assert_eq!(reply.node_id, phone());
        let list = SensorList::from_bytes(&reply.payload).unwrap();
        assert_eq!(list.sensors[0].name, "Accelerometer");
    }

    #[tokio::test]
    async fn get_status_replies_with_snapshot() {
        let f = fixture().await;
        f.tracker.set_reachability(&phone(), true);

        f.router
            .dispatch(&Message::new(paths::GET_STATUS, phone(), Vec::new()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let reply = f.transport.last_sent().unwrap();
        assert_eq!(reply.path, paths::SET_STATUS);
        let status = NodeStatus::from_bytes(&reply.payload).unwrap();
        assert_eq!(status.device_label, "Watch");
        assert!(status.connected);
        assert_eq!(status.local_node_id, Some(DeviceId::new("W1")));
        assert_eq!(status.reachable_nodes, vec![phone()]);
        assert_eq!(status.active_subscriptions, 0);
        assert!(status.updated_at >= 5_000);
    }

    #[tokio::test]
    async fn status_counts_running_subscriptions() {
        let f = fixture().await;
        let request = sense_types::DataRequest::new(phone(), [1], 5_000);

        f.router.dispatch(&Message::new(
            paths::SENSOR_DATA_REQUEST,
            phone(),
            request.to_bytes().unwrap(),
        ));

        assert_eq!(f.handlers.status().active_subscriptions, 1);
    }

    #[tokio::test]
    async fn register_once_and_unregister() {
        let f = fixture().await;
        assert_eq!(f.router.len(), 3);

        f.handlers.register(&f.router);
        assert_eq!(f.router.len(), 3);

        f.handlers.unregister(&f.router);
        assert!(f.router.is_empty());
    }
}
