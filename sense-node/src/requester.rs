//! Requester side of the streaming protocol.
//!
//! [`StreamRequester`] sends `/sensor_data_request` messages and keeps the
//! last request sent to each device so it can be updated or cancelled.
//! [`ResponseCollector`] receives the responses, appends them to bounded
//! per-source buffers and publishes every batch as a [`StreamUpdate`]. It
//! also caches the sensor lists and statuses other devices report.

use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use sense_types::{
    paths, DataRequest, DataRequestResponse, DeviceId, Message, NodeStatus, Sample, SampleBuffer,
    SensorList, SourceTag,
};
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::error::{HandlerError, NodeError};
use crate::locks;
use crate::messenger::Messenger;
use crate::router::{handler_fn, HandlerRef, MessageRouter, PathFilter};

/// Capacity of the [`StreamUpdate`] channel.
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Sends and tracks data requests.
pub struct StreamRequester {
    messenger: Messenger,
    clock: Arc<dyn Clock>,
    default_interval_ms: u64,
    requests: DashMap<DeviceId, DataRequest>,
}

impl StreamRequester {
    /// Create a requester. Requests without an explicit interval use
    /// `default_interval_ms`.
    pub fn new(messenger: Messenger, clock: Arc<dyn Clock>, default_interval_ms: u64) -> Self {
        Self {
            messenger,
            clock,
            default_interval_ms,
            requests: DashMap::new(),
        }
    }

    fn own_id(&self) -> DeviceId {
        self.messenger.local_node_id().unwrap_or_else(DeviceId::local)
    }

    fn send_request(&self, device: &DeviceId, request: &DataRequest) -> Result<(), NodeError> {
        let payload = request.to_bytes()?;
        self.messenger
            .send(paths::SENSOR_DATA_REQUEST, payload, device);
        Ok(())
    }

    /// Ask `device` to stream `sources` every `interval_ms` (or the default
    /// interval). Replaces any request previously sent to `device`.
    pub fn request(
        &self,
        device: &DeviceId,
        sources: impl IntoIterator<Item = SourceTag>,
        interval_ms: Option<u64>,
    ) -> Result<DataRequest, NodeError> {
        let request = DataRequest::new(self.own_id(), sources, self.clock.now_millis())
            .with_interval(interval_ms.unwrap_or(self.default_interval_ms));
        self.send_request(device, &request)?;
        tracing::info!(
            "Requested sources {:?} from {} every {}ms",
            request.sources,
            device,
            request.update_interval_ms
        );
        self.requests.insert(device.clone(), request.clone());
        Ok(request)
    }

    /// Change the interval of the request sent to `device` and resend it.
    /// Returns `false` if there is no such request.
    pub fn update_interval(&self, device: &DeviceId, interval_ms: u64) -> Result<bool, NodeError> {
        let Some(mut entry) = self.requests.get_mut(device) else {
            return Ok(false);
        };
        entry.update_interval_ms = interval_ms;
        let request = entry.clone();
        drop(entry);

        self.send_request(device, &request)?;
        tracing::debug!("Interval for {} is now {}ms", device, interval_ms);
        Ok(true)
    }

    /// End the request sent to `device`. Returns `false` if there is no such
    /// request.
    pub fn cancel(&self, device: &DeviceId) -> Result<bool, NodeError> {
        let Some((_, mut request)) = self.requests.remove(device) else {
            return Ok(false);
        };
        request.cancel_at(self.clock.now_millis());
        self.send_request(device, &request)?;
        tracing::info!("Cancelled stream from {}", device);
        Ok(true)
    }

    /// End every request. Returns how many were cancelled.
    pub fn cancel_all(&self) -> Result<usize, NodeError> {
        let devices: Vec<DeviceId> = self.requests.iter().map(|e| e.key().clone()).collect();
        let mut cancelled = 0;
        for device in devices {
            if self.cancel(&device)? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// End every request, waiting until each cancellation has been handed
    /// to the transport. Encode and send failures are logged, not returned.
    /// Returns the number of requests ended.
    pub async fn close(&self) -> usize {
        let devices: Vec<DeviceId> = self.requests.iter().map(|e| e.key().clone()).collect();
        let now = self.clock.now_millis();
        let mut cancelled = 0;
        for device in devices {
            let Some((_, mut request)) = self.requests.remove(&device) else {
                continue;
            };
            request.cancel_at(now);
            let payload = match request.to_bytes() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Failed to encode cancel for {}: {}", device, e);
                    continue;
                }
            };
            if let Err(e) = self
                .messenger
                .send_with_result(paths::SENSOR_DATA_REQUEST, payload, &device)
                .await
            {
                tracing::warn!("Could not cancel stream from {}: {}", device, e);
            }
            cancelled += 1;
        }
        cancelled
    }

    /// The request last sent to `device`, if still open.
    pub fn request_for(&self, device: &DeviceId) -> Option<DataRequest> {
        self.requests.get(device).map(|r| r.value().clone())
    }

    /// Devices with an open request.
    pub fn active_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.requests.iter().map(|e| e.key().clone()).collect();
        devices.sort();
        devices
    }

    /// Ask `device` for its sensor list.
    pub fn discover_sensors(&self, device: &DeviceId) {
        self.messenger.send(paths::GET_SENSORS, Vec::new(), device);
    }

    /// Ask `device` for its status.
    pub fn query_status(&self, device: &DeviceId) {
        self.messenger.send(paths::GET_STATUS, Vec::new(), device);
    }
}

/// One received batch.
#[derive(Debug, Clone)]
pub struct StreamUpdate {
    /// Device that produced the samples.
    pub device: DeviceId,
    /// Source tag.
    pub source_type: SourceTag,
    /// Source name.
    pub source: String,
    /// New samples, oldest first.
    pub samples: Vec<Sample>,
    /// Window start of the response.
    pub start_timestamp: i64,
    /// Window end of the response.
    pub end_timestamp: i64,
}

/// Collects responses and discovery replies from other devices.
pub struct ResponseCollector {
    capacity: Option<usize>,
    buffers: DashMap<(DeviceId, SourceTag), SampleBuffer>,
    sensors: DashMap<DeviceId, SensorList>,
    statuses: DashMap<DeviceId, NodeStatus>,
    updates: broadcast::Sender<StreamUpdate>,
    handlers: Mutex<Vec<HandlerRef>>,
}

impl ResponseCollector {
    /// Create a collector whose buffers hold at most `capacity` samples.
    pub fn new(capacity: Option<usize>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            capacity,
            buffers: DashMap::new(),
            sensors: DashMap::new(),
            statuses: DashMap::new(),
            updates,
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Receive every [`StreamUpdate`] from now on.
    pub fn updates(&self) -> broadcast::Receiver<StreamUpdate> {
        self.updates.subscribe()
    }

    fn sender(message: &Message) -> DeviceId {
        if message.source.is_missing() {
            DeviceId::local()
        } else {
            message.source.clone()
        }
    }

    /// Handle a `/sensor_data_request_response` message.
    pub fn handle_response(&self, message: &Message) -> Result<(), HandlerError> {
        let response = DataRequestResponse::from_bytes(&message.payload)
            .map_err(|e| HandlerError::decode(&message.path, e))?;
        let device = Self::sender(message);
        tracing::trace!(
            "{} sample(s) from {} for [{}, {})",
            response.sample_count(),
            device,
            response.start_timestamp,
            response.end_timestamp
        );

        for batch in response.batches {
            let tag = batch.source_type();
            let samples: Vec<Sample> = batch.samples().cloned().collect();
            self.buffers
                .entry((device.clone(), tag))
                .or_insert_with(|| SampleBuffer::with_capacity(batch.source(), tag, self.capacity))
                .add_samples(samples.iter().cloned());

            if samples.is_empty() {
                continue;
            }
            // No receivers is fine
            let _ = self.updates.send(StreamUpdate {
                device: device.clone(),
                source_type: tag,
                source: batch.source().to_string(),
                samples,
                start_timestamp: response.start_timestamp,
                end_timestamp: response.end_timestamp,
            });
        }
        Ok(())
    }

    /// Handle a `/set_sensors` message.
    pub fn handle_sensors(&self, message: &Message) -> Result<(), HandlerError> {
        let list = SensorList::from_bytes(&message.payload)
            .map_err(|e| HandlerError::decode(&message.path, e))?;
        let device = Self::sender(message);
        tracing::debug!("{} offers {} sensor(s)", device, list.sensors.len());
        self.sensors.insert(device, list);
        Ok(())
    }

    /// Handle a `/set_status` message.
    pub fn handle_status(&self, message: &Message) -> Result<(), HandlerError> {
        let status = NodeStatus::from_bytes(&message.payload)
            .map_err(|e| HandlerError::decode(&message.path, e))?;
        self.statuses.insert(Self::sender(message), status);
        Ok(())
    }

    /// Samples received from `device` for `tag`.
    pub fn samples(&self, device: &DeviceId, tag: SourceTag) -> Option<SampleBuffer> {
        self.buffers
            .get(&(device.clone(), tag))
            .map(|b| b.value().clone())
    }

    /// Sensor list last reported by `device`.
    pub fn sensors_of(&self, device: &DeviceId) -> Option<SensorList> {
        self.sensors.get(device).map(|s| s.value().clone())
    }

    /// Status last reported by `device`.
    pub fn status_of(&self, device: &DeviceId) -> Option<NodeStatus> {
        self.statuses.get(device).map(|s| s.value().clone())
    }

    /// Register the response, sensor list and status handlers on `router`.
    pub fn register(self: &Arc<Self>, router: &MessageRouter) {
        let mut handlers = locks::lock(&self.handlers);
        if !handlers.is_empty() {
            return;
        }

        let routes: [(&str, fn(&Self, &Message) -> Result<(), HandlerError>); 3] = [
            (paths::SENSOR_DATA_REQUEST_RESPONSE, Self::handle_response),
            (paths::SET_SENSORS, Self::handle_sensors),
            (paths::SET_STATUS, Self::handle_status),
        ];
        for (path, handle) in routes {
            let me: Weak<Self> = Arc::downgrade(self);
            let handler = handler_fn(move |message: &Message| match me.upgrade() {
                Some(me) => handle(&me, message),
                None => Ok(()),
            });
            router.register(Arc::clone(&handler), PathFilter::path(path));
            handlers.push(handler);
        }
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
    use crate::transport::MockTransport;
    use sense_types::{DeviceSensor, Node};
    use std::time::Duration;

    fn watch() -> DeviceId {
        DeviceId::new("W1")
    }

    async fn requester() -> (MockTransport, Arc<MessageRouter>, StreamRequester) {
        let transport = MockTransport::new(Node::nearby("P1", "Phone"));
        transport.add_node(Node::nearby("W1", "Watch"));
        let router = Arc::new(MessageRouter::new());
        let messenger = Messenger::new(Arc::new(transport.clone()), &router);
        messenger.connect().await.unwrap();
        let clock = Arc::new(TokioClock::starting_at(10_000));
        (transport, router, StreamRequester::new(messenger, clock, 1_000))
    }

    fn sent_requests(transport: &MockTransport) -> Vec<DataRequest> {
        transport
            .sent_on(paths::SENSOR_DATA_REQUEST)
            .iter()
            .map(|m| DataRequest::from_bytes(&m.payload).unwrap())
            .collect()
    }

    fn response(tag: SourceTag, timestamps: &[i64], start: i64, end: i64) -> Message {
        let mut batch = SampleBuffer::new("Accelerometer", tag);
        batch.add_samples(
            timestamps
                .iter()
                .map(|ts| Sample::new(*ts, "Accelerometer", vec![0.0, 0.0, 9.81])),
        );
        Message::new(
            paths::SENSOR_DATA_REQUEST_RESPONSE,
            watch(),
            DataRequestResponse::new(vec![batch], start, end)
                .to_bytes()
                .unwrap(),
        )
    }

    // ===== StreamRequester =====

    #[tokio::test(start_paused = true)]
    async fn request_is_sent_and_retained() {
        let (transport, _router, requester) = requester().await;

        let request = requester.request(&watch(), [1, 4], None).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(request.source_device_id, DeviceId::new("P1"));
        assert_eq!(request.update_interval_ms, 1_000);
        assert_eq!(request.start_timestamp, 10_000);
        assert!(request.is_active());
        assert_eq!(sent_requests(&transport), vec![request.clone()]);
        assert_eq!(transport.last_sent().unwrap().node_id, watch());
        assert_eq!(requester.request_for(&watch()), Some(request));
    }

    #[tokio::test(start_paused = true)]
    async fn update_interval_resends() {
        let (transport, _router, requester) = requester().await;
        requester.request(&watch(), [1], Some(500)).unwrap();

        assert!(requester.update_interval(&watch(), 50).unwrap());
        assert!(!requester
            .update_interval(&DeviceId::new("X"), 50)
            .unwrap());
        tokio::time::sleep(Duration::from_millis(1)).await;

        let sent = sent_requests(&transport);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].update_interval_ms, 50);
        assert_eq!(sent[1].start_timestamp, sent[0].start_timestamp);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_sends_ended_request() {
        let (transport, _router, requester) = requester().await;
        requester.request(&watch(), [1], None).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(requester.cancel(&watch()).unwrap());
        assert!(!requester.cancel(&watch()).unwrap());
        tokio::time::sleep(Duration::from_millis(1)).await;

        let sent = sent_requests(&transport);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].end_timestamp, Some(10_250));
        assert!(sent[1].has_ended(10_250));
        assert!(requester.request_for(&watch()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_ends_every_request() {
        let (transport, _router, requester) = requester().await;
        transport.add_node(Node::nearby("W2", "Ring"));
        requester.request(&watch(), [1], None).unwrap();
        requester.request(&DeviceId::new("W2"), [21], None).unwrap();
        assert_eq!(requester.active_devices().len(), 2);

        assert_eq!(requester.cancel_all().unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(requester.active_devices().is_empty());
        let ended = sent_requests(&transport)
            .iter()
            .filter(|r| !r.is_active())
            .count();
        assert_eq!(ended, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_waits_for_cancellations() {
        let (transport, _router, requester) = requester().await;
        requester.request(&watch(), [1], None).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(requester.close().await, 1);

        let sent = sent_requests(&transport);
        assert_eq!(sent.len(), 2);
        assert!(!sent[1].is_active());
        assert_eq!(requester.close().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_requests_are_sent() {
        let (transport, _router, requester) = requester().await;

        requester.discover_sensors(&watch());
        requester.query_status(&watch());
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(transport.sent_on(paths::GET_SENSORS).len(), 1);
        assert_eq!(transport.sent_on(paths::GET_STATUS).len(), 1);
    }

    // ===== ResponseCollector =====

    #[tokio::test]
    async fn responses_fill_buffers_and_publish() {
        let collector = ResponseCollector::new(Some(4));
        let mut updates = collector.updates();

        collector
            .handle_response(&response(1, &[1, 2, 3], 0, 3))
            .unwrap();
        collector
            .handle_response(&response(1, &[4, 5], 3, 5))
            .unwrap();

        let buffer = collector.samples(&watch(), 1).unwrap();
        let timestamps: Vec<i64> = buffer.samples().map(Sample::timestamp).collect();
        assert_eq!(timestamps, vec![2, 3, 4, 5]);

        let first = updates.recv().await.unwrap();
        assert_eq!(first.device, watch());
        assert_eq!(first.source_type, 1);
        assert_eq!(first.samples.len(), 3);
        assert_eq!((first.start_timestamp, first.end_timestamp), (0, 3));
        let second = updates.recv().await.unwrap();
        assert_eq!(second.samples.len(), 2);
    }

    #[tokio::test]
    async fn empty_batches_are_not_published() {
        let collector = ResponseCollector::new(None);
        let mut updates = collector.updates();

        collector.handle_response(&response(1, &[], 0, 100)).unwrap();

        assert!(updates.try_recv().is_err());
        assert!(collector.samples(&watch(), 1).unwrap().is_empty());
    }

    #[test]
    fn garbage_response_is_a_decode_error() {
        let collector = ResponseCollector::new(None);
        let message = Message::new(paths::SENSOR_DATA_REQUEST_RESPONSE, watch(), vec![0xc1]);
        assert!(matches!(
            collector.handle_response(&message),
            Err(HandlerError::Decode { .. })
        ));
    }

    #[test]
    fn sensor_lists_and_statuses_are_cached() {
        let collector = ResponseCollector::new(None);
        let list = SensorList::new(vec![DeviceSensor::new(21, "Heart Rate")]);
        let status = NodeStatus {
            device_label: "Watch".to_string(),
            connected: true,
            local_node_id: Some(watch()),
            reachable_nodes: Vec::new(),
            active_subscriptions: 1,
            updated_at: 42,
        };

        collector
            .handle_sensors(&Message::new(paths::SET_SENSORS, watch(), list.to_bytes().unwrap()))
            .unwrap();
        collector
            .handle_status(&Message::new(paths::SET_STATUS, watch(), status.to_bytes().unwrap()))
            .unwrap();

        assert_eq!(collector.sensors_of(&watch()), Some(list));
        assert_eq!(collector.status_of(&watch()), Some(status));
        assert!(collector.sensors_of(&DeviceId::new("P1")).is_none());
    }

    #[tokio::test]
    async fn registered_handlers_receive_messages() {
        let router = MessageRouter::new();
        let collector = Arc::new(ResponseCollector::new(None));
        collector.register(&router);
        collector.register(&router);
        assert_eq!(router.len(), 3);

        assert_eq!(router.dispatch(&response(4, &[7], 0, 7)), 1);
        assert_eq!(collector.samples(&watch(), 4).unwrap().len(), 1);

        collector.unregister(&router);
        assert!(router.is_empty());
    }
}
