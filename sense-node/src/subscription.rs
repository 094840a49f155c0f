//! Provider side of the streaming protocol.
//!
//! One [`ResponseGenerator`] exists per requesting device. While running it
//! ticks on the current request's interval; every tick sends the samples
//! produced since the previous tick as one [`DataRequestResponse`] covering
//! `[previous end, now)`. A request with an end timestamp that has passed
//! stops it, and so does a run of consecutive failed deliveries.
//!
//! The [`SubscriptionService`] decodes `/sensor_data_request` messages and
//! routes them to the sender's generator, creating it on first contact.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use sense_core::{DeliveryCursor, RequestDecision, StopReason, TickOutcome};
use sense_types::{paths, DataRequest, DataRequestResponse, DeviceId, Message, SourceTag};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::clock::Clock;
use crate::error::HandlerError;
use crate::locks;
use crate::messenger::Messenger;
use crate::sensors::SensorDataManager;

/// Present while the tick loop runs.
struct RunHandle {
    generation: u64,
    // Dropping the sender also stops the loop.
    _stop: oneshot::Sender<()>,
}

/// Streams sensor data to one requester.
pub struct ResponseGenerator {
    requester: DeviceId,
    messenger: Messenger,
    sensors: Arc<SensorDataManager>,
    clock: Arc<dyn Clock>,
    request: RwLock<Option<Arc<DataRequest>>>,
    cursor: Mutex<DeliveryCursor>,
    run: Mutex<Option<RunHandle>>,
    generation: AtomicU64,
    // Held for a whole tick so a restarted loop waits for the old tick.
    tick_turn: AsyncMutex<()>,
    held: Mutex<BTreeSet<SourceTag>>,
}

impl ResponseGenerator {
    /// Create a stopped generator for `requester`.
    pub fn new(
        requester: DeviceId,
        messenger: Messenger,
        sensors: Arc<SensorDataManager>,
        clock: Arc<dyn Clock>,
        max_failures: u32,
    ) -> Self {
        Self {
            requester,
            messenger,
            sensors,
            clock,
            request: RwLock::new(None),
            cursor: Mutex::new(DeliveryCursor::new(max_failures)),
            run: Mutex::new(None),
            generation: AtomicU64::new(0),
            tick_turn: AsyncMutex::new(()),
            held: Mutex::new(BTreeSet::new()),
        }
    }

    /// Device the responses go to.
    pub fn requester(&self) -> &DeviceId {
        &self.requester
    }

    /// Apply a new or updated request.
    ///
    /// An ended request stops the generator and releases its sources. An
    /// open one (re)subscribes the requested sources and starts the tick
    /// loop if it is not running; a running loop keeps its schedule and
    /// picks up the new request on its next tick.
    pub fn handle_request(self: &Arc<Self>, request: DataRequest) {
        let request = Arc::new(request);
        *locks::write(&self.request) = Some(Arc::clone(&request));

        let now = self.clock.now_millis();
        let mut run = locks::lock(&self.run);
        let decision = locks::lock(&self.cursor).on_request(&request, now, run.is_some());

        match decision {
            RequestDecision::Stop(reason) => {
                let was_running = run.take().is_some();
                drop(run);
                self.release_sources();
                if was_running {
                    tracing::info!("Stopped streaming to {} ({:?})", self.requester, reason);
                }
            }
            RequestDecision::KeepRunning => {
                drop(run);
                self.sync_sources(&request);
                tracing::debug!(
                    "Updated stream to {}: sources {:?}, every {}ms",
                    self.requester,
                    request.sources,
                    request.update_interval_ms
                );
            }
            RequestDecision::Start => {
                self.sync_sources(&request);
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let (stop_tx, stop_rx) = oneshot::channel();
                *run = Some(RunHandle {
                    generation,
                    _stop: stop_tx,
                });
                drop(run);

                tracing::info!(
                    "Streaming sources {:?} to {} every {}ms",
                    request.sources,
                    self.requester,
                    request.update_interval_ms
                );
                let generator = Arc::clone(self);
                tokio::spawn(generator.run_loop(generation, stop_rx));
            }
        }
    }

    /// Stop the tick loop and release every source. Returns whether it was
    /// running. A tick in progress completes first.
    pub fn stop(&self) -> bool {
        let was_running = locks::lock(&self.run).take().is_some();
        self.release_sources();
        if was_running {
            tracing::info!("Stopped streaming to {}", self.requester);
        }
        was_running
    }

    /// Whether the tick loop is running.
    pub fn is_running(&self) -> bool {
        locks::lock(&self.run).is_some()
    }

    /// The request the next tick will use.
    pub fn current_request(&self) -> Option<Arc<DataRequest>> {
        locks::read(&self.request).clone()
    }

    /// End of the last delivered (or attempted) window.
    pub fn last_end_timestamp(&self) -> Option<i64> {
        locks::lock(&self.cursor).last_end()
    }

    /// Deliveries that failed in a row.
    pub fn consecutive_failures(&self) -> u32 {
        locks::lock(&self.cursor).consecutive_failures()
    }

    /// Sources currently held for the requester.
    pub fn held_sources(&self) -> Vec<SourceTag> {
        locks::lock(&self.held).iter().copied().collect()
    }

    fn sync_sources(&self, request: &DataRequest) {
        let mut held = locks::lock(&self.held);

        let dropped: Vec<SourceTag> = held.difference(&request.sources).copied().collect();
        for tag in dropped {
            self.sensors.unsubscribe(tag, &self.requester);
            held.remove(&tag);
        }

        for &tag in &request.sources {
            match self.sensors.subscribe(tag, &self.requester) {
                Ok(_) => {
                    held.insert(tag);
                }
                Err(e) => {
                    tracing::warn!("Cannot stream source {} to {}: {}", tag, self.requester, e);
                }
            }
        }
    }

    fn release_sources(&self) {
        let mut held = locks::lock(&self.held);
        for tag in std::mem::take(&mut *held) {
            self.sensors.unsubscribe(tag, &self.requester);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        locks::lock(&self.run).as_ref().map(|h| h.generation) == Some(generation)
    }

    async fn run_loop(self: Arc<Self>, generation: u64, mut stop: oneshot::Receiver<()>) {
        loop {
            let outcome = {
                let _turn = self.tick_turn.lock().await;
                if !self.is_current(generation) {
                    tracing::debug!("Tick loop for {} superseded", self.requester);
                    return;
                }
                self.tick().await
            };
            if let TickOutcome::Stop(reason) = outcome {
                self.finish(generation, reason);
                return;
            }

            let interval = self
                .current_request()
                .map(|r| r.update_interval_ms)
                .unwrap_or(DataRequest::UPDATE_INTERVAL_DEFAULT)
                .max(1);

            tokio::select! {
                biased;
                _ = &mut stop => {
                    tracing::debug!("Tick loop for {} interrupted", self.requester);
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(interval)) => {}
            }
        }
    }

    async fn tick(&self) -> TickOutcome {
        let Some(request) = self.current_request() else {
            return TickOutcome::Stop(StopReason::RequestEnded);
        };

        let now = self.clock.now_millis();
        let (window, since) = {
            let cursor = locks::lock(&self.cursor);
            (cursor.window(&request, now), cursor.since_cutoff())
        };

        let batches = request
            .sources
            .iter()
            .filter_map(|tag| self.sensors.buffer_snapshot(*tag))
            .map(|buffer| buffer.snapshot_between(since, window.end))
            .collect();
        let response = DataRequestResponse::new(batches, window.start, window.end);
        let samples = response.sample_count();

        let delivered = match response.to_bytes() {
            Ok(payload) => match self
                .messenger
                .send_with_result(paths::SENSOR_DATA_REQUEST_RESPONSE, payload, &self.requester)
                .await
            {
                Ok(()) => {
                    tracing::trace!(
                        "Sent {} samples for [{}, {}) to {}",
                        samples,
                        window.start,
                        window.end,
                        self.requester
                    );
                    true
                }
                Err(e) => {
                    tracing::debug!("Delivery to {} failed: {}", self.requester, e);
                    false
                }
            },
            Err(e) => {
                tracing::warn!("Failed to encode response for {}: {}", self.requester, e);
                false
            }
        };

        locks::lock(&self.cursor).on_tick(&request, window.end, delivered)
    }

    fn finish(&self, generation: u64, reason: StopReason) {
        let mut run = locks::lock(&self.run);
        if run.as_ref().map(|h| h.generation) != Some(generation) {
            return;
        }
        *run = None;
        drop(run);
        self.release_sources();

        match reason {
            StopReason::CircuitOpen => tracing::warn!(
                "Stopped streaming to {} after {} failed deliveries",
                self.requester,
                self.consecutive_failures()
            ),
            StopReason::RequestEnded => {
                tracing::info!("Stream to {} ended", self.requester)
            }
        }
    }
}

/// Routes `/sensor_data_request` messages to per-requester generators.
pub struct SubscriptionService {
    messenger: Messenger,
    sensors: Arc<SensorDataManager>,
    clock: Arc<dyn Clock>,
    max_failures: u32,
    generators: DashMap<DeviceId, Arc<ResponseGenerator>>,
}

impl SubscriptionService {
    /// Create a service with no generators.
    pub fn new(
        messenger: Messenger,
        sensors: Arc<SensorDataManager>,
        clock: Arc<dyn Clock>,
        max_failures: u32,
    ) -> Self {
        Self {
            messenger,
            sensors,
            clock,
            max_failures,
            generators: DashMap::new(),
        }
    }

    /// Handle one `/sensor_data_request` message.
    ///
    /// Responses go to the message's sender; a message without a sender is
    /// treated as coming from this device.
    pub fn handle_message(&self, message: &Message) -> Result<(), HandlerError> {
        let request = DataRequest::from_bytes(&message.payload)
            .map_err(|e| HandlerError::decode(&message.path, e))?;

        let requester = if message.source.is_missing() {
            DeviceId::local()
        } else {
            message.source.clone()
        };
        if request.source_device_id != requester {
            tracing::debug!(
                "Request names {} but came from {}; replying to sender",
                request.source_device_id,
                requester
            );
        }

        let generator = self.generator_for(&requester);
        generator.handle_request(request);
        Ok(())
    }

    fn generator_for(&self, requester: &DeviceId) -> Arc<ResponseGenerator> {
        self.generators
            .entry(requester.clone())
            .or_insert_with(|| {
                tracing::debug!("New response generator for {}", requester);
                Arc::new(ResponseGenerator::new(
                    requester.clone(),
                    self.messenger.clone(),
                    Arc::clone(&self.sensors),
                    Arc::clone(&self.clock),
                    self.max_failures,
                ))
            })
            .clone()
    }

    /// The generator for `requester`, if one was created.
    pub fn generator(&self, requester: &DeviceId) -> Option<Arc<ResponseGenerator>> {
        self.generators.get(requester).map(|g| Arc::clone(g.value()))
    }

    /// Number of generators currently running.
    pub fn active_count(&self) -> usize {
        self.generators.iter().filter(|g| g.is_running()).count()
    }

    /// Stop every generator.
    pub fn stop_all(&self) {
        let generators: Vec<Arc<ResponseGenerator>> =
            self.generators.iter().map(|g| Arc::clone(g.value())).collect();
        for generator in generators {
            generator.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::router::MessageRouter;
    use crate::sensors::{MockSensorSource, SensorCall};
    use crate::transport::MockTransport;
    use sense_types::{DeviceSensor, Node, Sample, SensorList};

    struct Fixture {
        transport: MockTransport,
        source: Arc<MockSensorSource>,
        service: SubscriptionService,
        _router: Arc<MessageRouter>,
    }

    async fn fixture(capacity: Option<usize>, max_failures: u32) -> Fixture {
        let transport = MockTransport::new(Node::nearby("P1", "Phone"));
        transport.add_node(Node::nearby("W1", "Watch"));
        let router = Arc::new(MessageRouter::new());
        let messenger = Messenger::new(Arc::new(transport.clone()), &router);
        messenger.connect().await.unwrap();

        let source = Arc::new(MockSensorSource::new(SensorList::new(vec![
            DeviceSensor::new(1, "Accelerometer"),
            DeviceSensor::new(4, "Gyroscope"),
        ])));
        let sensors = Arc::new(SensorDataManager::new(source.clone(), capacity));
        let service = SubscriptionService::new(
            messenger,
            sensors,
            Arc::new(TokioClock::starting_at(1_000)),
            max_failures,
        );
        Fixture {
            transport,
            source,
            service,
            _router: router,
        }
    }

    fn watch() -> DeviceId {
        DeviceId::new("W1")
    }

    fn request_message(request: &DataRequest) -> Message {
        Message::new(
            paths::SENSOR_DATA_REQUEST,
            watch(),
            request.to_bytes().unwrap(),
        )
    }

    fn responses(transport: &MockTransport) -> Vec<DataRequestResponse> {
        transport
            .sent_on(paths::SENSOR_DATA_REQUEST_RESPONSE)
            .iter()
            .map(|m| DataRequestResponse::from_bytes(&m.payload).unwrap())
            .collect()
    }

    fn timestamps(response: &DataRequestResponse) -> Vec<i64> {
        response
            .batches
            .iter()
            .flat_map(|b| b.samples().map(Sample::timestamp))
            .collect()
    }

    // ===== Windowing =====

    #[tokio::test(start_paused = true)]
    async fn first_windows_follow_interval() {
        let f = fixture(Some(3), 10).await;
        for ts in 1..=4 {
            // Not subscribed yet: dropped by the mock
            f.source.emit(1, Sample::new(ts, "Accelerometer", vec![0.0]));
        }
        let request = DataRequest::new(watch(), [1], 1_000).with_interval(50);

        f.service.handle_message(&request_message(&request)).unwrap();
        for ts in 1..=4 {
            f.source.emit(1, Sample::new(ts, "Accelerometer", vec![0.0]));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        for ts in [1_010, 1_020, 1_030, 1_040] {
            f.source.emit(1, Sample::new(ts, "Accelerometer", vec![0.0]));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let generator = f.service.generator(&watch()).unwrap();
        assert!(generator.is_running());
        assert_eq!(generator.last_end_timestamp(), Some(1_050));

        let sent = responses(&f.transport);
        assert_eq!(sent.len(), 2);
        // First tick runs at once and carries everything buffered
        assert_eq!((sent[0].start_timestamp, sent[0].end_timestamp), (1_000, 1_000));
        assert_eq!(timestamps(&sent[0]), vec![2, 3, 4]);
        // Second tick carries only what arrived since, bounded by capacity 3
        assert_eq!((sent[1].start_timestamp, sent[1].end_timestamp), (1_000, 1_050));
        assert_eq!(timestamps(&sent[1]), vec![1_020, 1_030, 1_040]);
        assert_eq!(sent[1].batches[0].source_type(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn windows_are_contiguous() {
        let f = fixture(None, 10).await;
        let request = DataRequest::new(watch(), [1, 4], 1_000).with_interval(50);

        f.service.handle_message(&request_message(&request)).unwrap();
        tokio::time::sleep(Duration::from_millis(210)).await;

        let sent = responses(&f.transport);
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[0].start_timestamp, 1_000);
        for pair in sent.windows(2) {
            assert_eq!(pair[0].end_timestamp, pair[1].start_timestamp);
        }
        assert_eq!(sent[4].end_timestamp, 1_200);
        // One batch per requested source once buffers exist
        assert_eq!(sent[4].batches.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn every_sample_is_delivered_once() {
        let f = fixture(None, 10).await;
        let request = DataRequest::new(watch(), [1], 1_000).with_interval(50);
        f.service.handle_message(&request_message(&request)).unwrap();

        let mut produced = Vec::new();
        for step in 1..=20 {
            tokio::time::sleep(Duration::from_millis(7)).await;
            let ts = 1_000 + step * 7;
            f.source.emit(1, Sample::new(ts, "Accelerometer", vec![0.0]));
            produced.push(ts);
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        let delivered: Vec<i64> = responses(&f.transport).iter().flat_map(timestamps).collect();
        assert_eq!(delivered, produced);
    }

    #[tokio::test(start_paused = true)]
    async fn samples_stamped_after_tick_wait_for_next_window() {
        let f = fixture(None, 10).await;
        let request = DataRequest::new(watch(), [1], 1_000).with_interval(50);
        f.service.handle_message(&request_message(&request)).unwrap();
        assert!(f.source.emit(1, Sample::new(1_030, "Accelerometer", vec![0.0])));
        tokio::time::sleep(Duration::from_millis(60)).await;

        let sent = responses(&f.transport);
        assert_eq!(sent.len(), 2);
        assert!(timestamps(&sent[0]).is_empty());
        assert_eq!((sent[1].start_timestamp, sent[1].end_timestamp), (1_000, 1_050));
        assert_eq!(timestamps(&sent[1]), vec![1_030]);
    }

    // ===== Lifecycle =====

    #[tokio::test(start_paused = true)]
    async fn restart_waits_for_tick_in_flight() {
        let f = fixture(None, 10).await;
        f.transport.set_send_delay(Duration::from_millis(30));
        let request = DataRequest::new(watch(), [1], 1_000).with_interval(50);
        f.service.handle_message(&request_message(&request)).unwrap();
        assert!(f.source.emit(1, Sample::new(500, "Accelerometer", vec![0.0])));
        tokio::time::sleep(Duration::from_millis(10)).await;

        // First tick is still sending when the stream is cancelled and reopened
        let mut cancel = DataRequest::new(watch(), [1], 1_000).with_interval(50);
        cancel.cancel_at(1_010);
        f.service.handle_message(&request_message(&cancel)).unwrap();
        f.service.handle_message(&request_message(&request)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let sent = responses(&f.transport);
        let delivered: Vec<i64> = sent.iter().flat_map(timestamps).collect();
        assert_eq!(delivered, vec![500]);
        assert_eq!(sent[0].start_timestamp, 1_000);
        for pair in sent.windows(2) {
            assert_eq!(pair[0].end_timestamp, pair[1].start_timestamp);
        }
        assert!(f.service.generator(&watch()).unwrap().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn ended_request_stops_and_releases() {
        let f = fixture(None, 10).await;
        let mut request = DataRequest::new(watch(), [1], 1_000).with_interval(50);
        f.service.handle_message(&request_message(&request)).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        request.cancel_at(1_120);
        f.service.handle_message(&request_message(&request)).unwrap();
        let sent_before = responses(&f.transport).len();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let generator = f.service.generator(&watch()).unwrap();
        assert!(!generator.is_running());
        assert!(generator.held_sources().is_empty());
        assert_eq!(responses(&f.transport).len(), sent_before);
        assert_eq!(
            f.source.calls(),
            vec![SensorCall::Subscribe(1), SensorCall::Unsubscribe(1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn future_end_stops_after_final_window() {
        let f = fixture(None, 10).await;
        let mut request = DataRequest::new(watch(), [1], 1_000).with_interval(50);
        request.cancel_at(1_100);

        f.service.handle_message(&request_message(&request)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let sent = responses(&f.transport);
        assert_eq!(sent.last().unwrap().end_timestamp, 1_100);
        assert_eq!(sent.len(), 3);
        assert!(!f.service.generator(&watch()).unwrap().is_running());
        assert!(!f.source.is_subscribed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn new_request_keeps_running_schedule() {
        let f = fixture(None, 10).await;
        let request = DataRequest::new(watch(), [1], 1_000).with_interval(50);
        f.service.handle_message(&request_message(&request)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let slower = DataRequest::new(watch(), [1], 1_000).with_interval(100);
        f.service.handle_message(&request_message(&slower)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let ends: Vec<i64> = responses(&f.transport)
            .iter()
            .map(|r| r.end_timestamp)
            .collect();
        // Sleep already in progress finishes at 1_050, then 100ms apart
        assert_eq!(ends, vec![1_000, 1_050, 1_150]);
        let generator = f.service.generator(&watch()).unwrap();
        assert_eq!(generator.current_request().unwrap().update_interval_ms, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn updated_sources_are_resubscribed() {
        let f = fixture(None, 10).await;
        let request = DataRequest::new(watch(), [1], 1_000).with_interval(50);
        f.service.handle_message(&request_message(&request)).unwrap();

        let switched = DataRequest::new(watch(), [4], 1_000).with_interval(50);
        f.service.handle_message(&request_message(&switched)).unwrap();

        assert_eq!(
            f.source.calls(),
            vec![
                SensorCall::Subscribe(1),
                SensorCall::Unsubscribe(1),
                SensorCall::Subscribe(4)
            ]
        );
        assert_eq!(f.service.generator(&watch()).unwrap().held_sources(), vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_sleep() {
        let f = fixture(None, 10).await;
        let request = DataRequest::new(watch(), [1], 1_000).with_interval(1_000);
        f.service.handle_message(&request_message(&request)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let generator = f.service.generator(&watch()).unwrap();
        assert!(generator.stop());
        assert!(!generator.stop());
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        assert_eq!(responses(&f.transport).len(), 1);
        assert!(!f.source.is_subscribed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_sources_are_skipped() {
        let f = fixture(None, 10).await;
        let request = DataRequest::new(watch(), [1, 99], 1_000).with_interval(50);
        f.service.handle_message(&request_message(&request)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let generator = f.service.generator(&watch()).unwrap();
        assert!(generator.is_running());
        assert_eq!(generator.held_sources(), vec![1]);
    }

    // ===== Circuit breaker =====

    #[tokio::test(start_paused = true)]
    async fn circuit_opens_after_ten_failures() {
        let f = fixture(None, 10).await;
        f.transport.set_unreachable(&watch());
        let request = DataRequest::new(watch(), [1], 1_000).with_interval(50);

        f.service.handle_message(&request_message(&request)).unwrap();
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let generator = f.service.generator(&watch()).unwrap();
        assert!(!generator.is_running());
        assert_eq!(generator.consecutive_failures(), 10);
        // Tenth failed tick ran at 1_450
        assert_eq!(generator.last_end_timestamp(), Some(1_450));
        assert!(!f.source.is_subscribed(1));

        // Re-requesting recovers
        f.transport.set_reachable(&watch());
        f.service.handle_message(&request_message(&request)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(generator.is_running());
        assert_eq!(generator.consecutive_failures(), 0);
        assert_eq!(responses(&f.transport).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let f = fixture(None, 10).await;
        let request = DataRequest::new(watch(), [1], 1_000).with_interval(50);
        f.transport.set_unreachable(&watch());
        f.service.handle_message(&request_message(&request)).unwrap();
        tokio::time::sleep(Duration::from_millis(160)).await;

        let generator = f.service.generator(&watch()).unwrap();
        assert_eq!(generator.consecutive_failures(), 4);

        f.transport.set_reachable(&watch());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(generator.consecutive_failures(), 0);
        assert!(generator.is_running());
    }

    // ===== Service =====

    #[tokio::test]
    async fn malformed_request_is_a_decode_error() {
        let f = fixture(None, 10).await;
        let message = Message::new(paths::SENSOR_DATA_REQUEST, watch(), vec![0xc1, 0x00]);

        let result = f.service.handle_message(&message);
        assert!(matches!(result, Err(HandlerError::Decode { .. })));
        assert!(f.service.generator(&watch()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn one_generator_per_requester() {
        let f = fixture(None, 10).await;
        let request = DataRequest::new(watch(), [1], 1_000).with_interval(50);
        f.service.handle_message(&request_message(&request)).unwrap();
        f.service.handle_message(&request_message(&request)).unwrap();

        let anonymous = Message::new(
            paths::SENSOR_DATA_REQUEST,
            DeviceId::new(""),
            request.to_bytes().unwrap(),
        );
        f.service.handle_message(&anonymous).unwrap();

        assert!(f.service.generator(&DeviceId::local()).is_some());
        assert_eq!(f.service.active_count(), 2);

        f.service.stop_all();
        assert_eq!(f.service.active_count(), 0);
    }
}
