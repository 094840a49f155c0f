//! Sensor sources and the per-source sample buffers fed by them.
//!
//! A [`SensorSource`] is the platform sensor API. The [`SensorDataManager`]
//! owns one [`SampleBuffer`] per source tag and keeps the source subscribed
//! for as long as at least one requester holds that tag. The source writes
//! through a [`SampleSink`]; readers take snapshots under a read lock.

mod mock;
mod simulated;

pub use mock::{MockSensorSource, SensorCall};
pub use simulated::{SimulatedSensorSource, ACCELEROMETER, GYROSCOPE, HEART_RATE};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use sense_types::{DeviceId, Sample, SampleBuffer, SensorList, SourceTag};

use crate::error::SensorError;
use crate::locks;

/// The platform's sensor API.
pub trait SensorSource: Send + Sync {
    /// Sensors this device offers.
    fn available_sensors(&self) -> SensorList;

    /// Start delivering readings for `tag` into `sink`.
    fn subscribe(&self, tag: SourceTag, sink: SampleSink) -> Result<(), SensorError>;

    /// Stop delivering readings for `tag`.
    fn unsubscribe(&self, tag: SourceTag);
}

/// Write handle to one source's buffer. The sensor source is its only writer.
#[derive(Debug, Clone)]
pub struct SampleSink {
    tag: SourceTag,
    buffer: Arc<RwLock<SampleBuffer>>,
}

impl SampleSink {
    fn new(tag: SourceTag, buffer: Arc<RwLock<SampleBuffer>>) -> Self {
        Self { tag, buffer }
    }

    /// Source tag this sink feeds.
    pub fn tag(&self) -> SourceTag {
        self.tag
    }

    /// Source name of the buffer.
    pub fn source_name(&self) -> String {
        locks::read(&self.buffer).source().to_string()
    }

    /// Append one reading.
    pub fn push(&self, sample: Sample) {
        locks::write(&self.buffer).add_sample(sample);
    }

    /// Append several readings in order.
    pub fn push_all(&self, samples: impl IntoIterator<Item = Sample>) {
        locks::write(&self.buffer).add_samples(samples);
    }
}

/// Owns the sample buffers and reference-counts source subscriptions.
pub struct SensorDataManager {
    source: Arc<dyn SensorSource>,
    capacity: Option<usize>,
    buffers: DashMap<SourceTag, Arc<RwLock<SampleBuffer>>>,
    holders: Mutex<HashMap<SourceTag, HashSet<DeviceId>>>,
}

impl SensorDataManager {
    /// Create a manager whose buffers hold at most `capacity` samples
    /// (`None` = unlimited).
    pub fn new(source: Arc<dyn SensorSource>, capacity: Option<usize>) -> Self {
        Self {
            source,
            capacity,
            buffers: DashMap::new(),
            holders: Mutex::new(HashMap::new()),
        }
    }

    /// Sensors offered by the underlying source.
    pub fn available_sensors(&self) -> SensorList {
        self.source.available_sensors()
    }

    /// The buffer for `tag`, created on first access.
    fn buffer(&self, tag: SourceTag) -> Result<Arc<RwLock<SampleBuffer>>, SensorError> {
        if let Some(buffer) = self.buffers.get(&tag) {
            return Ok(Arc::clone(buffer.value()));
        }

        let sensors = self.source.available_sensors();
        let sensor = sensors.find(tag).ok_or(SensorError::UnknownSource(tag))?;
        let buffer = self
            .buffers
            .entry(tag)
            .or_insert_with(|| {
                tracing::debug!("Creating buffer for source {} ({})", tag, sensor.name);
                Arc::new(RwLock::new(SampleBuffer::with_capacity(
                    &sensor.name,
                    tag,
                    self.capacity,
                )))
            })
            .clone();
        Ok(buffer)
    }

    /// Hold `tag` on behalf of `holder`, subscribing the source if this is
    /// the first holder.
    ///
    /// Returns `false` if `holder` already held the tag.
    pub fn subscribe(&self, tag: SourceTag, holder: &DeviceId) -> Result<bool, SensorError> {
        let mut holders = locks::lock(&self.holders);
        if let Some(set) = holders.get_mut(&tag) {
            return Ok(set.insert(holder.clone()));
        }

        let buffer = self.buffer(tag)?;
        self.source.subscribe(tag, SampleSink::new(tag, buffer))?;
        tracing::info!("Subscribed to source {} for {}", tag, holder);
        holders.insert(tag, HashSet::from([holder.clone()]));
        Ok(true)
    }

    /// Release `tag` for `holder`, unsubscribing the source once nobody
    /// holds it. Returns `false` if `holder` did not hold the tag.
    pub fn unsubscribe(&self, tag: SourceTag, holder: &DeviceId) -> bool {
        let mut holders = locks::lock(&self.holders);
        let Some(set) = holders.get_mut(&tag) else {
            return false;
        };
        if !set.remove(holder) {
            return false;
        }
        if set.is_empty() {
            holders.remove(&tag);
            self.source.unsubscribe(tag);
            tracing::info!("Unsubscribed from source {}", tag);
        }
        true
    }

    /// Release every tag held by `holder`. Returns the released tags.
    pub fn unsubscribe_all(&self, holder: &DeviceId) -> Vec<SourceTag> {
        let held: Vec<SourceTag> = locks::lock(&self.holders)
            .iter()
            .filter(|(_, set)| set.contains(holder))
            .map(|(tag, _)| *tag)
            .collect();
        held.into_iter()
            .filter(|tag| self.unsubscribe(*tag, holder))
            .collect()
    }

    /// Whether the source is currently subscribed for `tag`.
    pub fn is_subscribed(&self, tag: SourceTag) -> bool {
        locks::lock(&self.holders).contains_key(&tag)
    }

    /// Number of requesters holding `tag`.
    pub fn holder_count(&self, tag: SourceTag) -> usize {
        locks::lock(&self.holders)
            .get(&tag)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Copy of the buffer for `tag`, if it exists.
    pub fn buffer_snapshot(&self, tag: SourceTag) -> Option<SampleBuffer> {
        let buffer = self.buffers.get(&tag).map(|b| Arc::clone(b.value()))?;
        let snapshot = locks::read(&buffer).clone();
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sense_types::DeviceSensor;

    fn manager() -> (Arc<MockSensorSource>, SensorDataManager) {
        let source = Arc::new(MockSensorSource::new(SensorList::new(vec![
            DeviceSensor::new(1, "Accelerometer"),
            DeviceSensor::new(4, "Gyroscope"),
        ])));
        let manager = SensorDataManager::new(source.clone(), Some(3));
        (source, manager)
    }

    fn watch() -> DeviceId {
        DeviceId::new("W1")
    }

    fn phone() -> DeviceId {
        DeviceId::new("P1")
    }

    #[test]
    fn unknown_source_is_rejected() {
        let (source, manager) = manager();
        let result = manager.subscribe(99, &watch());
        assert!(matches!(result, Err(SensorError::UnknownSource(99))));
        assert!(source.calls().is_empty());
        assert!(!manager.is_subscribed(99));
    }

    #[test]
    fn subscribe_is_idempotent_per_holder() {
        let (source, manager) = manager();

        assert!(manager.subscribe(1, &watch()).unwrap());
        assert!(!manager.subscribe(1, &watch()).unwrap());

        assert_eq!(source.calls(), vec![SensorCall::Subscribe(1)]);
        assert_eq!(manager.holder_count(1), 1);
    }

    #[test]
    fn source_stays_subscribed_while_held() {
        let (source, manager) = manager();
        manager.subscribe(1, &watch()).unwrap();
        manager.subscribe(1, &phone()).unwrap();

        assert!(manager.unsubscribe(1, &watch()));
        assert!(manager.is_subscribed(1));
        assert_eq!(source.calls(), vec![SensorCall::Subscribe(1)]);

        assert!(manager.unsubscribe(1, &phone()));
        assert!(!manager.is_subscribed(1));
        assert_eq!(
            source.calls(),
            vec![SensorCall::Subscribe(1), SensorCall::Unsubscribe(1)]
        );

        assert!(!manager.unsubscribe(1, &phone()));
    }

    #[test]
    fn unsubscribe_all_releases_only_holders_tags() {
        let (_source, manager) = manager();
        manager.subscribe(1, &watch()).unwrap();
        manager.subscribe(4, &watch()).unwrap();
        manager.subscribe(4, &phone()).unwrap();

        let mut released = manager.unsubscribe_all(&watch());
        released.sort();

        assert_eq!(released, vec![1, 4]);
        assert!(!manager.is_subscribed(1));
        assert!(manager.is_subscribed(4));
    }

    #[test]
    fn sink_writes_into_bounded_buffer() {
        let (source, manager) = manager();
        manager.subscribe(1, &watch()).unwrap();

        for ts in 1..=4 {
            assert!(source.emit(1, Sample::new(ts, "Accelerometer", vec![0.0, 0.0, 9.81])));
        }

        let snapshot = manager.buffer_snapshot(1).unwrap();
        assert_eq!(snapshot.source(), "Accelerometer");
        assert_eq!(snapshot.source_type(), 1);
        let timestamps: Vec<i64> = snapshot.samples().map(Sample::timestamp).collect();
        assert_eq!(timestamps, vec![2, 3, 4]);
    }

    #[test]
    fn buffer_survives_resubscription() {
        let (source, manager) = manager();
        manager.subscribe(1, &watch()).unwrap();
        source.emit(1, Sample::new(10, "Accelerometer", vec![1.0]));
        manager.unsubscribe(1, &watch());

        manager.subscribe(1, &watch()).unwrap();
        source.emit(1, Sample::new(20, "Accelerometer", vec![1.0]));

        assert_eq!(manager.buffer_snapshot(1).unwrap().len(), 2);
    }

    #[test]
    fn snapshot_of_untouched_source_is_none() {
        let (_source, manager) = manager();
        assert!(manager.buffer_snapshot(4).is_none());
    }

    #[test]
    fn failed_subscribe_leaves_no_holder() {
        let (source, manager) = manager();
        source.fail_next_subscribe("sensor busy");

        assert!(matches!(
            manager.subscribe(1, &watch()),
            Err(SensorError::SubscribeFailed { tag: 1, .. })
        ));
        assert!(!manager.is_subscribed(1));

        assert!(manager.subscribe(1, &watch()).unwrap());
    }
}
