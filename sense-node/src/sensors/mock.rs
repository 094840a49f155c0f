//! Mock sensor source for testing.

use std::collections::HashMap;
use std::sync::Mutex;

use sense_types::{Sample, SensorList, SourceTag};

use super::{SampleSink, SensorSource};
use crate::error::SensorError;
use crate::locks;

/// A call received by [`MockSensorSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCall {
    /// `subscribe(tag)`
    Subscribe(SourceTag),
    /// `unsubscribe(tag)`
    Unsubscribe(SourceTag),
}

/// Sensor source driven by the test: readings are pushed with [`emit`](Self::emit).
#[derive(Debug)]
pub struct MockSensorSource {
    sensors: SensorList,
    inner: Mutex<MockSensorInner>,
}

#[derive(Debug, Default)]
struct MockSensorInner {
    sinks: HashMap<SourceTag, SampleSink>,
    calls: Vec<SensorCall>,
    fail_next_subscribe: Option<String>,
}

impl MockSensorSource {
    /// Create a mock offering `sensors`.
    pub fn new(sensors: SensorList) -> Self {
        Self {
            sensors,
            inner: Mutex::new(MockSensorInner::default()),
        }
    }

    /// Push a reading for `tag`. Returns `false` if `tag` is not subscribed.
    pub fn emit(&self, tag: SourceTag, sample: Sample) -> bool {
        let sink = locks::lock(&self.inner).sinks.get(&tag).cloned();
        match sink {
            Some(sink) => {
                sink.push(sample);
                true
            }
            None => false,
        }
    }

    /// Every subscribe/unsubscribe call so far.
    pub fn calls(&self) -> Vec<SensorCall> {
        locks::lock(&self.inner).calls.clone()
    }

    /// Whether `tag` is currently subscribed.
    pub fn is_subscribed(&self, tag: SourceTag) -> bool {
        locks::lock(&self.inner).sinks.contains_key(&tag)
    }

    /// Cause the next subscribe() to fail with the given reason.
    pub fn fail_next_subscribe(&self, reason: &str) {
        locks::lock(&self.inner).fail_next_subscribe = Some(reason.to_string());
    }
}

impl SensorSource for MockSensorSource {
    fn available_sensors(&self) -> SensorList {
        self.sensors.clone()
    }

    fn subscribe(&self, tag: SourceTag, sink: SampleSink) -> Result<(), SensorError> {
        let mut inner = locks::lock(&self.inner);
        if let Some(reason) = inner.fail_next_subscribe.take() {
            return Err(SensorError::SubscribeFailed { tag, reason });
        }
        inner.calls.push(SensorCall::Subscribe(tag));
        inner.sinks.insert(tag, sink);
        Ok(())
    }

    fn unsubscribe(&self, tag: SourceTag) {
        let mut inner = locks::lock(&self.inner);
        inner.calls.push(SensorCall::Unsubscribe(tag));
        inner.sinks.remove(&tag);
    }
}
