//! Timestamped sensor readings and the bounded buffer that holds them.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::SourceTag;

/// Default number of samples a [`SampleBuffer`] retains.
pub const DEFAULT_CAPACITY: usize = 500;

/// One timestamped vector reading from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    timestamp: i64,
    source: String,
    values: Vec<f32>,
}

impl Sample {
    /// Create a sample with an explicit timestamp (ms since the Unix epoch).
    pub fn new(timestamp: i64, source: &str, values: Vec<f32>) -> Self {
        Self {
            timestamp,
            source: source.to_string(),
            values,
        }
    }

    /// Create a sample stamped with the current wall-clock time.
    pub fn now(source: &str, values: Vec<f32>) -> Self {
        Self::new(crate::unix_millis(), source, values)
    }

    /// Timestamp in milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Name of the source that produced the reading.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Reading values; the length is source-defined.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Replace the timestamp.
    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    /// Replace the source name.
    pub fn set_source(&mut self, source: &str) {
        self.source = source.to_string();
    }

    /// Replace the values.
    pub fn set_values(&mut self, values: Vec<f32>) {
        self.values = values;
    }
}

/// Bounded, insertion-ordered buffer of samples for one source.
///
/// Samples are appended at the back; once `capacity` is exceeded the oldest
/// samples are evicted from the front. A capacity of `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBuffer {
    source: String,
    source_type: SourceTag,
    capacity: Option<usize>,
    samples: VecDeque<Sample>,
}

impl SampleBuffer {
    /// Create an empty buffer with the default capacity.
    pub fn new(source: &str, source_type: SourceTag) -> Self {
        Self::with_capacity(source, source_type, Some(DEFAULT_CAPACITY))
    }

    /// Create an empty buffer with the given capacity (`None` = unlimited).
    pub fn with_capacity(source: &str, source_type: SourceTag, capacity: Option<usize>) -> Self {
        Self {
            source: source.to_string(),
            source_type,
            capacity,
            samples: VecDeque::new(),
        }
    }

    /// Source name.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Source type tag.
    pub fn source_type(&self) -> SourceTag {
        self.source_type
    }

    /// Capacity (`None` = unlimited).
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Change the capacity, evicting the oldest samples if needed.
    pub fn set_capacity(&mut self, capacity: Option<usize>) {
        self.capacity = capacity;
        self.trim_to_capacity();
    }

    /// Append one sample.
    pub fn add_sample(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        self.trim_to_capacity();
    }

    /// Append several samples in order.
    pub fn add_samples(&mut self, samples: impl IntoIterator<Item = Sample>) {
        self.samples.extend(samples);
        self.trim_to_capacity();
    }

    fn trim_to_capacity(&mut self) {
        if let Some(capacity) = self.capacity {
            while self.samples.len() > capacity {
                self.samples.pop_front();
            }
        }
    }

    /// Samples with `timestamp > since`, oldest first.
    ///
    /// Walks backward from the newest sample and stops at the first one at
    /// or before the cutoff, so the cost is proportional to the number of
    /// new samples rather than the buffer size.
    pub fn since(&self, since: i64) -> Vec<Sample> {
        let mut newer: Vec<Sample> = self
            .samples
            .iter()
            .rev()
            .take_while(|sample| sample.timestamp > since)
            .cloned()
            .collect();
        newer.reverse();
        newer
    }

    /// Samples with `since < timestamp <= until`, oldest first.
    pub fn between(&self, since: i64, until: i64) -> Vec<Sample> {
        let mut window: Vec<Sample> = self
            .samples
            .iter()
            .rev()
            .skip_while(|sample| sample.timestamp > until)
            .take_while(|sample| sample.timestamp > since)
            .cloned()
            .collect();
        window.reverse();
        window
    }

    /// A copy of this buffer's metadata holding only the samples in
    /// `(since, until]`.
    pub fn snapshot_between(&self, since: i64, until: i64) -> Self {
        Self {
            source: self.source.clone(),
            source_type: self.source_type,
            capacity: self.capacity,
            samples: self.between(since, until).into(),
        }
    }

    /// Drop every sample at or before `timestamp`.
    pub fn remove_before(&mut self, timestamp: i64) {
        self.samples = self.since(timestamp).into();
    }

    /// Newest sample, if any.
    pub fn newest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Oldest sample, if any.
    pub fn oldest(&self) -> Option<&Sample> {
        self.samples.front()
    }

    /// Iterate over the samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Average sample rate over the retained window, in samples per second.
    pub fn frequency_hz(&self) -> f32 {
        match (self.oldest(), self.newest()) {
            (Some(oldest), Some(newest)) if newest.timestamp > oldest.timestamp => {
                let seconds = (newest.timestamp - oldest.timestamp) as f32 / 1000.0;
                self.samples.len() as f32 / seconds
            }
            _ => 0.0,
        }
    }

    /// Round every value to `decimal_places` to shrink encoded payloads.
    pub fn round_to_decimal_places(&mut self, decimal_places: u32) {
        let shift = 10f64.powi(decimal_places as i32);
        for sample in self.samples.iter_mut() {
            for value in sample.values.iter_mut() {
                *value = ((*value as f64 * shift).round() / shift) as f32;
            }
        }
    }
}
