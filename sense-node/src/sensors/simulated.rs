//! Synthetic sensor source.
//!
//! Each subscribed tag gets a task that produces a reading at a fixed rate:
//! three-axis sinusoids for motion sensors, a slow drift around 70 for the
//! heart rate.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sense_types::{DeviceSensor, Sample, SensorList, SourceTag};
use tokio::task::JoinHandle;

use super::{SampleSink, SensorSource};
use crate::clock::Clock;
use crate::error::SensorError;
use crate::locks;

/// Accelerometer source tag.
pub const ACCELEROMETER: SourceTag = 1;
/// Gyroscope source tag.
pub const GYROSCOPE: SourceTag = 4;
/// Heart rate source tag.
pub const HEART_RATE: SourceTag = 21;

/// Shortest period between two readings of one source.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Sensor source producing synthetic readings.
pub struct SimulatedSensorSource {
    sensors: SensorList,
    period: Duration,
    clock: Arc<dyn Clock>,
    tasks: Mutex<HashMap<SourceTag, JoinHandle<()>>>,
}

impl SimulatedSensorSource {
    /// Create a source with the default sensors, sampling at `rate_hz`.
    pub fn new(rate_hz: u32, clock: Arc<dyn Clock>) -> Self {
        Self::with_sensors(Self::default_sensors(), rate_hz, clock)
    }

    /// Create a source offering `sensors`, sampling at `rate_hz`.
    ///
    /// Rates above 1kHz are capped at one reading per millisecond.
    pub fn with_sensors(sensors: SensorList, rate_hz: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            sensors,
            period: Duration::from_micros(1_000_000 / u64::from(rate_hz.max(1))).max(MIN_PERIOD),
            clock,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Accelerometer, gyroscope and heart rate.
    pub fn default_sensors() -> SensorList {
        let mut heart_rate = DeviceSensor::new(HEART_RATE, "Heart Rate");
        heart_rate.reporting_mode = 1;
        SensorList::new(vec![
            DeviceSensor::new(ACCELEROMETER, "Accelerometer"),
            DeviceSensor::new(GYROSCOPE, "Gyroscope"),
            heart_rate,
        ])
    }

    fn reading(tag: SourceTag, phase: f32) -> Vec<f32> {
        match tag {
            HEART_RATE => vec![70.0 + 5.0 * (phase * 0.1).sin()],
            GYROSCOPE => vec![0.2 * phase.cos(), 0.1 * phase.sin(), 0.05 * (2.0 * phase).sin()],
            _ => vec![phase.sin(), phase.cos(), 9.81 + 0.1 * (3.0 * phase).sin()],
        }
    }
}

impl SensorSource for SimulatedSensorSource {
    fn available_sensors(&self) -> SensorList {
        self.sensors.clone()
    }

    fn subscribe(&self, tag: SourceTag, sink: SampleSink) -> Result<(), SensorError> {
        if self.sensors.find(tag).is_none() {
            return Err(SensorError::UnknownSource(tag));
        }

        let mut tasks = locks::lock(&self.tasks);
        if tasks.contains_key(&tag) {
            return Ok(());
        }

        let period = self.period;
        let clock = Arc::clone(&self.clock);
        let name = sink.source_name();
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            let mut step: u32 = 0;
            loop {
                timer.tick().await;
                let phase = (step % 100) as f32 / 100.0 * TAU;
                sink.push(Sample::new(clock.now_millis(), &name, Self::reading(tag, phase)));
                step = step.wrapping_add(1);
            }
        });
        tasks.insert(tag, handle);
        tracing::debug!("Simulating source {} every {:?}", tag, period);
        Ok(())
    }

    fn unsubscribe(&self, tag: SourceTag) {
        if let Some(handle) = locks::lock(&self.tasks).remove(&tag) {
            handle.abort();
        }
    }
}

impl Drop for SimulatedSensorSource {
    fn drop(&mut self) {
        for (_, handle) in locks::lock(&self.tasks).drain() {
            handle.abort();
        }
    }
}
