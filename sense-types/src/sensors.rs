//! Capability discovery payloads.

use serde::{Deserialize, Serialize};

use crate::{LinkError, SourceTag};

/// Description of one sensor a device offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSensor {
    /// Sensor name
    pub name: String,
    /// Hardware vendor
    pub vendor: String,
    /// Driver version
    pub version: i32,
    /// Source tag used in data requests
    pub source_type: SourceTag,
    /// Stable string form of the type (e.g. `"android.sensor.accelerometer"`)
    pub string_type: String,
    /// Reporting mode (continuous, on-change, one-shot, ...)
    pub reporting_mode: i32,
    /// Resolution in the sensor's unit
    pub resolution: f32,
    /// Power draw in mA
    pub power: f32,
    /// Whether the sensor wakes the device up
    pub wake_up: bool,
}

impl DeviceSensor {
    /// Create a continuous, non-wake-up sensor description.
    pub fn new(source_type: SourceTag, name: &str) -> Self {
        Self {
            name: name.to_string(),
            vendor: String::new(),
            version: 1,
            source_type,
            string_type: format!("SENSOR_TYPE_{}", source_type),
            reporting_mode: 0,
            resolution: 0.0,
            power: 0.0,
            wake_up: false,
        }
    }
}

/// The sensors a device offers, sent on `/set_sensors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorList {
    /// Offered sensors
    pub sensors: Vec<DeviceSensor>,
}

impl SensorList {
    /// Create a list from sensors.
    pub fn new(sensors: Vec<DeviceSensor>) -> Self {
        Self { sensors }
    }

    /// Sensors that do not wake the device up.
    pub fn non_wake_up(&self) -> Vec<&DeviceSensor> {
        self.sensors.iter().filter(|s| !s.wake_up).collect()
    }

    /// Look up a sensor by its source tag.
    pub fn find(&self, source_type: SourceTag) -> Option<&DeviceSensor> {
        self.sensors.iter().find(|s| s.source_type == source_type)
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LinkError> {
        rmp_serde::to_vec(self).map_err(LinkError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        rmp_serde::from_slice(bytes).map_err(LinkError::Deserialization)
    }
}
