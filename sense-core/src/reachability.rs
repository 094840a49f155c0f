//! Per-device liveness state for SenseLink.
//!
//! Each device moves through `Unknown → Reachable ⇄ Unreachable`. The table
//! suppresses redundant updates: setting a device to the state it is already
//! in reports no transition, which is what keeps observers quiet when the
//! same echo arrives twice.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use sense_types::DeviceId;

/// Liveness of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Reachability {
    /// Never heard from and never checked.
    #[default]
    Unknown,
    /// Answered a ping or sent one recently.
    Reachable,
    /// A ping timed out, a send failed, or the device announced it is closing.
    Unreachable,
}

impl Reachability {
    fn from_flag(reachable: bool) -> Self {
        if reachable {
            Self::Reachable
        } else {
            Self::Unreachable
        }
    }
}

/// What the table knows about one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReachabilityEntry {
    /// Current state.
    pub state: Reachability,
    /// When the last echo from the device was recorded (ms since epoch).
    pub last_echo: Option<i64>,
}

/// An accepted state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Device whose state changed.
    pub device: DeviceId,
    /// Previous state.
    pub from: Reachability,
    /// New state.
    pub to: Reachability,
}

impl Transition {
    /// Whether the device became reachable.
    pub fn is_reachable(&self) -> bool {
        self.to == Reachability::Reachable
    }
}

/// Reachability state for every device seen so far.
#[derive(Debug, Clone, Default)]
pub struct ReachabilityTable {
    entries: HashMap<DeviceId, ReachabilityEntry>,
}

impl ReachabilityTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a device reachable or unreachable.
    ///
    /// Returns the transition if the state changed, `None` if the device was
    /// already in the requested state.
    pub fn set_reachable(&mut self, device: &DeviceId, reachable: bool) -> Option<Transition> {
        let to = Reachability::from_flag(reachable);
        let entry = self.entries.entry(device.clone()).or_default();
        if entry.state == to {
            return None;
        }

        let from = entry.state;
        entry.state = to;
        Some(Transition {
            device: device.clone(),
            from,
            to,
        })
    }

    /// Record an echo received at `now` and mark the device reachable.
    pub fn record_echo(&mut self, device: &DeviceId, now: i64) -> Option<Transition> {
        let transition = self.set_reachable(device, true);
        if let Some(entry) = self.entries.get_mut(device) {
            entry.last_echo = Some(now);
        }
        transition
    }

    /// Current state of a device (`Unknown` if never seen).
    pub fn state(&self, device: &DeviceId) -> Reachability {
        self.entries
            .get(device)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// Full entry for a device, if any.
    pub fn entry(&self, device: &DeviceId) -> Option<ReachabilityEntry> {
        self.entries.get(device).copied()
    }

    /// Timestamp of the last recorded echo.
    pub fn last_echo(&self, device: &DeviceId) -> Option<i64> {
        self.entries.get(device).and_then(|entry| entry.last_echo)
    }

    /// Whether an echo was recorded at or after `timestamp`.
    pub fn has_reached_since(&self, device: &DeviceId, timestamp: i64) -> bool {
        matches!(self.last_echo(device), Some(echo) if echo >= timestamp)
    }

    /// Whether an echo was recorded within `window_ms` before `now`.
    pub fn has_reached_recently(&self, device: &DeviceId, now: i64, window_ms: i64) -> bool {
        self.has_reached_since(device, now.saturating_sub(window_ms))
    }

    /// Whether the device is currently reachable.
    pub fn is_reachable(&self, device: &DeviceId) -> bool {
        self.state(device) == Reachability::Reachable
    }

    /// Ids of every reachable device, sorted.
    pub fn reachable_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == Reachability::Reachable)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// The subset of `candidates` that is not currently reachable.
    pub fn not_reachable_among<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a DeviceId>,
    ) -> Vec<DeviceId> {
        candidates
            .into_iter()
            .filter(|id| !self.is_reachable(id))
            .cloned()
            .collect()
    }

    /// Number of devices tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no device has been tracked yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
