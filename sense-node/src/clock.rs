//! Wall-clock abstraction.
//!
//! Timestamps on the wire are milliseconds since the Unix epoch. Components
//! read them through [`Clock`] so tests can run on tokio's paused time.

use std::time::Duration;
use tokio::time::Instant;

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in ms.
    fn now_millis(&self) -> i64;
}

impl<F> Clock for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now_millis(&self) -> i64 {
        self()
    }
}

/// The operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        sense_types::unix_millis()
    }
}

/// A clock that starts at a fixed epoch and advances with tokio time.
///
/// Under `#[tokio::test(start_paused = true)]` it only moves when the
/// runtime's clock is advanced, which makes timer-driven tests exact.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    epoch_ms: i64,
    anchor: Instant,
}

impl TokioClock {
    /// Anchor at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(sense_types::unix_millis())
    }

    /// Anchor at an explicit epoch.
    pub fn starting_at(epoch_ms: i64) -> Self {
        Self {
            epoch_ms,
            anchor: Instant::now(),
        }
    }

    /// Time elapsed since the anchor.
    pub fn elapsed(&self) -> Duration {
        self.anchor.elapsed()
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_millis(&self) -> i64 {
        self.epoch_ms + self.anchor.elapsed().as_millis() as i64
    }
}
