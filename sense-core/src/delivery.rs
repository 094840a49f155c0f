//! Windowing and lifecycle decisions for one streaming subscription.
//!
//! A subscription delivers contiguous windows `[t0, t1), [t1, t2), ...`.
//! The cursor remembers where the previous window ended, counts consecutive
//! failed deliveries and tells the caller when to stop. It never touches a
//! clock: every method takes `now` from the caller.

use sense_types::DataRequest;

/// Why a subscription stopped (or must not start).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The request's end timestamp has been reached.
    RequestEnded,
    /// Too many consecutive deliveries failed.
    CircuitOpen,
}

/// What to do with an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    /// Not running: start the tick loop (failure count already reset).
    Start,
    /// Already running: keep the schedule, pick up the new request.
    KeepRunning,
    /// Release every source and stop.
    Stop(StopReason),
}

/// What to do after a tick completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Sleep the current interval, then tick again.
    Continue,
    /// End the loop.
    Stop(StopReason),
}

/// A half-open delivery window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Inclusive start (ms since epoch).
    pub start: i64,
    /// Exclusive end (ms since epoch).
    pub end: i64,
}

/// Delivery progress of one subscription.
#[derive(Debug, Clone)]
pub struct DeliveryCursor {
    /// End of the last window that was attempted.
    last_end: Option<i64>,
    /// Deliveries that failed in a row.
    consecutive_failures: u32,
    /// Ceiling at which the circuit opens.
    max_failures: u32,
}

impl DeliveryCursor {
    /// Default number of consecutive failures before the circuit opens.
    pub const DEFAULT_MAX_FAILURES: u32 = 10;

    /// Create a cursor with the given failure ceiling (at least 1).
    pub fn new(max_failures: u32) -> Self {
        Self {
            last_end: None,
            consecutive_failures: 0,
            max_failures: max_failures.max(1),
        }
    }

    /// The window a tick at `now` covers.
    pub fn window(&self, request: &DataRequest, now: i64) -> Window {
        Window {
            start: self.last_end.unwrap_or(request.start_timestamp),
            end: now,
        }
    }

    /// Cutoff for [`SampleBuffer::since`](sense_types::SampleBuffer::since):
    /// everything after the last window, or every sample on the first tick.
    pub fn since_cutoff(&self) -> i64 {
        self.last_end.unwrap_or(i64::MIN)
    }

    /// Decide how to react to `request` at `now`.
    ///
    /// Starting resets the failure count so a re-request recovers a
    /// subscription whose circuit opened.
    pub fn on_request(&mut self, request: &DataRequest, now: i64, running: bool) -> RequestDecision {
        if request.has_ended(now) {
            return RequestDecision::Stop(StopReason::RequestEnded);
        }
        if running {
            return RequestDecision::KeepRunning;
        }
        self.consecutive_failures = 0;
        RequestDecision::Start
    }

    /// Record the result of a tick whose window ended at `window_end`.
    ///
    /// The window advances whether or not the delivery succeeded; samples of
    /// a failed window are not resent. It never moves backwards.
    pub fn on_tick(
        &mut self,
        request: &DataRequest,
        window_end: i64,
        delivered: bool,
    ) -> TickOutcome {
        self.last_end = Some(self.last_end.map_or(window_end, |end| end.max(window_end)));
        if delivered {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        if self.circuit_open() {
            TickOutcome::Stop(StopReason::CircuitOpen)
        } else if request.has_ended(window_end) {
            TickOutcome::Stop(StopReason::RequestEnded)
        } else {
            TickOutcome::Continue
        }
    }

    /// Whether the failure ceiling has been reached.
    pub fn circuit_open(&self) -> bool {
        self.consecutive_failures >= self.max_failures
    }

    /// End of the last attempted window.
    pub fn last_end(&self) -> Option<i64> {
        self.last_end
    }

    /// Deliveries that failed in a row.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// The failure ceiling.
    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }
}

impl Default for DeliveryCursor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_FAILURES)
    }
}
