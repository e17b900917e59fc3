//! Observation throttle.
//!
//! Decouples how often detection runs from how often consumers are updated.
//! Calls inside the interval are dropped outright, not queued.

use tokio::time::{Duration, Instant};

/// Minimum-interval gate on a monotonic clock.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last_accepted: Option<Instant>,
    accepted: u64,
    dropped: u64,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
            accepted: 0,
            dropped: 0,
        }
    }

    /// Decide whether a call made now passes.
    pub fn try_accept(&mut self) -> bool {
        self.try_accept_at(Instant::now())
    }

    /// Decide whether a call made at `now` passes.
    ///
    /// The first call after construction or [`reset`](Self::reset) always
    /// passes; afterwards a call passes once `interval` has elapsed since the
    /// last accepted one.
    pub fn try_accept_at(&mut self, now: Instant) -> bool {
        let open = match self.last_accepted {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };

        if open {
            self.last_accepted = Some(now);
            self.accepted += 1;
        } else {
            self.dropped += 1;
        }
        open
    }

    /// Forget the last acceptance so the next call passes immediately.
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}
