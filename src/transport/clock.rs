//! Time source used for time-wait bookkeeping.

use std::time::Instant;

/// Source of monotonic timestamps.
pub trait Clock {
    /// Current time.
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
