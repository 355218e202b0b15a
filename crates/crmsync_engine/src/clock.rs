//! Time sources.

use chrono::{NaiveDateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::time::Duration;

/// A source of the current UTC time.
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> NaiveDateTime;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// A clock that only moves when told to. Used by tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::zero());
        *self.now.lock() += delta;
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}

/// Whole seconds between two instants, ignoring direction.
pub(crate) fn elapsed_secs(from: NaiveDateTime, to: NaiveDateTime) -> u64 {
    (to - from).num_seconds().unsigned_abs()
}
