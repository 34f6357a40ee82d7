//! Time source used by the limiter, the gate and the circuit breaker.
//!
//! Production code uses [`SystemClock`]; tests drive a [`MockClock`] by hand so
//! refill and cooldown behaviour can be checked without sleeping.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;

    /// Current time in unix milliseconds
    fn now_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock. Clones share the same time value.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Start at a fixed, round instant so test arithmetic stays readable
    pub fn at_epoch_seconds(secs: i64) -> Self {
        Self::new(DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default())
    }

    pub fn advance(&self, duration: Duration) {
        let step = ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::zero());
        let mut time = self
            .current_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *time += step;
    }

    pub fn set(&self, time: DateTime<Utc>) {
        let mut current = self
            .current_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = time;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::at_epoch_seconds(1_700_000_000)
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .current_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
