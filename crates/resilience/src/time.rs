//! Time source for the breaker state machine
//!
//! Breakers measure their reset timeout against a [`Clock`] so tests can
//! drive Open → Half-Open transitions with a [`MockClock`] instead of
//! sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of the two timestamps a breaker records
///
/// `now` drives reset-timeout decisions; `now_utc` only stamps statistics.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic breaker tests
///
/// Wall-clock time starts at the UNIX epoch. Clones share one timeline, so
/// a test can keep a handle and give another to a breaker or registry.
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), offset: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Move both timelines forward by `duration`
    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock();
        *offset = offset.saturating_add(duration);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from(UNIX_EPOCH + *self.offset.lock())
    }
}
