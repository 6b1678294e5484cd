//! Circuit breaker guarding calls to one remote backend
//!
//! The breaker is a Closed → Open → Half-Open state machine:
//!
//! - **Closed**: calls pass through. A success clears the failure streak;
//!   `failure_threshold` consecutive failures open the circuit.
//! - **Open**: calls are rejected with [`BreakerError::CircuitOpen`] without
//!   running. The first call after `reset_timeout` moves the breaker to
//!   Half-Open and is let through.
//! - **Half-Open**: calls pass through as probes. One failure reopens the
//!   circuit; `success_threshold` consecutive successes close it.
//!
//! Every admitted call runs under `call_timeout`. A call that misses its
//! deadline counts as a failure and returns [`BreakerError::Timeout`].
//!
//! All mutable state of a breaker sits behind one mutex that is only held
//! while counters are read or updated, never while the unit of work runs.

mod config;
mod error;
mod stats;

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

pub use self::config::{CircuitBreakerPolicy, CircuitBreakerPolicyBuilder};
pub use self::error::{BreakerError, BreakerResult};
pub use self::stats::{CircuitBreakerStats, CircuitState};
use crate::error::ConfigResult;
use crate::time::{Clock, SystemClock};

/// Mutable state of one breaker, guarded by a single mutex
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Monotonic time of the last failure, used for the reset timeout
    last_failure_instant: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    state_changed_at: DateTime<Utc>,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    total_timeouts: u64,
    total_rejections: u64,
    opened_count: u64,
}

impl BreakerState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_instant: None,
            last_failure_at: None,
            last_success_at: None,
            state_changed_at: now,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            total_timeouts: 0,
            total_rejections: 0,
            opened_count: 0,
        }
    }

    /// Move to `to`, returning the previous state if it changed
    fn transition(&mut self, to: CircuitState, at: DateTime<Utc>) -> Option<CircuitState> {
        let from = self.state;
        match to {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.consecutive_successes = 0;
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                self.consecutive_successes = 0;
            }
        }

        if from == to {
            return None;
        }

        self.state = to;
        self.state_changed_at = at;
        if to == CircuitState::Open {
            self.opened_count += 1;
        }
        Some(from)
    }

    fn record_failure_time(&mut self, instant: Instant, at: DateTime<Utc>) {
        self.last_failure_instant = Some(instant);
        self.last_failure_at = Some(at);
    }
}

/// Outcome of admission control for one call
enum Admission {
    Admitted,
    Rejected { last_failure_at: DateTime<Utc>, retry_after: Duration },
}

/// Named circuit breaker
///
/// Generic over a [`Clock`] so the reset timeout can be driven by a
/// [`crate::MockClock`] in tests. Share a breaker between tasks with `Arc`,
/// or obtain one from a [`crate::CircuitBreakerRegistry`].
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    policy: CircuitBreakerPolicy,
    inner: Mutex<BreakerState>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .field("consecutive_successes", &inner.consecutive_successes)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker using the system clock
    pub fn new<S: Into<String>>(name: S, policy: CircuitBreakerPolicy) -> ConfigResult<Self> {
        Self::with_clock(name, policy, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock
    pub fn with_clock<S: Into<String>>(
        name: S,
        policy: CircuitBreakerPolicy,
        clock: C,
    ) -> ConfigResult<Self> {
        policy.validate()?;

        let state = BreakerState::new(clock.now_utc());
        Ok(Self { name: name.into(), policy, inner: Mutex::new(state), clock })
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Policy this breaker was created with
    pub fn policy(&self) -> &CircuitBreakerPolicy {
        &self.policy
    }

    /// Current state, without applying the Open → Half-Open check
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a call made now would be admitted
    ///
    /// Does not change state; an open circuit whose reset timeout has elapsed
    /// reports `true` and transitions on the next call.
    pub fn is_available(&self) -> bool {
        let now = self.clock.now();
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => self.open_elapsed(&inner, now) >= self.policy.reset_timeout,
        }
    }

    /// Run an async unit of work through the breaker
    ///
    /// The future is dropped if it misses `call_timeout`, which cancels it at
    /// its next await point.
    #[instrument(skip(self, operation), fields(breaker = %self.name))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit()?;

        match tokio::time::timeout(self.policy.call_timeout, operation()).await {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(error)) => {
                self.on_failure(false);
                Err(BreakerError::OperationFailed { source: error })
            }
            Err(_) => {
                self.on_failure(true);
                Err(self.timeout_error())
            }
        }
    }

    /// Run a blocking unit of work through the breaker
    ///
    /// The work runs on a helper thread so it can be abandoned at the
    /// deadline; an abandoned thread keeps running until the work returns,
    /// and its result is discarded. A panic in the work is counted as a
    /// failure and then resumed on the calling thread.
    #[instrument(skip(self, operation), fields(breaker = %self.name))]
    pub fn call<F, T, E>(&self, operation: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.admit()?;

        let (tx, rx) = mpsc::sync_channel(1);
        thread::spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(operation));
            // The receiver is gone once the caller has given up on this call
            let _ = tx.send(outcome);
        });

        match rx.recv_timeout(self.policy.call_timeout) {
            Ok(Ok(Ok(value))) => {
                self.on_success();
                Ok(value)
            }
            Ok(Ok(Err(error))) => {
                self.on_failure(false);
                Err(BreakerError::OperationFailed { source: error })
            }
            Ok(Err(payload)) => {
                self.on_failure(false);
                panic::resume_unwind(payload)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                self.on_failure(true);
                Err(self.timeout_error())
            }
        }
    }

    /// Point-in-time statistics snapshot
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            total_calls: inner.total_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_timeouts: inner.total_timeouts,
            total_rejections: inner.total_rejections,
            opened_count: inner.opened_count,
            success_rate: stats::percent(inner.total_successes, inner.total_calls),
            failure_rate: stats::percent(inner.total_failures, inner.total_calls),
            timeout_rate: stats::percent(inner.total_timeouts, inner.total_calls),
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
            state_changed_at: inner.state_changed_at,
            policy: self.policy.clone(),
        }
    }

    /// Return to Closed and clear both streaks; lifetime totals are kept
    pub fn reset(&self) {
        let at = self.clock.now_utc();
        let from = self.inner.lock().transition(CircuitState::Closed, at);
        info!(breaker = %self.name, previous = ?from, "Circuit breaker manually reset to closed state");
    }

    /// Open the circuit now, as if a failure had just been recorded
    pub fn force_open(&self) {
        let now = self.clock.now();
        let at = self.clock.now_utc();
        let from = {
            let mut inner = self.inner.lock();
            inner.record_failure_time(now, at);
            inner.transition(CircuitState::Open, at)
        };
        warn!(breaker = %self.name, previous = ?from, "Circuit breaker forced open");
    }

    fn open_elapsed(&self, inner: &BreakerState, now: Instant) -> Duration {
        match inner.last_failure_instant {
            Some(failed_at) => now.saturating_duration_since(failed_at),
            None => self.policy.reset_timeout,
        }
    }

    /// Admission control, applying the Open → Half-Open transition
    fn admit<E>(&self) -> BreakerResult<(), E> {
        let now = self.clock.now();
        let at = self.clock.now_utc();

        let (admission, from) = {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::Open {
                let elapsed = self.open_elapsed(&inner, now);
                if elapsed >= self.policy.reset_timeout {
                    (Admission::Admitted, inner.transition(CircuitState::HalfOpen, at))
                } else {
                    inner.total_rejections += 1;
                    let rejected = Admission::Rejected {
                        last_failure_at: inner.last_failure_at.unwrap_or(at),
                        retry_after: self.policy.reset_timeout - elapsed,
                    };
                    (rejected, None)
                }
            } else {
                (Admission::Admitted, None)
            }
        };

        if let Some(from) = from {
            self.log_transition(from, CircuitState::HalfOpen);
        }

        match admission {
            Admission::Admitted => Ok(()),
            Admission::Rejected { last_failure_at, retry_after } => {
                let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
                debug!(breaker = %self.name, retry_after_ms, "Circuit breaker rejecting call");
                Err(BreakerError::CircuitOpen {
                    name: self.name.clone(),
                    last_failure_at,
                    retry_after,
                })
            }
        }
    }

    fn on_success(&self) {
        let at = self.clock.now_utc();
        let from = {
            let mut inner = self.inner.lock();
            inner.total_calls += 1;
            inner.total_successes += 1;
            inner.last_success_at = Some(at);

            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.policy.success_threshold {
                        inner.transition(CircuitState::Closed, at)
                    } else {
                        None
                    }
                }
                // A call admitted before the circuit opened finished late
                CircuitState::Open => None,
            }
        };

        match from {
            Some(from) => self.log_transition(from, CircuitState::Closed),
            None => debug!(breaker = %self.name, "Circuit breaker: operation succeeded"),
        }
    }

    fn on_failure(&self, timed_out: bool) {
        let now = self.clock.now();
        let at = self.clock.now_utc();
        let (from, failures) = {
            let mut inner = self.inner.lock();
            inner.total_calls += 1;
            inner.total_failures += 1;
            if timed_out {
                inner.total_timeouts += 1;
            }
            inner.record_failure_time(now, at);

            let from = match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.policy.failure_threshold {
                        inner.transition(CircuitState::Open, at)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    inner.consecutive_failures += 1;
                    inner.transition(CircuitState::Open, at)
                }
                CircuitState::Open => None,
            };
            (from, inner.consecutive_failures)
        };

        match from {
            Some(from) => self.log_transition(from, CircuitState::Open),
            None => debug!(breaker = %self.name, failures, timed_out, "Circuit breaker: operation failed"),
        }
    }

    fn timeout_error<E>(&self) -> BreakerError<E> {
        BreakerError::Timeout { name: self.name.clone(), timeout: self.policy.call_timeout }
    }

    fn log_transition(&self, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => {
                warn!(breaker = %self.name, from = %from, to = %to, "Circuit breaker opened");
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, from = %from, to = %to, "Circuit breaker probing recovery");
            }
            CircuitState::Closed => {
                info!(breaker = %self.name, from = %from, to = %to, "Circuit breaker closed");
            }
        }
    }
}
