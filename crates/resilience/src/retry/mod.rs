//! Retry manager with configurable backoff
//!
//! A [`RetryManager`] runs a unit of work up to `max_retries + 1` times.
//! After each failure the fault is classified through [`Classify`]: terminal
//! faults are returned at once as [`RetryError::NonRetryable`], retryable
//! ones are retried after a backoff delay until the attempts run out and
//! the last fault is returned in [`RetryError::Exhausted`].
//!
//! Backoff sleeps are cancellable: dropping the future returned by
//! [`RetryManager::execute`] stops the loop, and
//! [`RetryManager::execute_with_cancellation`] also stops when a
//! [`CancellationToken`] fires.

mod backoff;
mod config;
mod error;
mod span;
mod stats;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

pub use self::backoff::BackoffStrategy;
use self::backoff::{DelayParams, FibonacciTable};
pub use self::config::{RetryPolicy, RetryPolicyBuilder};
pub use self::error::{RetryError, RetryResult};
use self::span::RetrySpan;
use self::stats::RetryCounters;
pub use self::stats::RetryStats;
use crate::constants::MAX_FIBONACCI_ENTRIES;
use crate::error::{Classify, ConfigResult};

/// Named retry manager
///
/// Statistics accumulate across every execution made through the same
/// manager; share it with `Arc` to aggregate across tasks.
pub struct RetryManager {
    name: String,
    policy: RetryPolicy,
    fibonacci: FibonacciTable,
    counters: Mutex<RetryCounters>,
}

impl fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryManager")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("counters", &*self.counters.lock())
            .finish()
    }
}

impl RetryManager {
    /// Create a retry manager, validating the policy
    pub fn new<S: Into<String>>(name: S, policy: RetryPolicy) -> ConfigResult<Self> {
        policy.validate()?;

        let name = name.into();
        let fib_len = usize::try_from(policy.max_retries)
            .unwrap_or(usize::MAX)
            .saturating_add(2)
            .min(MAX_FIBONACCI_ENTRIES);
        let fibonacci = FibonacciTable::with_len(fib_len);
        debug!(
            retry = %name,
            strategy = %policy.strategy,
            max_retries = policy.max_retries,
            fibonacci_entries = fibonacci.len(),
            "Created retry manager"
        );

        Ok(Self { name, policy, fibonacci, counters: Mutex::new(RetryCounters::default()) })
    }

    /// Manager name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Policy this manager was created with
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Backoff delay after the failure of zero-indexed `attempt`, without jitter
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        backoff::nominal_delay(&self.delay_params(), &self.fibonacci, attempt)
    }

    /// Backoff delay after the failure of zero-indexed `attempt`
    ///
    /// Includes jitter when the policy enables it, so repeated calls may
    /// differ by up to 10%.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.nominal_delay(attempt);
        if self.policy.jitter {
            backoff::add_jitter(delay, &mut rand::thread_rng())
        } else {
            delay
        }
    }

    /// Run `operation` under the retry policy
    #[instrument(skip(self, operation), fields(retry = %self.name, max_retries = self.policy.max_retries))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.run(operation, None).await
    }

    /// Run `operation` under the retry policy, stopping when `token` fires
    ///
    /// Cancellation is observed before each attempt and during backoff
    /// sleeps; an attempt already running is left to finish.
    #[instrument(skip(self, token, operation), fields(retry = %self.name, max_retries = self.policy.max_retries))]
    pub async fn execute_with_cancellation<F, Fut, T, E>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.run(operation, Some(token)).await
    }

    /// Point-in-time statistics snapshot
    pub fn stats(&self) -> RetryStats {
        let counters = self.counters.lock().clone();
        RetryStats::from_counters(&self.name, &counters, &self.policy)
    }

    /// Zero all counters
    pub fn reset_stats(&self) {
        *self.counters.lock() = RetryCounters::default();
        debug!(retry = %self.name, "Retry statistics reset");
    }

    fn delay_params(&self) -> DelayParams {
        DelayParams {
            strategy: self.policy.strategy,
            base_delay: self.policy.base_delay,
            max_delay: self.policy.max_delay,
            multiplier: self.policy.backoff_multiplier,
        }
    }

    async fn run<F, Fut, T, E>(
        &self,
        mut operation: F,
        token: Option<&CancellationToken>,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        self.counters.lock().executions += 1;
        let mut span = RetrySpan::start(&self.name, self.policy.max_retries);
        let mut attempt: u32 = 0;

        loop {
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Err(self.cancelled(&span, attempt));
            }

            span.record_attempt(attempt);

            let error = match operation().await {
                Ok(value) => {
                    {
                        let mut counters = self.counters.lock();
                        counters.attempts += 1;
                        counters.successes += 1;
                        counters.retries += u64::from(attempt);
                    }
                    span.record_success(attempt + 1);
                    return Ok(value);
                }
                Err(error) => error,
            };

            {
                let mut counters = self.counters.lock();
                counters.attempts += 1;
                counters.failures += 1;
            }

            let category = error.category();
            if !self.policy.is_retryable(category) {
                self.counters.lock().non_retryable += 1;
                span.record_non_retryable(attempt, category, &error);
                return Err(RetryError::NonRetryable { source: error });
            }

            if attempt >= self.policy.max_retries {
                self.counters.lock().exhausted += 1;
                span.record_exhausted(&error);
                return Err(RetryError::Exhausted { attempts: attempt + 1, source: error });
            }

            let delay = self.delay_for(attempt);
            span.record_retry(attempt, error.severity(), &error, delay);
            drop(error);

            if !pause(delay, token).await {
                return Err(self.cancelled(&span, attempt + 1));
            }

            {
                let mut counters = self.counters.lock();
                counters.backoffs += 1;
                counters.total_delay = counters.total_delay.saturating_add(delay);
                counters.last_delay = Some(delay);
            }
            attempt += 1;
        }
    }

    fn cancelled<E>(&self, span: &RetrySpan<'_>, attempts: u32) -> RetryError<E> {
        self.counters.lock().cancelled += 1;
        span.record_cancelled(attempts);
        RetryError::Cancelled { attempts }
    }
}

/// Sleep for `delay`, returning `false` if `token` fired first
async fn pause(delay: Duration, token: Option<&CancellationToken>) -> bool {
    match token {
        Some(token) => {
            tokio::select! {
                () = token.cancelled() => false,
                () = tokio::time::sleep(delay) => true,
            }
        }
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the retry loop
    //!
    //! Tests cover attempt accounting, classification outcomes, exhaustion,
    //! cancellation, and backoff delays observed in virtual time.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;
    use crate::error::{Fault, FaultCategory};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .base_delay(Duration::from_millis(10))
            .max_delay(Duration::from_secs(1))
            .no_jitter()
            .build()
            .expect("Should build valid policy")
    }

    /// Unit of work failing `failures` times with `fault` before succeeding
    fn flaky(
        calls: &Arc<AtomicU32>,
        failures: u32,
        fault: fn() -> Fault,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, Fault>> {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < failures { Err(fault()) } else { Ok(n) })
        }
    }

    #[test]
    fn test_manager_rejects_invalid_policy() {
        let invalid = RetryPolicy { base_delay: Duration::ZERO, ..RetryPolicy::default() };
        assert!(RetryManager::new("bad", invalid).is_err());
    }

    #[test]
    fn test_manager_accessors() {
        let manager = RetryManager::new("tts", policy(2)).unwrap();
        assert_eq!(manager.name(), "tts");
        assert_eq!(manager.policy().max_retries, 2);
        assert_eq!(manager.nominal_delay(0), Duration::from_millis(10));
        assert_eq!(manager.delay_for(1), Duration::from_millis(20));
    }

    /// Large retry counts are accepted; the Fibonacci table stays bounded.
    #[test]
    fn test_large_max_retries_accepted() {
        let long = RetryPolicy {
            max_retries: 150,
            strategy: BackoffStrategy::Fibonacci,
            jitter: false,
            ..RetryPolicy::default()
        };
        let manager = RetryManager::new("long", long).unwrap();

        assert_eq!(manager.fibonacci.len(), MAX_FIBONACCI_ENTRIES);
        assert_eq!(manager.nominal_delay(3), Duration::from_secs(5));
        assert_eq!(manager.nominal_delay(149), manager.policy().max_delay);
    }

    #[test]
    fn test_delay_for_with_jitter_stays_in_bounds() {
        let jittered = RetryPolicy { jitter: true, ..policy(3) };
        let manager = RetryManager::new("jitter", jittered).unwrap();
        for _ in 0..100 {
            let delay = manager.delay_for(2);
            assert!(delay >= Duration::from_millis(40));
            assert!(delay <= Duration::from_millis(44));
        }
    }

    // =========================================================================
    // Attempt accounting
    // =========================================================================

    /// Validates the k failures then success scenario.
    ///
    /// Assertions:
    /// - Confirms the value of the successful attempt is returned.
    /// - Confirms `total_attempts == k + 1` and `total_retries == k`.
    #[tokio::test(start_paused = true)]
    async fn test_k_failures_then_success() {
        let manager = RetryManager::new("gen-ai", policy(5)).unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let result = manager.execute(flaky(&calls, 3, || Fault::unavailable("503"))).await;

        assert_eq!(result.unwrap(), 3);
        let stats = manager.stats();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.total_attempts, 4);
        assert_eq!(stats.total_retries, 3);
        assert_eq!(stats.total_successes, 1);
        assert_eq!(stats.total_failures, 3);
        assert_eq!(stats.total_attempts, stats.total_successes + stats.total_failures);
        assert_eq!(stats.total_delay, Duration::from_millis(10 + 20 + 40));
        assert_eq!(stats.last_delay, Some(Duration::from_millis(40)));
        assert_eq!(stats.success_rate(), 25.0);
        assert_eq!(stats.average_delay(), Duration::from_nanos(23_333_333));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_exhausts() {
        let manager = RetryManager::new("render", policy(3)).unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let result = manager.execute(flaky(&calls, u32::MAX, || Fault::timeout("slow"))).await;

        match result {
            Err(RetryError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert_eq!(source.category(), FaultCategory::Timeout);
            }
            other => panic!("Expected Exhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let stats = manager.stats();
        assert_eq!(stats.total_exhausted, 1);
        assert_eq!(stats.total_retries, 0, "only successful executions consume retries");
        assert_eq!(stats.total_backoffs, 3);
        assert_eq!(stats.total_attempts, stats.total_successes + stats.total_failures);
    }

    /// Retries are credited only once an execution succeeds.
    #[tokio::test(start_paused = true)]
    async fn test_retries_credited_on_success_only() {
        let manager = RetryManager::new("mixed", policy(2)).unwrap();

        let failing = Arc::new(AtomicU32::new(0));
        let result = manager.execute(flaky(&failing, u32::MAX, || Fault::timeout("slow"))).await;
        assert!(result.unwrap_err().is_exhausted());
        assert_eq!(manager.stats().total_retries, 0);

        let recovering = Arc::new(AtomicU32::new(0));
        manager.execute(flaky(&recovering, 2, || Fault::timeout("slow"))).await.unwrap();

        let stats = manager.stats();
        assert_eq!(stats.total_retries, 2);
        assert_eq!(stats.total_backoffs, 4);
        assert_eq!(stats.total_attempts, 6);
    }

    /// Terminal faults return immediately without sleeping.
    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_returns_immediately() {
        let manager = RetryManager::new("social", policy(3)).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result =
            manager.execute(flaky(&calls, u32::MAX, || Fault::invalid_argument("bad caption"))).await;

        match result {
            Err(RetryError::NonRetryable { source }) => assert_eq!(source.message(), "bad caption"),
            other => panic!("Expected NonRetryable, got {other:?}"),
        }
        assert_eq!(started.elapsed(), Duration::ZERO);

        let stats = manager.stats();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.total_retries, 0);
        assert_eq!(stats.total_non_retryable, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_runs_once() {
        let manager = RetryManager::new("once", RetryPolicy { jitter: false, ..RetryPolicy::no_retry() }).unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let result = manager.execute(flaky(&calls, 1, || Fault::network("reset"))).await;

        assert_eq!(result.unwrap_err().attempts(), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Validates the exponential delays scenario in virtual time.
    ///
    /// Assertions:
    /// - Confirms sleeps of 1s, 2s and 4s between the four attempts.
    #[tokio::test(start_paused = true)]
    async fn test_exponential_delays_observed() {
        let policy = RetryPolicy::builder()
            .max_retries(3)
            .base_delay(Duration::from_secs(1))
            .exponential_backoff(2.0)
            .no_jitter()
            .build()
            .unwrap();
        let manager = RetryManager::new("exp", policy).unwrap();

        let start = Instant::now();
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&stamps);
        let result = manager
            .execute(move || {
                recorder.lock().push(start.elapsed());
                std::future::ready(Err::<(), _>(Fault::unavailable("down")))
            })
            .await;

        assert!(result.unwrap_err().is_exhausted());
        let stamps = stamps.lock().clone();
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]);
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let policy = RetryPolicy::builder()
            .max_retries(5)
            .base_delay(Duration::from_secs(10))
            .fixed_backoff()
            .no_jitter()
            .build()
            .unwrap();
        let manager = RetryManager::new("cancel", policy).unwrap();
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            canceller.cancel();
        });

        let result = manager
            .execute_with_cancellation(&token, flaky(&calls, u32::MAX, || Fault::unavailable("x")))
            .await;

        match result {
            Err(RetryError::Cancelled { attempts }) => assert_eq!(attempts, 2),
            other => panic!("Expected Cancelled, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = manager.stats();
        assert_eq!(stats.total_cancelled, 1);
        assert_eq!(stats.total_delay, Duration::from_secs(10), "interrupted sleep is not counted");
    }

    #[tokio::test]
    async fn test_already_cancelled_token_runs_nothing() {
        let manager = RetryManager::new("cancel", policy(3)).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicU32::new(0));

        let result = manager
            .execute_with_cancellation(&token, flaky(&calls, 0, || Fault::unavailable("x")))
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.stats().total_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_stats() {
        let manager = RetryManager::new("reset", policy(1)).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let _ = manager.execute(flaky(&calls, 1, || Fault::unavailable("x"))).await;
        assert_eq!(manager.stats().total_attempts, 2);

        manager.reset_stats();
        let stats = manager.stats();
        assert_eq!(stats.total_attempts, 0);
        assert_eq!(stats.total_executions, 0);
        assert_eq!(stats.last_delay, None);
    }

    // =========================================================================
    // Shared instances
    // =========================================================================

    /// Tests that one manager shared by concurrent tasks keeps exact counts
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_manager_counters_stay_consistent() {
        const TASKS: u64 = 8;
        const RUNS_PER_TASK: u64 = 20;

        let policy = RetryPolicy::builder()
            .max_retries(2)
            .base_delay(Duration::from_millis(1))
            .fixed_backoff()
            .no_jitter()
            .build()
            .unwrap();
        let manager = Arc::new(RetryManager::new("shared", policy).unwrap());

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    for _ in 0..RUNS_PER_TASK {
                        let calls = Arc::new(AtomicU32::new(0));
                        manager.execute(flaky(&calls, 1, || Fault::timeout("slow"))).await.unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let runs = TASKS * RUNS_PER_TASK;
        let stats = manager.stats();
        assert_eq!(stats.total_executions, runs);
        assert_eq!(stats.total_attempts, stats.total_successes + stats.total_failures);
        assert_eq!(stats.total_attempts, 2 * runs);
        assert_eq!(stats.total_retries, runs);
        assert_eq!(stats.total_backoffs, runs);
        assert_eq!(stats.total_delay, Duration::from_millis(runs));
    }
}
