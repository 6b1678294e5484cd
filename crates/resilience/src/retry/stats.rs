use std::time::Duration;

use super::config::RetryPolicy;

/// Running counters of one retry manager, guarded by its mutex
#[derive(Debug, Clone, Default)]
pub(crate) struct RetryCounters {
    pub executions: u64,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub exhausted: u64,
    pub non_retryable: u64,
    pub cancelled: u64,
    pub backoffs: u64,
    pub total_delay: Duration,
    pub last_delay: Option<Duration>,
}

/// Point-in-time statistics of one retry manager
///
/// Each attempt is counted together with its outcome, so `total_attempts`
/// always equals `total_successes + total_failures`. `total_retries` counts
/// the retries consumed by executions that went on to succeed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryStats {
    pub name: String,
    /// Calls to `execute`
    pub total_executions: u64,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_retries: u64,
    /// Executions that ended in [`crate::RetryError::Exhausted`]
    pub total_exhausted: u64,
    /// Executions stopped by a terminal fault
    pub total_non_retryable: u64,
    /// Executions cancelled between attempts
    pub total_cancelled: u64,
    /// Backoff sleeps that ran to completion
    pub total_backoffs: u64,
    /// Sum of completed backoff sleeps
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_util::duration_millis"))]
    pub total_delay: Duration,
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_util::option_duration_millis"))]
    pub last_delay: Option<Duration>,
    pub policy: RetryPolicy,
}

impl RetryStats {
    pub(crate) fn from_counters(name: &str, counters: &RetryCounters, policy: &RetryPolicy) -> Self {
        Self {
            name: name.to_string(),
            total_executions: counters.executions,
            total_attempts: counters.attempts,
            total_successes: counters.successes,
            total_failures: counters.failures,
            total_retries: counters.retries,
            total_exhausted: counters.exhausted,
            total_non_retryable: counters.non_retryable,
            total_cancelled: counters.cancelled,
            total_backoffs: counters.backoffs,
            total_delay: counters.total_delay,
            last_delay: counters.last_delay,
            policy: policy.clone(),
        }
    }

    /// Percentage of attempts that succeeded (0 when nothing ran)
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.total_successes as f64 / self.total_attempts as f64 * 100.0
        }
    }

    /// Mean backoff sleep between attempts
    pub fn average_delay(&self) -> Duration {
        if self.total_backoffs == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_delay.as_nanos() / u128::from(self.total_backoffs);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}
