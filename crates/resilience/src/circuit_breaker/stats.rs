use std::fmt;

use chrono::{DateTime, Utc};

use super::config::CircuitBreakerPolicy;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CircuitState {
    /// Circuit is closed, calls pass through
    Closed,
    /// Circuit is open, calls are rejected without running
    Open,
    /// Circuit is probing recovery, calls pass through as probes
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Point-in-time snapshot of one breaker
///
/// `total_calls` counts invocations that ran to an outcome, so it always
/// equals `total_successes + total_failures`. Rejected calls never run and
/// are counted in `total_rejections` only.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Failures caused by the call deadline; a subset of `total_failures`
    pub total_timeouts: u64,
    pub total_rejections: u64,
    /// Number of transitions into the Open state
    pub opened_count: u64,
    /// Percentage of calls that succeeded (0 when no calls were made)
    pub success_rate: f64,
    /// Percentage of calls that failed (0 when no calls were made)
    pub failure_rate: f64,
    /// Percentage of calls that timed out (0 when no calls were made)
    pub timeout_rate: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
    pub policy: CircuitBreakerPolicy,
}

impl CircuitBreakerStats {
    /// Whether the breaker currently lets calls through without waiting
    pub fn is_closed(&self) -> bool {
        self.state == CircuitState::Closed
    }
}

/// `part / whole` as a percentage, 0 for an empty whole
pub(crate) fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
