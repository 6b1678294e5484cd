use std::time::Duration;

use crate::constants::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT,
    DEFAULT_SUCCESS_THRESHOLD,
};
use crate::error::{ConfigError, ConfigResult};

/// Configuration for circuit breaker behavior
///
/// With the `serde` feature, durations are (de)serialized as milliseconds and
/// missing fields fall back to their defaults:
///
/// ```toml
/// failure_threshold = 3
/// reset_timeout = 30000
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct CircuitBreakerPolicy {
    /// Consecutive failures in Closed state before the circuit opens
    pub failure_threshold: u32,
    /// Consecutive Half-Open successes before the circuit closes
    pub success_threshold: u32,
    /// Time an open circuit waits before letting a probe through
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_util::duration_millis"))]
    pub reset_timeout: Duration,
    /// Deadline for a single protected call
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_util::duration_millis"))]
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl CircuitBreakerPolicy {
    /// Create a policy builder
    pub fn builder() -> CircuitBreakerPolicyBuilder {
        CircuitBreakerPolicyBuilder::new()
    }

    /// Validate the policy
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }

        if self.call_timeout.is_zero() {
            return Err(ConfigError::invalid("call_timeout must be greater than 0"));
        }

        Ok(())
    }
}

/// Builder for [`CircuitBreakerPolicy`]
#[derive(Debug, Default)]
pub struct CircuitBreakerPolicyBuilder {
    policy: CircuitBreakerPolicy,
}

impl CircuitBreakerPolicyBuilder {
    pub fn new() -> Self {
        Self { policy: CircuitBreakerPolicy::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.policy.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.policy.success_threshold = threshold;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.policy.reset_timeout = timeout;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.policy.call_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}
