use std::time::Duration;

use super::backoff::BackoffStrategy;
use crate::constants::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES,
};
use crate::error::{ConfigError, ConfigResult, FaultCategory};

/// Configuration for retry behavior
///
/// `max_retries` counts retries after the first attempt, so a unit of work
/// runs at most `max_retries + 1` times.
///
/// Which faults are retried is decided in this order:
///
/// 1. a category listed in `non_retryable_faults` is terminal;
/// 2. if `retryable_faults` is set, only the listed categories are retried;
/// 3. otherwise everything is retried except
///    [`FaultCategory::DEFAULT_TERMINAL`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay unit the strategy scales
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_util::duration_millis"))]
    pub base_delay: Duration,
    /// Upper bound on any computed delay, applied before jitter
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_util::duration_millis"))]
    pub max_delay: Duration,
    /// How delays grow between attempts
    pub strategy: BackoffStrategy,
    /// Add up to 10% random extra delay
    pub jitter: bool,
    /// Growth factor for [`BackoffStrategy::Exponential`]
    pub backoff_multiplier: f64,
    /// Closed allow-list of retried categories
    pub retryable_faults: Option<Vec<FaultCategory>>,
    /// Categories that are never retried; checked before the allow-list
    pub non_retryable_faults: Option<Vec<FaultCategory>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            strategy: BackoffStrategy::Exponential,
            jitter: true,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            retryable_faults: None,
            non_retryable_faults: None,
        }
    }
}

impl RetryPolicy {
    /// Create a policy builder
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// Validate the policy
    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_delay.is_zero() {
            return Err(ConfigError::invalid("base_delay must be greater than 0"));
        }

        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid(format!(
                "max_delay ({:?}) must be at least base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }

        // Exponential delays must grow with every attempt
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(ConfigError::invalid(format!(
                "backoff_multiplier must be a finite number > 1.0, got {}",
                self.backoff_multiplier
            )));
        }

        Ok(())
    }

    /// Whether a fault of `category` should be retried under this policy
    pub fn is_retryable(&self, category: FaultCategory) -> bool {
        if let Some(denied) = &self.non_retryable_faults {
            if denied.contains(&category) {
                return false;
            }
        }

        match &self.retryable_faults {
            Some(allowed) => allowed.contains(&category),
            None => !category.is_terminal_by_default(),
        }
    }
}

/// Builder for [`RetryPolicy`] with fluent API
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default() }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.policy.strategy = strategy;
        self
    }

    pub fn fixed_backoff(self) -> Self {
        self.strategy(BackoffStrategy::Fixed)
    }

    pub fn linear_backoff(self) -> Self {
        self.strategy(BackoffStrategy::Linear)
    }

    pub fn exponential_backoff(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self.strategy(BackoffStrategy::Exponential)
    }

    pub fn fibonacci_backoff(self) -> Self {
        self.strategy(BackoffStrategy::Fibonacci)
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.policy.jitter = enabled;
        self
    }

    pub fn no_jitter(self) -> Self {
        self.jitter(false)
    }

    /// Retry only these categories
    pub fn retry_on<I: IntoIterator<Item = FaultCategory>>(mut self, categories: I) -> Self {
        self.policy.retryable_faults = Some(categories.into_iter().collect());
        self
    }

    /// Never retry these categories
    pub fn never_retry_on<I: IntoIterator<Item = FaultCategory>>(mut self, categories: I) -> Self {
        self.policy.non_retryable_faults = Some(categories.into_iter().collect());
        self
    }

    pub fn build(self) -> ConfigResult<RetryPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}
