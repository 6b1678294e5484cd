//! Backoff delay computation
//!
//! Delays are computed from a zero-indexed attempt number, clamped to the
//! policy's `max_delay`, then optionally jittered upwards by at most
//! [`JITTER_FRACTION`] of the clamped value.

use std::fmt;
use std::time::Duration;

use rand::Rng;

use crate::constants::JITTER_FRACTION;

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BackoffStrategy {
    /// `base_delay` for every attempt
    Fixed,
    /// `base_delay * (attempt + 1)`
    Linear,
    /// `base_delay * backoff_multiplier ^ attempt`
    Exponential,
    /// `base_delay * fib(attempt + 1)` with `fib = 1, 1, 2, 3, 5, ...`
    Fibonacci,
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Linear => write!(f, "linear"),
            Self::Exponential => write!(f, "exponential"),
            Self::Fibonacci => write!(f, "fibonacci"),
        }
    }
}

/// Parameters a delay is computed from
#[derive(Debug, Clone, Copy)]
pub(crate) struct DelayParams {
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

/// Fibonacci numbers `1, 1, 2, 3, 5, ...` precomputed up to a fixed length
///
/// Never grows after construction. Indices past the table are computed on
/// the fly with saturating arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FibonacciTable {
    values: Vec<u64>,
}

impl FibonacciTable {
    /// Table holding indices `0..len` (at least the two seed entries)
    pub(crate) fn with_len(len: usize) -> Self {
        let len = len.max(2);
        let mut values: Vec<u64> = Vec::with_capacity(len);
        values.push(1);
        values.push(1);
        while values.len() < len {
            let n = values.len();
            values.push(values[n - 1].saturating_add(values[n - 2]));
        }
        Self { values }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn get(&self, index: usize) -> u64 {
        if let Some(value) = self.values.get(index) {
            return *value;
        }

        let n = self.values.len();
        let (mut prev, mut curr) = (self.values[n - 2], self.values[n - 1]);
        for _ in n..=index {
            let next = prev.saturating_add(curr);
            prev = curr;
            curr = next;
            if curr == u64::MAX {
                break;
            }
        }
        curr
    }
}

/// Delay before the retry following `attempt`, clamped, without jitter
pub(crate) fn nominal_delay(params: &DelayParams, fib: &FibonacciTable, attempt: u32) -> Duration {
    let DelayParams { strategy, base_delay, max_delay, multiplier } = *params;

    let delay = match strategy {
        BackoffStrategy::Fixed => base_delay,
        BackoffStrategy::Linear => base_delay.saturating_mul(attempt.saturating_add(1)),
        BackoffStrategy::Exponential => {
            let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
            let nanos = base_delay.as_nanos() as f64 * multiplier.powi(exponent);
            if !nanos.is_finite() || nanos >= max_delay.as_nanos() as f64 {
                max_delay
            } else {
                Duration::from_nanos(nanos as u64)
            }
        }
        BackoffStrategy::Fibonacci => {
            let index = usize::try_from(attempt).unwrap_or(usize::MAX).saturating_add(1);
            match u32::try_from(fib.get(index)) {
                Ok(factor) => base_delay.saturating_mul(factor),
                Err(_) => max_delay,
            }
        }
    };

    delay.min(max_delay)
}

/// Add up to [`JITTER_FRACTION`] of `delay` on top of it
pub(crate) fn add_jitter<R: Rng + ?Sized>(delay: Duration, rng: &mut R) -> Duration {
    let fraction = JITTER_FRACTION * rng.gen::<f64>();
    let extra = Duration::try_from_secs_f64(delay.as_secs_f64() * fraction).unwrap_or_default();
    delay.saturating_add(extra)
}
