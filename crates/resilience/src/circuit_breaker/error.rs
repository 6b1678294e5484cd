use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::{Classify, FaultCategory};

/// Result type for calls made through a circuit breaker
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Errors returned by a circuit breaker
///
/// Generic over the unit of work's own error type `E`, which is preserved
/// unchanged in [`BreakerError::OperationFailed`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the unit of work was not invoked
    #[error("circuit breaker '{name}' is open, next probe in {retry_after:?}")]
    CircuitOpen {
        name: String,
        /// When the failure that keeps the circuit open happened
        last_failure_at: DateTime<Utc>,
        /// Time left until the circuit lets a probe through
        retry_after: Duration,
    },

    /// The unit of work missed its deadline; its eventual result is discarded
    #[error("call through circuit breaker '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    /// The unit of work ran and failed
    #[error("operation failed: {source}")]
    OperationFailed {
        #[source]
        source: E,
    },
}

impl<E> BreakerError<E> {
    /// Whether the call was rejected by an open circuit
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Whether the call was abandoned at its deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The unit of work's own error, if it ran and failed
    pub fn inner(&self) -> Option<&E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }

    /// Consume the error and return the unit of work's own error, if any
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }
}

impl<E: Classify> Classify for BreakerError<E> {
    fn category(&self) -> FaultCategory {
        match self {
            Self::CircuitOpen { .. } => FaultCategory::CircuitOpen,
            Self::Timeout { .. } => FaultCategory::CircuitTimeout,
            Self::OperationFailed { source } => source.category(),
        }
    }
}
