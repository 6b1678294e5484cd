use thiserror::Error;

use crate::error::{Classify, FaultCategory};

/// Result type for retried operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Errors returned by a retry manager
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The fault is terminal under the policy; no retry was attempted
    #[error("operation failed with non-retryable error: {source}")]
    NonRetryable {
        #[source]
        source: E,
    },

    /// Every attempt failed with a retryable fault
    #[error("all {attempts} attempts exhausted, last error: {source}")]
    Exhausted {
        attempts: u32,
        /// Fault returned by the final attempt
        #[source]
        source: E,
    },

    /// The retry loop was cancelled while waiting between attempts
    #[error("retry cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// Whether every attempt was used up
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Whether the loop was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Number of attempts made, when the variant records it
    ///
    /// A terminal fault always stops the loop on the attempt that raised
    /// it, so the count is not stored for [`RetryError::NonRetryable`].
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted { attempts, .. } | Self::Cancelled { attempts } => Some(*attempts),
            Self::NonRetryable { .. } => None,
        }
    }

    /// The last fault returned by the unit of work, if any
    pub fn inner(&self) -> Option<&E> {
        match self {
            Self::NonRetryable { source } | Self::Exhausted { source, .. } => Some(source),
            Self::Cancelled { .. } => None,
        }
    }

    /// Consume the error and return the last fault, if any
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::NonRetryable { source } | Self::Exhausted { source, .. } => Some(source),
            Self::Cancelled { .. } => None,
        }
    }
}

impl<E: Classify> Classify for RetryError<E> {
    fn category(&self) -> FaultCategory {
        match self {
            Self::NonRetryable { source } => source.category(),
            Self::Exhausted { .. } => FaultCategory::RetryExhausted,
            Self::Cancelled { .. } => FaultCategory::Cancelled,
        }
    }
}
