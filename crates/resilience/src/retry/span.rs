//! Structured logging for one retry execution

use std::fmt::Display;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{ErrorSeverity, FaultCategory};

/// Log at the `tracing` level matching a fault's [`ErrorSeverity`]
macro_rules! log_at_severity {
    ($severity:expr, $($arg:tt)+) => {
        match $severity {
            ErrorSeverity::Info => info!($($arg)+),
            ErrorSeverity::Warning => warn!($($arg)+),
            ErrorSeverity::Error | ErrorSeverity::Critical => error!($($arg)+),
        }
    };
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Records the attempts of a single `execute` call
#[derive(Debug)]
pub(crate) struct RetrySpan<'a> {
    operation: &'a str,
    max_attempts: u32,
    total_delay: Duration,
}

impl<'a> RetrySpan<'a> {
    pub(crate) fn start(operation: &'a str, max_retries: u32) -> Self {
        let max_attempts = max_retries.saturating_add(1);
        debug!(operation, max_attempts, "Starting retry operation");
        Self { operation, max_attempts, total_delay: Duration::ZERO }
    }

    pub(crate) fn record_attempt(&self, attempt: u32) {
        debug!(
            operation = self.operation,
            attempt = attempt + 1,
            max_attempts = self.max_attempts,
            "Executing attempt"
        );
    }

    pub(crate) fn record_retry(
        &mut self,
        attempt: u32,
        severity: ErrorSeverity,
        error: &dyn Display,
        delay: Duration,
    ) {
        log_at_severity!(
            severity,
            operation = self.operation,
            attempt = attempt + 1,
            delay_ms = millis(delay),
            %severity,
            error = %error,
            "Attempt failed, retrying after backoff"
        );
        self.total_delay = self.total_delay.saturating_add(delay);
    }

    pub(crate) fn record_success(&self, attempts: u32) {
        if attempts > 1 {
            info!(
                operation = self.operation,
                attempts,
                total_delay_ms = millis(self.total_delay),
                "Operation succeeded after retries"
            );
        } else {
            debug!(operation = self.operation, "Operation succeeded on first attempt");
        }
    }

    pub(crate) fn record_non_retryable(
        &self,
        attempt: u32,
        category: FaultCategory,
        error: &dyn Display,
    ) {
        log_at_severity!(
            category.severity(),
            operation = self.operation,
            attempt = attempt + 1,
            %category,
            error = %error,
            "Non-retryable fault, giving up"
        );
    }

    pub(crate) fn record_exhausted(&self, error: &dyn Display) {
        warn!(
            operation = self.operation,
            max_attempts = self.max_attempts,
            total_delay_ms = millis(self.total_delay),
            error = %error,
            "All retry attempts exhausted"
        );
    }

    pub(crate) fn record_cancelled(&self, attempts: u32) {
        info!(operation = self.operation, attempts, "Retry operation cancelled");
    }
}
