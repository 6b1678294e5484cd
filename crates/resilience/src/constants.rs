// Default values for breaker and retry policies
use std::time::Duration;

/// Retry: default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry: default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Retry: default maximum delay cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Retry: default multiplier for exponential backoff
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Retry: fraction of the computed delay added at most by jitter
pub const JITTER_FRACTION: f64 = 0.1;

/// Retry: Fibonacci entries that fit in a `u64`; larger indices saturate
pub const MAX_FIBONACCI_ENTRIES: usize = 93;

/// Circuit breaker: default consecutive failures before opening
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Circuit breaker: default consecutive half-open successes before closing
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;

/// Circuit breaker: default time to wait before probing an open circuit
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// Circuit breaker: default deadline for a single protected call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
