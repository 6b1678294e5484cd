//! Resilience layer for Reelforge's remote backends.
//!
//! Calls to generative-AI, speech-synthesis, video-rendering and
//! social-posting services are unreliable. This crate provides the two
//! components that keep those failures from cascading:
//!
//! - **[`CircuitBreaker`]**: a named Closed/Open/Half-Open state machine that
//!   rejects calls to a failing dependency without invoking them, and probes
//!   for recovery after a reset timeout.
//! - **[`RetryManager`]**: re-runs a unit of work under a [`RetryPolicy`]
//!   with fixed, linear, exponential or fibonacci backoff, classifying faults
//!   as retryable or terminal.
//!
//! A [`CircuitBreakerRegistry`] hands out breakers by name, and the
//! [`compose`] module wires the two components together without either
//! depending on the other.
//!
//! # Units of work
//!
//! A unit of work is a zero-argument closure returning a future of
//! `Result<T, E>`. Faults are plain values: any `E` implementing
//! [`Classify`] can be retried selectively, and the ready-made [`Fault`]
//! type covers the common categories.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use reelforge_resilience::{
//!     compose, CircuitBreakerPolicy, CircuitBreakerRegistry, Fault, RetryManager, RetryPolicy,
//! };
//!
//! # async fn render() -> Result<String, Fault> { Ok("frame".into()) }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerPolicy::default()));
//! let breaker = registry.get_or_create("video-render", None)?;
//! let retry = RetryManager::new("video-render", RetryPolicy::default())?;
//!
//! let frame = compose::retry_through_breaker(&retry, &breaker, render).await?;
//! # let _ = frame;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod circuit_breaker;
pub mod compose;
pub mod constants;
pub mod error;
pub mod registry;
pub mod retry;
#[cfg(feature = "serde")]
pub mod serde_util;
pub mod time;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use circuit_breaker::{
    BreakerError, BreakerResult, CircuitBreaker, CircuitBreakerPolicy,
    CircuitBreakerPolicyBuilder, CircuitBreakerStats, CircuitState,
};
pub use error::{
    BoxedError, Classify, ConfigError, ConfigResult, ErrorSeverity, Fault, FaultCategory,
};
pub use registry::CircuitBreakerRegistry;
pub use retry::{
    BackoffStrategy, RetryError, RetryManager, RetryPolicy, RetryPolicyBuilder, RetryResult,
    RetryStats,
};
#[cfg(feature = "serde")]
pub use serde_util::duration_millis;
pub use time::{Clock, MockClock, SystemClock};
