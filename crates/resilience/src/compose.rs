//! Wiring retry managers and circuit breakers together
//!
//! Neither component knows about the other. These helpers nest them through
//! ordinary closures:
//!
//! - [`retry_through_breaker`] is the default: the retry manager is outside
//!   and every attempt goes through the breaker. Once the breaker opens, the
//!   resulting [`BreakerError::CircuitOpen`] is a terminal fault for the
//!   retry manager unless its policy lists [`FaultCategory::CircuitOpen`] in
//!   `retryable_faults`.
//! - [`breaker_around_retry`] nests the other way: the breaker sees one call
//!   per retry loop, and its `call_timeout` bounds the whole loop including
//!   backoff sleeps.
//! - [`guarded`] and [`retrying`] turn a unit of work into a wrapped unit of
//!   work for callers that want to build their own nesting.
//!
//! [`FaultCategory::CircuitOpen`]: crate::FaultCategory::CircuitOpen

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::circuit_breaker::{BreakerError, BreakerResult, CircuitBreaker};
use crate::error::Classify;
use crate::retry::{RetryError, RetryManager, RetryResult};
use crate::time::Clock;

/// Run `operation` under `retry`, sending every attempt through `breaker`
pub async fn retry_through_breaker<C, F, Fut, T, E>(
    retry: &RetryManager,
    breaker: &CircuitBreaker<C>,
    operation: F,
) -> RetryResult<T, BreakerError<E>>
where
    C: Clock,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    let operation = &operation;
    retry.execute(move || breaker.execute(operation)).await
}

/// Run the whole retry loop of `retry` as a single call through `breaker`
pub async fn breaker_around_retry<C, F, Fut, T, E>(
    breaker: &CircuitBreaker<C>,
    retry: &RetryManager,
    operation: F,
) -> BreakerResult<T, RetryError<E>>
where
    C: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    breaker.execute(move || retry.execute(operation)).await
}

/// Wrap `operation` so every invocation goes through `breaker`
pub fn guarded<'a, C, F, Fut, T, E>(
    breaker: &'a CircuitBreaker<C>,
    operation: F,
) -> impl Fn() -> BoxFuture<'a, BreakerResult<T, E>> + Send + Sync + 'a
where
    C: Clock,
    F: Fn() -> Fut + Send + Sync + 'a,
    Fut: Future<Output = Result<T, E>> + Send + 'a,
    T: Send + 'a,
    E: Send + 'a,
{
    let operation = Arc::new(operation);
    move || {
        let operation = Arc::clone(&operation);
        async move { breaker.execute(move || operation()).await }.boxed()
    }
}

/// Wrap `operation` so every invocation runs a full retry loop of `retry`
pub fn retrying<'a, F, Fut, T, E>(
    retry: &'a RetryManager,
    operation: F,
) -> impl Fn() -> BoxFuture<'a, RetryResult<T, E>> + Send + Sync + 'a
where
    F: Fn() -> Fut + Send + Sync + 'a,
    Fut: Future<Output = Result<T, E>> + Send + 'a,
    T: Send + 'a,
    E: Classify + fmt::Display + Send + 'a,
{
    let operation = Arc::new(operation);
    move || {
        let operation = Arc::clone(&operation);
        async move { retry.execute(move || operation()).await }.boxed()
    }
}
