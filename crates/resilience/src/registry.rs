//! Named lookup of circuit breakers
//!
//! The registry is an ordinary value owned by the application's composition
//! root and shared with `Arc`; there is no process-global instance.
//!
//! # Policy precedence
//!
//! The first call to [`CircuitBreakerRegistry::get_or_create`] for a name
//! decides that breaker's policy. Later calls with a different policy get
//! the existing breaker unchanged. Use [`CircuitBreakerRegistry::remove`]
//! to replace a breaker with a new policy.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerPolicy, CircuitBreakerStats};
use crate::error::ConfigResult;
use crate::time::{Clock, SystemClock};

/// Registry of circuit breakers keyed by name
pub struct CircuitBreakerRegistry<C: Clock + Clone = SystemClock> {
    breakers: DashMap<String, Arc<CircuitBreaker<C>>>,
    default_policy: CircuitBreakerPolicy,
    clock: C,
}

impl<C: Clock + Clone> fmt::Debug for CircuitBreakerRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.names())
            .field("default_policy", &self.default_policy)
            .finish()
    }
}

impl CircuitBreakerRegistry<SystemClock> {
    /// Create an empty registry using the system clock
    pub fn new(default_policy: CircuitBreakerPolicy) -> Self {
        Self::with_clock(default_policy, SystemClock)
    }
}

impl Default for CircuitBreakerRegistry<SystemClock> {
    fn default() -> Self {
        Self::new(CircuitBreakerPolicy::default())
    }
}

impl<C: Clock + Clone> CircuitBreakerRegistry<C> {
    /// Create an empty registry whose breakers share `clock`
    pub fn with_clock(default_policy: CircuitBreakerPolicy, clock: C) -> Self {
        Self { breakers: DashMap::new(), default_policy, clock }
    }

    /// Policy used when `get_or_create` is called without one
    pub fn default_policy(&self) -> &CircuitBreakerPolicy {
        &self.default_policy
    }

    /// Get the breaker for `name`, creating it on first use
    ///
    /// Exactly one breaker is ever created per name, even under concurrent
    /// first use. `policy` only applies when this call creates the breaker;
    /// it is validated either way.
    #[instrument(skip(self, policy))]
    pub fn get_or_create(
        &self,
        name: &str,
        policy: Option<CircuitBreakerPolicy>,
    ) -> ConfigResult<Arc<CircuitBreaker<C>>> {
        if let Some(policy) = &policy {
            policy.validate()?;
        }

        if let Some(existing) = self.breakers.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let entry = self.breakers.entry(name.to_string()).or_try_insert_with(|| {
            let policy = policy.unwrap_or_else(|| self.default_policy.clone());
            info!(breaker = name, ?policy, "Creating circuit breaker");
            CircuitBreaker::with_clock(name, policy, self.clock.clone()).map(Arc::new)
        })?;

        Ok(Arc::clone(entry.value()))
    }

    /// Get the breaker for `name` if it exists
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove the breaker for `name`
    ///
    /// Holders of the returned `Arc` keep a working breaker; the next
    /// `get_or_create` for the name builds a fresh one.
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker<C>>> {
        let removed = self.breakers.remove(name).map(|(_, breaker)| breaker);
        if removed.is_some() {
            debug!(breaker = name, "Removed circuit breaker from registry");
        }
        removed
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Statistics of every registered breaker, keyed by name
    pub fn get_all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        let breakers = self.snapshot();
        breakers.into_iter().map(|breaker| (breaker.name().to_string(), breaker.stats())).collect()
    }

    /// Reset every registered breaker to Closed
    pub fn reset_all(&self) {
        let breakers = self.snapshot();
        for breaker in &breakers {
            breaker.reset();
        }
        info!(count = breakers.len(), "Reset all circuit breakers");
    }

    /// Clone out the breakers so no map shard lock is held while they are used
    fn snapshot(&self) -> Vec<Arc<CircuitBreaker<C>>> {
        self.breakers.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::error::Fault;
    use crate::time::MockClock;

    fn strict_policy() -> CircuitBreakerPolicy {
        CircuitBreakerPolicy::builder().failure_threshold(1).build().unwrap()
    }

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let registry = CircuitBreakerRegistry::default();

        let first = registry.get_or_create("tts", None).unwrap();
        let second = registry.get_or_create("tts", None).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(first.policy(), registry.default_policy());
    }

    /// Validates the first writer wins scenario.
    ///
    /// Assertions:
    /// - Confirms a later policy for the same name is ignored.
    #[test]
    fn test_first_writer_wins() {
        let registry = CircuitBreakerRegistry::default();

        let created = registry.get_or_create("render", Some(strict_policy())).unwrap();
        let looked_up = registry
            .get_or_create("render", Some(CircuitBreakerPolicy::default()))
            .unwrap();

        assert!(Arc::ptr_eq(&created, &looked_up));
        assert_eq!(looked_up.policy().failure_threshold, 1);
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let registry = CircuitBreakerRegistry::default();
        let invalid = CircuitBreakerPolicy { success_threshold: 0, ..Default::default() };

        assert!(registry.get_or_create("social", Some(invalid)).is_err());
        assert!(registry.is_empty(), "nothing is registered for a rejected policy");
    }

    #[test]
    fn test_get_remove_and_names() {
        let registry = CircuitBreakerRegistry::default();
        assert!(registry.get("video").is_none());

        registry.get_or_create("video", None).unwrap();
        registry.get_or_create("audio", None).unwrap();
        assert_eq!(registry.names(), vec!["audio".to_string(), "video".to_string()]);
        assert!(registry.get("video").is_some());

        let removed = registry.remove("video").expect("video was registered");
        assert_eq!(removed.name(), "video");
        assert!(registry.remove("video").is_none());
        assert_eq!(registry.len(), 1);
    }

    /// Tests that concurrent first use creates exactly one breaker
    #[test]
    fn test_concurrent_get_or_create() {
        let registry = Arc::new(CircuitBreakerRegistry::default());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_create("shared", None).unwrap())
            })
            .collect();

        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for breaker in &breakers[1..] {
            assert!(Arc::ptr_eq(&breakers[0], breaker));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_all_stats_and_reset_all() {
        let clock = MockClock::new();
        let registry = CircuitBreakerRegistry::with_clock(strict_policy(), clock);

        let tts = registry.get_or_create("tts", None).unwrap();
        let render = registry.get_or_create("render", None).unwrap();
        let _ = tts.call(|| Err::<(), _>(Fault::unavailable("down")));
        render.call(|| Ok::<_, Fault>(())).unwrap();

        let stats = registry.get_all_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["tts"].state, CircuitState::Open);
        assert_eq!(stats["render"].state, CircuitState::Closed);
        assert_eq!(stats["render"].total_successes, 1);

        registry.reset_all();
        assert_eq!(tts.state(), CircuitState::Closed);
        assert_eq!(registry.get_all_stats()["tts"].total_failures, 1);
    }

    /// Breakers created by one registry share its clock.
    #[test]
    fn test_registry_clock_drives_breakers() {
        let clock = MockClock::new();
        let policy = CircuitBreakerPolicy::builder()
            .failure_threshold(1)
            .success_threshold(1)
            .reset_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        let registry = CircuitBreakerRegistry::with_clock(policy, clock.clone());

        let breaker = registry.get_or_create("gen-ai", None).unwrap();
        breaker.force_open();
        assert!(!breaker.is_available());

        clock.advance(Duration::from_secs(30));
        assert!(breaker.is_available());
    }
}
