use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};

/// Sentinel for "no open-until timestamp"
const NOT_OPEN: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub provider_id: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Unix milliseconds, present while open
    pub open_until_ms: Option<i64>,
}

/// Failure gate in front of one outbound provider.
///
/// The orchestrator only talks to this trait, so a shared-store backed
/// breaker can replace the in-process one without touching call sites.
pub trait CircuitBreaker: Send + Sync + Debug {
    /// True while calls should fast-fail. Clears an expired open state.
    fn is_open(&self) -> bool;

    fn record_success(&self);

    fn record_failure(&self);

    fn snapshot(&self) -> CircuitSnapshot;
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Per-process breaker. No half-open probe state: the first call after the
/// cooldown is a normal call and its outcome drives the next transition.
#[derive(Debug)]
pub struct InMemoryCircuitBreaker {
    provider_id: String,
    consecutive_failures: AtomicU32,
    open_until_ms: AtomicI64,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl InMemoryCircuitBreaker {
    pub fn new(provider_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(provider_id, config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        provider_id: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            consecutive_failures: AtomicU32::new(0),
            open_until_ms: AtomicI64::new(NOT_OPEN),
            config,
            clock,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    fn cooldown_ms(&self) -> i64 {
        i64::try_from(self.config.cooldown.as_millis()).unwrap_or(i64::MAX)
    }
}

impl CircuitBreaker for InMemoryCircuitBreaker {
    fn is_open(&self) -> bool {
        let open_until = self.open_until_ms.load(Ordering::SeqCst);
        if open_until == NOT_OPEN {
            return false;
        }

        if self.clock.now_ms() < open_until {
            return true;
        }

        // Cooldown elapsed; only the caller that clears it logs the transition
        if self
            .open_until_ms
            .compare_exchange(open_until, NOT_OPEN, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!(
                provider_id = %self.provider_id,
                "circuit breaker cooldown elapsed, allowing calls"
            );
        }
        false
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.open_until_ms.store(NOT_OPEN, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        let failures = self
            .consecutive_failures
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1);

        if failures < self.config.failure_threshold {
            return;
        }

        let now = self.clock.now_ms();
        let current = self.open_until_ms.load(Ordering::SeqCst);
        // An expired window nobody has cleared yet counts as closed
        if current != NOT_OPEN && now < current {
            return;
        }

        let open_until = now.saturating_add(self.cooldown_ms());
        if self
            .open_until_ms
            .compare_exchange(current, open_until, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            tracing::warn!(
                metric = "circuit_opened",
                provider_id = %self.provider_id,
                failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit breaker opened"
            );
        }
    }

    fn snapshot(&self) -> CircuitSnapshot {
        let open_until = self.open_until_ms.load(Ordering::SeqCst);
        let open = open_until != NOT_OPEN && self.clock.now_ms() < open_until;

        CircuitSnapshot {
            provider_id: self.provider_id.clone(),
            state: if open {
                CircuitState::Open
            } else {
                CircuitState::Closed
            },
            consecutive_failures: self.consecutive_failures(),
            open_until_ms: (open_until != NOT_OPEN).then_some(open_until),
        }
    }
}

type BreakerFactory = dyn Fn(&str) -> Arc<dyn CircuitBreaker> + Send + Sync;

/// One breaker per provider id, created on first use
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<dyn CircuitBreaker>>>,
    factory: Box<BreakerFactory>,
}

impl CircuitBreakerRegistry {
    /// Registry of in-memory breakers sharing one config and clock
    pub fn in_memory(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_factory(move |provider_id| {
            Arc::new(InMemoryCircuitBreaker::with_clock(
                provider_id,
                config.clone(),
                clock.clone(),
            ))
        })
    }

    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn CircuitBreaker> + Send + Sync + 'static,
    {
        Self {
            breakers: RwLock::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    pub fn breaker_for(&self, provider_id: &str) -> Arc<dyn CircuitBreaker> {
        {
            let breakers = self
                .breakers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(breaker) = breakers.get(provider_id) {
                return breaker.clone();
            }
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(provider_id.to_string())
            .or_insert_with(|| (self.factory)(provider_id))
            .clone()
    }

    /// Snapshots of every breaker created so far, sorted by provider id
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let breakers = self
            .breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut snapshots: Vec<_> = breakers.values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        snapshots
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::in_memory(CircuitBreakerConfig::default(), Arc::new(SystemClock::new()))
    }
}

impl Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn breaker(clock: &MockClock) -> InMemoryCircuitBreaker {
        InMemoryCircuitBreaker::with_clock(
            "twilio",
            CircuitBreakerConfig::default(),
            Arc::new(clock.clone()),
        )
    }

    #[test]
    fn test_circuit_breaker_starts_closed() {
        let clock = MockClock::default();
        let cb = breaker(&clock);

        assert!(!cb.is_open());
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
        assert_eq!(cb.snapshot().open_until_ms, None);
    }

    #[test]
    fn test_circuit_breaker_opens_after_threshold() {
        let clock = MockClock::default();
        let cb = breaker(&clock);

        for _ in 0..4 {
            cb.record_failure();
            assert!(!cb.is_open());
        }

        cb.record_failure();
        assert!(cb.is_open());
        assert_eq!(cb.snapshot().state, CircuitState::Open);
    }

    #[test]
    fn test_circuit_breaker_open_close_cycle() {
        let clock = MockClock::default();
        let cb = breaker(&clock);

        for _ in 0..5 {
            cb.record_failure();
        }

        clock.advance(Duration::from_secs(59));
        assert!(cb.is_open());

        clock.advance(Duration::from_secs(1));
        assert!(!cb.is_open());

        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(!cb.is_open());
    }

    #[test]
    fn test_failure_after_unobserved_cooldown_reopens() {
        let clock = MockClock::default();
        let cb = breaker(&clock);

        for _ in 0..5 {
            cb.record_failure();
        }
        let first_window = cb.snapshot().open_until_ms;

        // A slow attempt fails after the cooldown with no is_open() in between
        clock.advance(Duration::from_secs(61));
        cb.record_failure();

        assert_eq!(cb.consecutive_failures(), 6);
        assert!(cb.is_open());
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.open_until_ms, Some(clock.now_ms() + 60_000));
        assert_ne!(snapshot.open_until_ms, first_window);
    }

    #[test]
    fn test_failure_after_cooldown_reopens_immediately() {
        let clock = MockClock::default();
        let cb = breaker(&clock);

        for _ in 0..5 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(60));
        assert!(!cb.is_open());

        // The count was never reset, so one more failure trips it again
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let clock = MockClock::default();
        let cb = breaker(&clock);

        for _ in 0..4 {
            cb.record_failure();
        }
        cb.record_success();
        for _ in 0..4 {
            cb.record_failure();
        }

        assert!(!cb.is_open());
        assert_eq!(cb.consecutive_failures(), 4);
    }

    #[test]
    fn test_failures_while_open_do_not_extend_cooldown() {
        let clock = MockClock::default();
        let cb = breaker(&clock);

        for _ in 0..5 {
            cb.record_failure();
        }
        let opened_until = cb.snapshot().open_until_ms;

        clock.advance(Duration::from_secs(30));
        cb.record_failure();

        assert_eq!(cb.snapshot().open_until_ms, opened_until);
    }

    #[test]
    fn test_custom_threshold_and_cooldown() {
        let clock = MockClock::default();
        let cb = InMemoryCircuitBreaker::with_clock(
            "ses",
            CircuitBreakerConfig {
                failure_threshold: 2,
                cooldown: Duration::from_secs(5),
            },
            Arc::new(clock.clone()),
        );

        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_open());

        clock.advance(Duration::from_secs(5));
        assert!(!cb.is_open());
    }

    #[test]
    fn test_registry_reuses_breakers_per_provider() {
        let clock = MockClock::default();
        let registry =
            CircuitBreakerRegistry::in_memory(CircuitBreakerConfig::default(), Arc::new(clock));

        let a = registry.breaker_for("twilio");
        let b = registry.breaker_for("twilio");
        let other = registry.breaker_for("ses");

        for _ in 0..5 {
            a.record_failure();
        }

        assert!(b.is_open());
        assert!(!other.is_open());

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].provider_id, "ses");
        assert_eq!(snapshot[1].provider_id, "twilio");
        assert_eq!(snapshot[1].state, CircuitState::Open);
    }

    #[test]
    fn test_registry_with_custom_factory() {
        let registry = CircuitBreakerRegistry::with_factory(|provider_id| {
            Arc::new(InMemoryCircuitBreaker::new(
                provider_id,
                CircuitBreakerConfig {
                    failure_threshold: 1,
                    cooldown: Duration::from_secs(60),
                },
            ))
        });

        let cb = registry.breaker_for("fcm");
        cb.record_failure();
        assert!(cb.is_open());
    }
}
