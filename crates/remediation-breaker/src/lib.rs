#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-breaker** – Per-dependency circuit breaker.
//!
//! Three states, one breaker instance per named external dependency (the
//! bus, the store, the shared KV, the analyzer, the action executor):
//! `Closed` passes every call through and counts consecutive failures;
//! `Open` rejects immediately until a recovery timeout elapses; `HalfOpen`
//! admits exactly one probe call, returning to `Closed` on success or back
//! to `Open` on failure. State transitions are serialized per breaker via a
//! `tokio::sync::Mutex` so that concurrent callers never race past the
//! single-probe guarantee.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Errors raised by a breaker-wrapped call.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The breaker is open (or a concurrent probe already holds the
    /// half-open slot) and the call was rejected without being attempted.
    #[error("circuit breaker '{0}' is open")]
    Open(String),
    /// The wrapped call was attempted and itself failed.
    #[error(transparent)]
    Inner(E),
}

/// The three states a breaker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Passing calls through, counting consecutive failures.
    Closed,
    /// Rejecting every call until the recovery timeout elapses.
    Open,
    /// Admitting a single probe call.
    HalfOpen,
}

/// Tunables for one breaker instance.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in `Closed` before tripping to `Open`.
    pub failure_threshold: u32,
    /// How long `Open` rejects calls before allowing a `HalfOpen` probe.
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// A named circuit breaker guarding one external dependency.
///
/// Process-local by design (§9 of the specification): if multiple
/// orchestrator instances run, each maintains its own breaker rather than
/// sharing state through the KV, which instead carries the rate limiter.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    trips: AtomicU32,
}

impl CircuitBreaker {
    /// Build a breaker named `name` (used in error messages and tracing
    /// spans) with the given tunables.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            trips: AtomicU32::new(0),
        }
    }

    /// The dependency name this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, accounting for whether an `Open` breaker's recovery
    /// timeout has already elapsed (in which case it reports `HalfOpen`
    /// without yet committing the transition — that happens on the next
    /// `call`).
    pub async fn state(&self) -> BreakerState {
        let inner = self.inner.lock().await;
        self.effective_state(&inner)
    }

    /// Total number of times this breaker has tripped from `Closed` to
    /// `Open`, for diagnostics.
    pub fn trip_count(&self) -> u32 {
        self.trips.load(Ordering::Relaxed)
    }

    fn effective_state(&self, inner: &Inner) -> BreakerState {
        match inner.state {
            BreakerState::Open => match inner.opened_at {
                Some(opened_at) if opened_at.elapsed() >= self.config.recovery_timeout => {
                    BreakerState::HalfOpen
                }
                _ => BreakerState::Open,
            },
            other => other,
        }
    }

    /// Run `f` through the breaker. Rejects with [`BreakerError::Open`]
    /// without invoking `f` if the breaker is open or a half-open probe is
    /// already in flight; otherwise invokes `f` and records the outcome.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock().await;
            let effective = self.effective_state(&inner);
            match effective {
                BreakerState::Open => {
                    return Err(BreakerError::Open(self.name.clone()));
                }
                BreakerState::HalfOpen => {
                    if inner.probe_in_flight {
                        return Err(BreakerError::Open(self.name.clone()));
                    }
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                }
                BreakerState::Closed => {}
            }
        }

        let was_probe = {
            let inner = self.inner.lock().await;
            inner.state == BreakerState::HalfOpen
        };

        match f().await {
            Ok(value) => {
                let mut inner = self.inner.lock().await;
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
                Ok(value)
            }
            Err(err) => {
                let mut inner = self.inner.lock().await;
                inner.probe_in_flight = false;
                if was_probe {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                } else {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.state = BreakerState::Open;
                        inner.opened_at = Some(Instant::now());
                        self.trips.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(breaker = %self.name, "circuit breaker tripped open");
                    }
                }
                Err(BreakerError::Inner(err))
            }
        }
    }
}

/// A named collection of breakers, one per external dependency, built once
/// at startup and threaded through the orchestrator context (§9: "globals
/// / singletons -> explicit context").
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: std::collections::HashMap<String, std::sync::Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a breaker for `name`, replacing any prior registration.
    pub fn register(&mut self, name: impl Into<String>, config: BreakerConfig) {
        let name = name.into();
        self.breakers
            .insert(name.clone(), std::sync::Arc::new(CircuitBreaker::new(name, config)));
    }

    /// Fetch the breaker registered for `name`, if any.
    pub fn get(&self, name: &str) -> Option<std::sync::Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(threshold: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn trips_open_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("analyzer", cfg(2));
        for _ in 0..2 {
            let _: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
        }
        assert_eq!(breaker.state().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn open_rejects_without_calling() {
        let breaker = CircuitBreaker::new("analyzer", cfg(1));
        let _: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
        assert_eq!(breaker.state().await, BreakerState::Open);

        let result: Result<(), BreakerError<&str>> =
            breaker.call(|| async { panic!("must not be invoked") }).await;
        assert!(matches!(result, Err(BreakerError::Open(_))));
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_and_resets() {
        let breaker = CircuitBreaker::new("analyzer", cfg(1));
        let _: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let result: Result<(), BreakerError<&str>> = breaker.call(|| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("analyzer", cfg(1));
        let _: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("still broken") }).await;
        assert_eq!(breaker.state().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn closed_state_does_not_trip_on_isolated_failure() {
        let breaker = CircuitBreaker::new("analyzer", cfg(3));
        let _: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }
}
