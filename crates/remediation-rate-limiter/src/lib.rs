#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-rate-limiter** – Sliding-window limiter per `(merchant,
//! action_type)`.
//!
//! The limiter is a thin policy layer over [`remediation_kv::SharedKv`]'s
//! `incr` primitive: each window is one KV counter keyed by merchant,
//! action type, and a coarse time bucket, with its TTL set on the window's
//! first hit so it expires on its own. `flag_excessive` writes a separate,
//! longer-lived key so operators can review a merchant that keeps bumping
//! the limit even after the counting window itself has rolled over.
//!
//! Fail-open policy (§4.5): if the KV is unreachable, the limiter allows
//! the action and logs a degradation warning rather than blocking the
//! pipeline — the circuit breaker wrapping the KV dependency will soon
//! quarantine it if the outage persists.

use std::time::Duration;

use chrono::Utc;
use remediation_kv::SharedKv;
use remediation_types::{ActionType, MerchantKey};

const FLAG_TTL: Duration = Duration::from_secs(3600);

/// Per-action-type limit and window width used by `check_and_reserve`.
#[derive(Debug, Clone, Copy)]
pub struct WindowLimit {
    /// Maximum number of reservations allowed within one window.
    pub limit: u64,
    /// Width of the sliding window.
    pub window: Duration,
}

impl WindowLimit {
    /// Build a limit of `limit` reservations per `window`.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }
}

impl Default for WindowLimit {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(60))
    }
}

/// Outcome of a [`RateLimiter::check_and_reserve`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationOutcome {
    /// Whether the reservation was granted.
    pub allowed: bool,
    /// The counter value after this call (including this attempt).
    pub current: u64,
    /// The configured limit for this window.
    pub limit: u64,
}

fn window_bucket(window: Duration) -> i64 {
    let width = window.as_secs().max(1) as i64;
    Utc::now().timestamp() / width
}

fn counter_key(merchant: &MerchantKey, action_type: ActionType, bucket: i64) -> String {
    format!("ratelimit:{merchant}:{action_type:?}:{bucket}")
}

fn flag_key(merchant: &MerchantKey, action_type: ActionType) -> String {
    format!("ratelimit:flagged:{merchant}:{action_type:?}")
}

/// Sliding-window counter per `(merchant, action_type)`, backed by a shared
/// KV so that every orchestrator instance observes the same counts.
pub struct RateLimiter {
    default_limit: WindowLimit,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(WindowLimit::default())
    }
}

impl RateLimiter {
    /// Build a limiter applying `default_limit` to every action type.
    pub fn new(default_limit: WindowLimit) -> Self {
        Self { default_limit }
    }

    /// Atomically increment the window counter for `(merchant, action_type)`
    /// and report whether the reservation is within the configured limit.
    ///
    /// On a KV failure, fails open: returns `allowed = true` with
    /// `current = 0` and logs a `warn` so the caller can still record a
    /// degradation event per §4.5.
    pub async fn check_and_reserve(
        &self,
        kv: &dyn SharedKv,
        merchant: &MerchantKey,
        action_type: ActionType,
    ) -> ReservationOutcome {
        let window = self.default_limit.window;
        let bucket = window_bucket(window);
        let key = counter_key(merchant, action_type, bucket);

        match kv.incr(&key, window).await {
            Ok(current) => ReservationOutcome {
                allowed: current <= self.default_limit.limit,
                current,
                limit: self.default_limit.limit,
            },
            Err(err) => {
                tracing::warn!(
                    merchant = %merchant,
                    action_type = ?action_type,
                    error = %err,
                    "rate limiter KV unreachable, failing open"
                );
                ReservationOutcome {
                    allowed: true,
                    current: 0,
                    limit: self.default_limit.limit,
                }
            }
        }
    }

    /// Flag `(merchant, action_type)` for operator review when it keeps
    /// exceeding `threshold`. The flag persists for one hour independent of
    /// the counting window, so it survives across several rolled-over
    /// windows of continued abuse.
    pub async fn flag_excessive(
        &self,
        kv: &dyn SharedKv,
        merchant: &MerchantKey,
        action_type: ActionType,
        current: u64,
        threshold: u64,
    ) {
        if current < threshold {
            return;
        }
        let key = flag_key(merchant, action_type);
        if let Err(err) = kv.set(&key, b"1".to_vec(), FLAG_TTL).await {
            tracing::warn!(merchant = %merchant, error = %err, "failed to persist excessive-use flag");
        }
    }

    /// Whether `(merchant, action_type)` currently carries an excessive-use
    /// flag set by a prior `flag_excessive` call.
    pub async fn is_flagged(
        &self,
        kv: &dyn SharedKv,
        merchant: &MerchantKey,
        action_type: ActionType,
    ) -> bool {
        let key = flag_key(merchant, action_type);
        matches!(kv.get(&key).await, Ok(Some(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remediation_kv::InMemoryKv;

    #[tokio::test]
    async fn allows_reservations_within_limit() {
        let kv = InMemoryKv::new();
        let limiter = RateLimiter::new(WindowLimit::new(2, Duration::from_secs(60)));
        let merchant = MerchantKey::from("m1");

        let first = limiter
            .check_and_reserve(&kv, &merchant, ActionType::SupportGuidance)
            .await;
        assert!(first.allowed);
        let second = limiter
            .check_and_reserve(&kv, &merchant, ActionType::SupportGuidance)
            .await;
        assert!(second.allowed);
    }

    #[tokio::test]
    async fn denies_reservation_past_limit() {
        let kv = InMemoryKv::new();
        let limiter = RateLimiter::new(WindowLimit::new(1, Duration::from_secs(60)));
        let merchant = MerchantKey::from("m1");

        limiter
            .check_and_reserve(&kv, &merchant, ActionType::SupportGuidance)
            .await;
        let second = limiter
            .check_and_reserve(&kv, &merchant, ActionType::SupportGuidance)
            .await;
        assert!(!second.allowed);
        assert_eq!(second.current, 2);
        assert_eq!(second.limit, 1);
    }

    #[tokio::test]
    async fn counters_are_independent_per_action_type() {
        let kv = InMemoryKv::new();
        let limiter = RateLimiter::new(WindowLimit::new(1, Duration::from_secs(60)));
        let merchant = MerchantKey::from("m1");

        limiter
            .check_and_reserve(&kv, &merchant, ActionType::SupportGuidance)
            .await;
        let other = limiter
            .check_and_reserve(&kv, &merchant, ActionType::RetryOperation)
            .await;
        assert!(other.allowed);
    }

    #[tokio::test]
    async fn flag_persists_and_is_queryable() {
        let kv = InMemoryKv::new();
        let limiter = RateLimiter::new(WindowLimit::new(10, Duration::from_secs(60)));
        let merchant = MerchantKey::from("m1");

        assert!(!limiter.is_flagged(&kv, &merchant, ActionType::SupportGuidance).await);
        limiter
            .flag_excessive(&kv, &merchant, ActionType::SupportGuidance, 11, 10)
            .await;
        assert!(limiter.is_flagged(&kv, &merchant, ActionType::SupportGuidance).await);
    }

    #[tokio::test]
    async fn flag_below_threshold_is_noop() {
        let kv = InMemoryKv::new();
        let limiter = RateLimiter::new(WindowLimit::new(10, Duration::from_secs(60)));
        let merchant = MerchantKey::from("m1");

        limiter
            .flag_excessive(&kv, &merchant, ActionType::SupportGuidance, 5, 10)
            .await;
        assert!(!limiter.is_flagged(&kv, &merchant, ActionType::SupportGuidance).await);
    }
}
