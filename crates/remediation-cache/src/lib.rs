#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-cache** – Two-tier fingerprint cache.
//!
//! A pattern fingerprint is the tuple `(source, error_code, normalized error
//! shape)` produced by `Signal::fingerprint`. This crate maps a fingerprint
//! to a hint about a recently-seen [`Pattern`](remediation_types::Pattern):
//! its id, first/last seen timestamps, a hit count, and the set of
//! merchants that have contributed to it.
//!
//! Lookup is two-tier: a process-local [`DashMap`] with its own TTL is
//! consulted first; a miss falls through to the shared KV (§6 of the
//! specification) so that multiple orchestrator instances converge on the
//! same fingerprints. The cache is authoritative only as a hint — the
//! durable store (`remediation-store-core::DurableStore::find_recent_patterns`)
//! remains the system of record; `detect_patterns` falls back to it on a
//! full miss.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use remediation_kv::SharedKv;
use remediation_types::{MerchantKey, PatternId, SignalSource};
use serde::{Deserialize, Serialize};

/// A pattern fingerprint: origin, normalized error code, and normalized
/// error shape. See `Signal::fingerprint`.
pub type Fingerprint = (SignalSource, String, String);

/// What the cache knows about a fingerprint: a hint at an existing pattern,
/// not a copy of the pattern itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintHint {
    /// The pattern this fingerprint has been clustering into, if promoted.
    pub pattern_id: Option<PatternId>,
    /// Timestamp of the first signal observed with this fingerprint.
    pub first_seen: DateTime<Utc>,
    /// Timestamp of the most recent signal observed with this fingerprint.
    pub last_seen: DateTime<Utc>,
    /// Number of signals observed with this fingerprint so far.
    pub count: u64,
    /// Every merchant that has contributed a signal with this fingerprint.
    pub merchants: HashSet<MerchantKey>,
}

impl FingerprintHint {
    fn first(merchant: MerchantKey) -> Self {
        let now = Utc::now();
        let mut merchants = HashSet::new();
        merchants.insert(merchant);
        Self {
            pattern_id: None,
            first_seen: now,
            last_seen: now,
            count: 1,
            merchants,
        }
    }

    fn record(&mut self, merchant: MerchantKey) {
        self.last_seen = Utc::now();
        self.count += 1;
        self.merchants.insert(merchant);
    }
}

fn fingerprint_key(fp: &Fingerprint) -> String {
    format!("fingerprint:{}:{}:{}", fp.0, fp.1, fp.2)
}

/// A process-local cache entry tagged with its insertion time so the
/// process-local tier can enforce its own TTL independent of the shared KV.
#[derive(Clone)]
struct LocalEntry {
    hint: FingerprintHint,
    inserted_at: Instant,
}

/// Errors raised while consulting the cache. The shared KV leg fails open
/// (§4.5 mirrors this posture for the rate limiter): a KV error degrades to
/// a process-local-only view rather than blocking pattern detection.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A cached value failed to (de)serialize.
    #[error("fingerprint cache serialization error: {0}")]
    Serialization(String),
}

/// Process-local + shared-KV fingerprint cache.
///
/// `record` is called once per signal by `detect_patterns`; it returns the
/// updated hint so the caller can decide whether the hit count clears the
/// promotion threshold. The process-local tier has its own TTL, independent
/// of whatever expiry the shared KV entry carries, so that a slow KV never
/// forces a local re-derivation more often than configured.
pub struct FingerprintCache {
    local: DashMap<Fingerprint, LocalEntry>,
    local_ttl: Duration,
    kv_ttl: Duration,
}

impl FingerprintCache {
    /// Build a cache with the given process-local and shared-KV TTLs.
    pub fn new(local_ttl: Duration, kv_ttl: Duration) -> Self {
        Self {
            local: DashMap::new(),
            local_ttl,
            kv_ttl,
        }
    }

    /// Look up a fingerprint without recording a hit. Consults the
    /// process-local tier only; used by callers that just want to peek
    /// (e.g. diagnostics) without mutating cache state. An entry past its
    /// local TTL is treated as absent and evicted.
    pub fn peek(&self, fingerprint: &Fingerprint) -> Option<FingerprintHint> {
        self.local_hit(fingerprint)
    }

    /// Return the cached hint for `fingerprint` if present and still within
    /// `local_ttl`, evicting it first if it has expired.
    fn local_hit(&self, fingerprint: &Fingerprint) -> Option<FingerprintHint> {
        let expired = match self.local.get(fingerprint) {
            Some(entry) if entry.inserted_at.elapsed() <= self.local_ttl => {
                return Some(entry.hint.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.local.remove(fingerprint);
        }
        None
    }

    fn local_insert(&self, fingerprint: Fingerprint, hint: FingerprintHint) {
        self.local.insert(
            fingerprint,
            LocalEntry {
                hint,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Record a signal observation for `fingerprint` from `merchant`,
    /// consulting the process-local tier first and the shared KV on a miss,
    /// and returns the updated hint.
    ///
    /// On a KV error the cache degrades to process-local-only for this call
    /// rather than propagating the failure to the reasoning pipeline — the
    /// fingerprint cache is a hint, never the system of record.
    pub async fn record(
        &self,
        kv: &dyn SharedKv,
        fingerprint: Fingerprint,
        merchant: MerchantKey,
    ) -> Result<FingerprintHint, CacheError> {
        if let Some(mut hint) = self.local_hit(&fingerprint) {
            hint.record(merchant.clone());
            self.local_insert(fingerprint.clone(), hint.clone());
            self.sync_kv(kv, &fingerprint, &hint).await;
            return Ok(hint);
        }

        let key = fingerprint_key(&fingerprint);
        let from_kv = match kv.get(&key).await {
            Ok(Some(bytes)) => serde_json::from_slice::<FingerprintHint>(&bytes)
                .map_err(|e| CacheError::Serialization(e.to_string()))?
                .into(),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "fingerprint cache KV unreachable, degrading to process-local");
                None
            }
        };

        let mut hint = from_kv.unwrap_or_else(|| FingerprintHint::first(merchant.clone()));
        hint.record(merchant);
        self.local_insert(fingerprint.clone(), hint.clone());
        self.sync_kv(kv, &fingerprint, &hint).await;
        Ok(hint)
    }

    /// Attach a pattern id to a fingerprint once `detect_patterns` promotes
    /// it, so future hits report the promoted pattern directly.
    pub async fn promote(
        &self,
        kv: &dyn SharedKv,
        fingerprint: &Fingerprint,
        pattern_id: PatternId,
    ) -> Result<(), CacheError> {
        if let Some(mut hint) = self.local_hit(fingerprint) {
            hint.pattern_id = Some(pattern_id);
            self.local_insert(fingerprint.clone(), hint.clone());
            self.sync_kv(kv, fingerprint, &hint).await;
        }
        Ok(())
    }

    async fn sync_kv(&self, kv: &dyn SharedKv, fingerprint: &Fingerprint, hint: &FingerprintHint) {
        let key = fingerprint_key(fingerprint);
        match serde_json::to_vec(hint) {
            Ok(bytes) => {
                if let Err(err) = kv.set(&key, bytes, self.kv_ttl).await {
                    tracing::warn!(error = %err, "failed to sync fingerprint hint to shared KV");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to serialize fingerprint hint"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remediation_kv::InMemoryKv;

    fn fp() -> Fingerprint {
        (SignalSource::WebhookFailure, "WEBHOOK_404".into(), "webhook timeout".into())
    }

    #[tokio::test]
    async fn first_observation_starts_count_at_one() {
        let cache = FingerprintCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let kv = InMemoryKv::new();
        let hint = cache.record(&kv, fp(), MerchantKey::from("m1")).await.unwrap();
        assert_eq!(hint.count, 1);
        assert!(hint.pattern_id.is_none());
    }

    #[tokio::test]
    async fn repeated_observations_accumulate_across_merchants() {
        let cache = FingerprintCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let kv = InMemoryKv::new();
        cache.record(&kv, fp(), MerchantKey::from("m1")).await.unwrap();
        let hint = cache.record(&kv, fp(), MerchantKey::from("m2")).await.unwrap();
        assert_eq!(hint.count, 2);
        assert_eq!(hint.merchants.len(), 2);
    }

    #[tokio::test]
    async fn promotion_is_visible_to_subsequent_hits() {
        let cache = FingerprintCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let kv = InMemoryKv::new();
        cache.record(&kv, fp(), MerchantKey::from("m1")).await.unwrap();
        let pattern_id = PatternId::new();
        cache.promote(&kv, &fp(), pattern_id).await.unwrap();
        let hint = cache.record(&kv, fp(), MerchantKey::from("m2")).await.unwrap();
        assert_eq!(hint.pattern_id, Some(pattern_id));
    }

    #[tokio::test]
    async fn shared_kv_converges_a_fresh_process_local_cache() {
        let kv = InMemoryKv::new();
        let cache_a = FingerprintCache::new(Duration::from_secs(60), Duration::from_secs(60));
        cache_a.record(&kv, fp(), MerchantKey::from("m1")).await.unwrap();

        let cache_b = FingerprintCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let hint = cache_b.record(&kv, fp(), MerchantKey::from("m2")).await.unwrap();
        assert_eq!(hint.count, 2);
    }

    #[tokio::test]
    async fn process_local_entries_expire_after_their_own_ttl() {
        let cache = FingerprintCache::new(Duration::from_millis(10), Duration::from_secs(60));
        let kv = InMemoryKv::new();
        cache.record(&kv, fp(), MerchantKey::from("m1")).await.unwrap();
        assert!(cache.peek(&fp()).is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(
            cache.peek(&fp()).is_none(),
            "entry should have been evicted once past the process-local TTL"
        );

        // The shared KV tier has its own, longer TTL, so a fallthrough after
        // local expiry still converges on the prior count instead of
        // restarting from a fresh candidate.
        let hint = cache.record(&kv, fp(), MerchantKey::from("m2")).await.unwrap();
        assert_eq!(hint.count, 2);
    }
}
