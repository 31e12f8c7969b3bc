#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-kv** – Shared key/value abstraction.
//!
//! The rate limiter, fingerprint cache, and signal-replay buffer all need a
//! small set of atomic primitives over a shared store: `GET`, `SET` with
//! TTL, `INCR` with TTL-on-first-hit, and `DEL`. This crate defines that
//! surface as the [`SharedKv`] trait and ships an in-memory implementation;
//! a production deployment backs it with Redis or an equivalent and wires it
//! in at the runtime layer exactly like a storage backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

/// Errors raised by a [`SharedKv`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The backing store is unreachable.
    #[error("kv store unavailable: {0}")]
    Unavailable(String),
}

/// Minimal atomic operations needed by the rate limiter and fingerprint
/// cache. Every operation is safe to call concurrently from multiple tasks.
#[async_trait]
pub trait SharedKv: Send + Sync {
    /// Fetch a raw value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Store a value with an expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), KvError>;

    /// Atomically increment a counter, setting its TTL only on the first
    /// hit of a window (i.e. when the key did not previously exist or had
    /// already expired). Returns the post-increment value.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, KvError>;

    /// Remove a key.
    async fn del(&self, key: &str) -> Result<(), KvError>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// An in-memory [`SharedKv`] backed by a [`DashMap`], used by tests, the
/// demo binary, and single-process deployments. Expired entries are reaped
/// lazily on access.
#[derive(Default)]
pub struct InMemoryKv {
    entries: DashMap<String, Entry>,
}

impl InMemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedKv for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        match self.entries.get(key) {
            Some(entry) if entry.is_live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), KvError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, KvError> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: 0u64.to_le_bytes().to_vec(),
            expires_at: Instant::now() + ttl,
        });

        if !entry.is_live() {
            entry.value = 0u64.to_le_bytes().to_vec();
            entry.expires_at = Instant::now() + ttl;
        }

        let mut buf = [0u8; 8];
        buf.copy_from_slice(&entry.value);
        let next = u64::from_le_bytes(buf) + 1;
        entry.value = next.to_le_bytes().to_vec();
        Ok(next)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }
}
