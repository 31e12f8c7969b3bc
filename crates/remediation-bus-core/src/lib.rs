#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-bus-core** – Signal bus abstraction for the remediation core.
//!
//! This crate defines the [`SignalBus`] trait consumed by the orchestrator
//! and ships an [`InMemoryBus`] reference implementation used by tests and
//! the demo binary. A production deployment supplies its own adapter over
//! the real broker (Kafka, SQS, ...) implementing the same trait; orchestrator
//! code never depends on which one is wired in.
//!
//! Delivery guarantees (§4.1 of the specification): ordered within a
//! partition key (the merchant), manual commit only after every message in a
//! batch has been durably processed, and redelivery of uncommitted messages
//! on crash — so every downstream consumer must be idempotent per
//! `signal_id`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use remediation_types::{MerchantKey, Signal};
use tokio::time::timeout;

/// A single delivery from the bus: the signal payload plus the partition
/// offset needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The normalized signal payload.
    pub signal: Signal,
    /// Monotonically increasing offset within the signal's partition
    /// (merchant), used purely for diagnostics — commit is batch-granular,
    /// not per-offset.
    pub offset: u64,
}

/// Errors raised by a [`SignalBus`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus (or the dependency it wraps) is unavailable.
    #[error("bus fetch failed: {0}")]
    FetchFailed(String),
    /// A circuit breaker protecting the fetch call is open.
    #[error("bus fetch circuit is open")]
    CircuitOpen,
    /// Commit was attempted with no outstanding uncommitted batch.
    #[error("commit called with no pending batch")]
    NothingToCommit,
}

/// Pull-based, resumable, backpressured signal consumer.
///
/// Implementors MUST guarantee ordered delivery within a partition key
/// (merchant) and MUST NOT drop a message until [`SignalBus::commit`] is
/// called for the batch it was delivered in.
#[async_trait]
pub trait SignalBus: Send + Sync {
    /// Begin consuming. Idempotent if already started.
    async fn start(&self) -> Result<(), BusError>;

    /// Stop consuming; any uncommitted batch remains uncommitted and will be
    /// redelivered on the next `fetch` after a restart.
    async fn stop(&self) -> Result<(), BusError>;

    /// Pull up to `batch_max` messages, waiting up to `wait_ms` for at least
    /// one to become available. Returns an empty batch on timeout, never an
    /// error, unless the underlying dependency itself failed.
    async fn fetch(&self, batch_max: usize, wait_ms: u64) -> Result<Vec<BusMessage>, BusError>;

    /// Acknowledge every message delivered by the most recent `fetch` call.
    /// Must be called only after all of them have been durably processed.
    async fn commit(&self) -> Result<(), BusError>;
}

//─────────────────────────────
//  In-memory reference bus
//─────────────────────────────

struct PartitionQueue {
    messages: VecDeque<Signal>,
    next_offset: u64,
}

/// An in-memory, per-partition-ordered signal bus.
///
/// Used by tests and the bundled demo binary; production deployments supply
/// a real broker adapter implementing [`SignalBus`] instead. `push` is the
/// producer-side entry point — there is no network hop, so anything pushed
/// is immediately fetchable.
pub struct InMemoryBus {
    partitions: Mutex<HashMap<MerchantKey, PartitionQueue>>,
    in_flight: Mutex<Option<Vec<(MerchantKey, usize)>>>,
    started: Mutex<bool>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(None),
            started: Mutex::new(false),
        }
    }

    /// Publish a signal to the bus, keyed by its merchant.
    pub fn push(&self, signal: Signal) {
        let mut partitions = self.partitions.lock().expect("bus mutex poisoned");
        let partition = partitions
            .entry(signal.merchant.clone())
            .or_insert_with(|| PartitionQueue {
                messages: VecDeque::new(),
                next_offset: 0,
            });
        partition.messages.push_back(signal);
    }

    /// Number of messages still queued across every partition.
    pub fn pending_count(&self) -> usize {
        self.partitions
            .lock()
            .expect("bus mutex poisoned")
            .values()
            .map(|p| p.messages.len())
            .sum()
    }
}

#[async_trait]
impl SignalBus for InMemoryBus {
    async fn start(&self) -> Result<(), BusError> {
        *self.started.lock().expect("bus mutex poisoned") = true;
        Ok(())
    }

    async fn stop(&self) -> Result<(), BusError> {
        *self.started.lock().expect("bus mutex poisoned") = false;
        Ok(())
    }

    async fn fetch(&self, batch_max: usize, wait_ms: u64) -> Result<Vec<BusMessage>, BusError> {
        if !*self.started.lock().expect("bus mutex poisoned") {
            return Err(BusError::FetchFailed("bus not started".into()));
        }

        let poll = async {
            loop {
                {
                    let mut partitions = self.partitions.lock().expect("bus mutex poisoned");
                    let mut batch = Vec::new();
                    let mut offsets = Vec::new();
                    // Round-robin across partitions so one noisy merchant
                    // cannot starve the others, while staying ordered within
                    // each partition.
                    for (merchant, partition) in partitions.iter_mut() {
                        while batch.len() < batch_max {
                            let Some(signal) = partition.messages.pop_front() else {
                                break;
                            };
                            let offset = partition.next_offset;
                            partition.next_offset += 1;
                            batch.push(BusMessage { signal, offset });
                            offsets.push((merchant.clone(), 1));
                        }
                        if batch.len() >= batch_max {
                            break;
                        }
                    }
                    if !batch.is_empty() {
                        *self.in_flight.lock().expect("bus mutex poisoned") = Some(offsets);
                        return batch;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        match timeout(Duration::from_millis(wait_ms), poll).await {
            Ok(batch) => Ok(batch),
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn commit(&self) -> Result<(), BusError> {
        let mut in_flight = self.in_flight.lock().expect("bus mutex poisoned");
        if in_flight.take().is_none() {
            return Err(BusError::NothingToCommit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remediation_types::{Severity, SignalId, SignalSource};
    use std::collections::HashMap as StdHashMap;

    fn signal(merchant: &str) -> Signal {
        Signal {
            id: SignalId::new(),
            received_at: chrono::Utc::now(),
            source: SignalSource::WebhookFailure,
            merchant: MerchantKey::from(merchant),
            severity: Severity::High,
            migration_stage: None,
            error_message: Some("webhook timeout".into()),
            error_code: Some("WEBHOOK_404".into()),
            resource: None,
            raw_payload: StdHashMap::new(),
            context: StdHashMap::new(),
            issue_id: None,
        }
    }

    #[tokio::test]
    async fn fetch_preserves_partition_order() {
        let bus = InMemoryBus::new();
        bus.start().await.unwrap();
        let s1 = signal("m1");
        let id1 = s1.id;
        bus.push(s1);
        let s2 = signal("m1");
        let id2 = s2.id;
        bus.push(s2);

        let batch = bus.fetch(10, 50).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].signal.id, id1);
        assert_eq!(batch[1].signal.id, id2);
        bus.commit().await.unwrap();
    }

    #[tokio::test]
    async fn commit_without_fetch_errors() {
        let bus = InMemoryBus::new();
        bus.start().await.unwrap();
        assert!(matches!(bus.commit().await, Err(BusError::NothingToCommit)));
    }

    #[tokio::test]
    async fn fetch_respects_batch_max() {
        let bus = InMemoryBus::new();
        bus.start().await.unwrap();
        for _ in 0..5 {
            bus.push(signal("m1"));
        }
        let batch = bus.fetch(3, 50).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(bus.pending_count(), 2);
    }

    #[tokio::test]
    async fn fetch_times_out_empty() {
        let bus = InMemoryBus::new();
        bus.start().await.unwrap();
        let batch = bus.fetch(3, 20).await.unwrap();
        assert!(batch.is_empty());
    }
}
