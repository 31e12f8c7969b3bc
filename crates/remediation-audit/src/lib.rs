#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-audit** – Hash-chained, append-only audit log.
//!
//! Every audit entry embeds the self-hash of the entry immediately
//! preceding it for the same issue, so that the full chain can be replayed
//! and verified independently of the storage backend's own guarantees.
//! `remediation-store-core::DurableStore` additionally refuses to expose an
//! update or delete path for audit rows at all; this crate is what computes
//! and checks the hashes that make tampering with the remaining insert path
//! detectable.

use chrono::Utc;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use remediation_store_core::{DurableStore, StoreError};
use remediation_types::{Actor, AuditEntry, AuditEntryId, AuditEventType, IssueId, JsonMap};

/// Errors raised while appending to or verifying the audit log.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The chain failed verification.
    #[error("audit chain broken for issue {issue_id} at entry {entry_id}: {reason}")]
    ChainBroken {
        /// Issue whose chain failed to verify.
        issue_id: IssueId,
        /// The first entry at which verification failed.
        entry_id: AuditEntryId,
        /// What specifically disagreed.
        reason: String,
    },
}

fn canonical_value(entry_id: AuditEntryId, timestamp: chrono::DateTime<Utc>, issue_id: IssueId, event_type: AuditEventType, actor: &Actor, inputs: &JsonMap, outputs: &JsonMap, reasoning: &JsonMap, previous_hash: &str) -> Value {
    let mut map = Map::new();
    map.insert("id".into(), Value::String(entry_id.to_string()));
    map.insert("timestamp".into(), Value::String(timestamp.to_rfc3339()));
    map.insert("issue_id".into(), Value::String(issue_id.to_string()));
    map.insert(
        "event_type".into(),
        serde_json::to_value(event_type).expect("AuditEventType always serializes"),
    );
    map.insert(
        "actor".into(),
        serde_json::to_value(actor).expect("Actor always serializes"),
    );
    map.insert(
        "inputs".into(),
        serde_json::to_value(inputs).expect("JsonMap always serializes"),
    );
    map.insert(
        "outputs".into(),
        serde_json::to_value(outputs).expect("JsonMap always serializes"),
    );
    map.insert(
        "reasoning".into(),
        serde_json::to_value(reasoning).expect("JsonMap always serializes"),
    );
    map.insert("previous_hash".into(), Value::String(previous_hash.to_string()));
    Value::Object(map)
}

/// SHA-256 hex digest of the canonical (key-sorted) JSON representation of
/// an entry's fields, excluding `self_hash` itself.
fn self_hash_of(entry: &AuditEntry) -> String {
    let value = canonical_value(
        entry.id,
        entry.timestamp,
        entry.issue_id,
        entry.event_type,
        &entry.actor,
        &entry.inputs,
        &entry.outputs,
        &entry.reasoning,
        &entry.previous_hash,
    );
    let canonical = serde_json::to_vec(&value).expect("canonical value always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

/// Append a new, hash-chained entry to the audit log for `issue_id`.
///
/// Fetches the latest entry for the issue to seed `previous_hash`, computes
/// `self_hash` over the canonical JSON of every other field, and persists
/// the result. Returns the entry actually written (hashes populated).
pub async fn append(
    store: &dyn DurableStore,
    issue_id: IssueId,
    event_type: AuditEventType,
    actor: Actor,
    inputs: JsonMap,
    outputs: JsonMap,
    reasoning: JsonMap,
) -> Result<AuditEntry, AuditError> {
    let previous_hash = store
        .latest_audit_entry(issue_id)
        .await?
        .map(|e| e.self_hash)
        .unwrap_or_default();

    let mut entry = AuditEntry {
        id: AuditEntryId::new(),
        timestamp: Utc::now(),
        issue_id,
        event_type,
        actor,
        inputs,
        outputs,
        reasoning,
        self_hash: String::new(),
        previous_hash,
    };
    entry.self_hash = self_hash_of(&entry);

    store.append_audit_entry(&entry).await?;
    tracing::debug!(
        issue_id = %issue_id,
        event_type = ?entry.event_type,
        self_hash = %entry.self_hash,
        "appended audit entry"
    );
    Ok(entry)
}

/// Replay and verify the full chain for `issue_id`. Returns `Ok(())` if
/// every entry's `previous_hash` matches the prior entry's `self_hash` and
/// every entry's `self_hash` matches its own recomputed hash; otherwise
/// returns the first [`AuditError::ChainBroken`] encountered.
pub async fn verify_chain(store: &dyn DurableStore, issue_id: IssueId) -> Result<(), AuditError> {
    let entries = store.list_audit_entries(issue_id).await?;
    let mut expected_previous = String::new();
    for entry in &entries {
        if entry.previous_hash != expected_previous {
            return Err(AuditError::ChainBroken {
                issue_id,
                entry_id: entry.id,
                reason: format!(
                    "previous_hash {} does not match prior self_hash {}",
                    entry.previous_hash, expected_previous
                ),
            });
        }
        let recomputed = self_hash_of(entry);
        if recomputed != entry.self_hash {
            return Err(AuditError::ChainBroken {
                issue_id,
                entry_id: entry.id,
                reason: format!(
                    "stored self_hash {} does not match recomputed {recomputed}",
                    entry.self_hash
                ),
            });
        }
        expected_previous = entry.self_hash.clone();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use remediation_store_memory::MemoryStore;
    use remediation_types::{Issue, MerchantKey};

    #[tokio::test]
    async fn appended_entries_chain_correctly() {
        let store = MemoryStore::new();
        let issue = Issue::new(MerchantKey::from("m1"));
        store.create_issue(&issue).await.unwrap();

        let first = append(
            &store,
            issue.id,
            AuditEventType::SignalObserved,
            Actor::System,
            Default::default(),
            Default::default(),
            Default::default(),
        )
        .await
        .unwrap();
        assert!(first.previous_hash.is_empty());

        let second = append(
            &store,
            issue.id,
            AuditEventType::PatternDetected,
            Actor::System,
            Default::default(),
            Default::default(),
            Default::default(),
        )
        .await
        .unwrap();
        assert_eq!(second.previous_hash, first.self_hash);

        verify_chain(&store, issue.id).await.unwrap();
    }

    #[tokio::test]
    async fn tampered_entry_fails_verification() {
        let store = MemoryStore::new();
        let issue = Issue::new(MerchantKey::from("m1"));
        store.create_issue(&issue).await.unwrap();

        append(
            &store,
            issue.id,
            AuditEventType::SignalObserved,
            Actor::System,
            Default::default(),
            Default::default(),
            Default::default(),
        )
        .await
        .unwrap();

        let mut entries = store.list_audit_entries(issue.id).await.unwrap();
        entries[0].self_hash = "tampered".into();
        // Simulate tampering by reinserting a forged row directly. The
        // in-memory backend has no update path either, so this exercises
        // the scenario via a second append carrying a forged previous_hash.
        let forged = AuditEntry {
            previous_hash: "not-the-real-hash".into(),
            ..entries[0].clone()
        };
        store.append_audit_entry(&forged).await.unwrap();

        let result = verify_chain(&store, issue.id).await;
        assert!(result.is_err());
    }
}
