#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-store-memory** – In-memory [`DurableStore`] implementation.
//!
//! Non-persistent: state lives only as long as the process. Used by unit
//! tests across the workspace and by the demo binary when no sqlite path is
//! configured. Implements the same immutability guarantee over audit entries
//! as the sqlite backend, just programmatically rather than via a SQL
//! trigger, since [`DurableStore`] exposes no update/delete path for them in
//! the first place.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use remediation_store_core::{DurableStore, IssueFilter, StoreError};
use remediation_types::{
    Action, ActionId, AuditEntry, CheckpointId, CheckpointRecord, Issue, IssueId, Pattern,
    PatternId, Signal, SignalId, Stage,
};

#[derive(Default)]
struct Tables {
    issues: HashMap<IssueId, Issue>,
    signals: HashMap<SignalId, Signal>,
    patterns: HashMap<PatternId, Pattern>,
    actions: HashMap<ActionId, Action>,
    audit: HashMap<IssueId, Vec<AuditEntry>>,
    checkpoints: HashMap<IssueId, CheckpointRecord>,
}

/// An in-memory, non-persistent [`DurableStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn create_issue(&self, issue: &Issue) -> Result<(), StoreError> {
        self.tables.write().await.issues.insert(issue.id, issue.clone());
        Ok(())
    }

    async fn get_issue(&self, id: IssueId) -> Result<Option<Issue>, StoreError> {
        Ok(self.tables.read().await.issues.get(&id).cloned())
    }

    async fn update_issue(&self, issue: &Issue) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.issues.contains_key(&issue.id) {
            return Err(StoreError::NotFound(format!("issue {}", issue.id)));
        }
        tables.issues.insert(issue.id, issue.clone());
        Ok(())
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .issues
            .values()
            .filter(|issue| {
                filter
                    .merchant
                    .as_ref()
                    .map(|m| *m == issue.merchant)
                    .unwrap_or(true)
                    && filter.stage.map(|s| s == issue.stage).unwrap_or(true)
                    && filter
                        .resolution
                        .map(|r| issue.resolution == Some(r))
                        .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn delete_issue(&self, id: IssueId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.issues.remove(&id);
        tables.signals.retain(|_, s| s.issue_id != Some(id));
        tables.actions.retain(|_, a| a.issue_id != id);
        tables.checkpoints.remove(&id);
        // Audit entries are intentionally left in place (§3 ownership note).
        Ok(())
    }

    async fn insert_signal(&self, signal: &Signal) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .signals
            .insert(signal.id, signal.clone());
        Ok(())
    }

    async fn get_signal(&self, id: SignalId) -> Result<Option<Signal>, StoreError> {
        Ok(self.tables.read().await.signals.get(&id).cloned())
    }

    async fn list_signals_for_issue(&self, issue_id: IssueId) -> Result<Vec<Signal>, StoreError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Signal> = tables
            .signals
            .values()
            .filter(|s| s.issue_id == Some(issue_id))
            .cloned()
            .collect();
        matching.sort_by_key(|s| s.received_at);
        Ok(matching)
    }

    async fn insert_pattern(&self, pattern: &Pattern) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .patterns
            .insert(pattern.id, pattern.clone());
        Ok(())
    }

    async fn get_pattern(&self, id: PatternId) -> Result<Option<Pattern>, StoreError> {
        Ok(self.tables.read().await.patterns.get(&id).cloned())
    }

    async fn find_recent_patterns(
        &self,
        error_code: &str,
        normalized_shape: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Pattern>, StoreError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Pattern> = tables
            .patterns
            .values()
            .filter(|p| {
                p.last_seen >= since
                    && p.characteristics
                        .get("error_code")
                        .and_then(|v| v.as_str())
                        == Some(error_code)
                    && p.characteristics
                        .get("normalized_shape")
                        .and_then(|v| v.as_str())
                        == Some(normalized_shape)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(matching)
    }

    async fn create_action(&self, action: &Action) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .actions
            .insert(action.id, action.clone());
        Ok(())
    }

    async fn get_action(&self, id: ActionId) -> Result<Option<Action>, StoreError> {
        Ok(self.tables.read().await.actions.get(&id).cloned())
    }

    async fn update_action(&self, action: &Action) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.actions.contains_key(&action.id) {
            return Err(StoreError::NotFound(format!("action {}", action.id)));
        }
        tables.actions.insert(action.id, action.clone());
        Ok(())
    }

    async fn list_in_progress_actions(&self) -> Result<Vec<Action>, StoreError> {
        use remediation_types::ActionStatus;
        let tables = self.tables.read().await;
        Ok(tables
            .actions
            .values()
            .filter(|a| a.status == ActionStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .audit
            .entry(entry.issue_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_audit_entries(&self, issue_id: IssueId) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .audit
            .get(&issue_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn latest_audit_entry(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<AuditEntry>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .audit
            .get(&issue_id)
            .and_then(|entries| entries.last().cloned()))
    }

    async fn save_checkpoint(
        &self,
        issue_id: IssueId,
        stage: Stage,
        blob: Vec<u8>,
    ) -> Result<CheckpointRecord, StoreError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let parent_checkpoint_id = tables.checkpoints.get(&issue_id).map(|c| c.id);
        let error_count = tables
            .checkpoints
            .get(&issue_id)
            .map(|c| c.error_count)
            .unwrap_or(0);
        let last_error = tables
            .checkpoints
            .get(&issue_id)
            .and_then(|c| c.last_error.clone());
        let created_at = tables
            .checkpoints
            .get(&issue_id)
            .map(|c| c.created_at)
            .unwrap_or(now);

        let record = CheckpointRecord {
            id: CheckpointId::new(),
            issue_id,
            stage,
            state_blob: blob,
            parent_checkpoint_id,
            error_count,
            last_error,
            created_at,
            updated_at: now,
        };
        tables.checkpoints.insert(issue_id, record.clone());

        if let Some(issue) = tables.issues.get_mut(&issue_id) {
            issue.stage = stage;
            issue.updated_at = now;
        } else {
            return Err(StoreError::NotFound(format!("issue {issue_id}")));
        }

        Ok(record)
    }

    async fn get_checkpoint(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<CheckpointRecord>, StoreError> {
        Ok(self.tables.read().await.checkpoints.get(&issue_id).cloned())
    }

    async fn load_active_issues(&self) -> Result<Vec<IssueId>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .issues
            .values()
            .filter(|issue| !issue.stage.is_terminal())
            .map(|issue| issue.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remediation_types::MerchantKey;

    #[tokio::test]
    async fn create_and_fetch_issue_roundtrips() {
        let store = MemoryStore::new();
        let issue = Issue::new(MerchantKey::from("m1"));
        store.create_issue(&issue).await.unwrap();
        let fetched = store.get_issue(issue.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, issue.id);
    }

    #[tokio::test]
    async fn save_checkpoint_updates_issue_stage_transactionally() {
        let store = MemoryStore::new();
        let issue = Issue::new(MerchantKey::from("m1"));
        store.create_issue(&issue).await.unwrap();

        store
            .save_checkpoint(issue.id, Stage::DetectPatterns, vec![1, 2, 3])
            .await
            .unwrap();

        let fetched = store.get_issue(issue.id).await.unwrap().unwrap();
        assert_eq!(fetched.stage, Stage::DetectPatterns);
        let checkpoint = store.get_checkpoint(issue.id).await.unwrap().unwrap();
        assert_eq!(checkpoint.stage, Stage::DetectPatterns);
        assert_eq!(checkpoint.state_blob, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn load_active_issues_excludes_terminal() {
        let store = MemoryStore::new();
        let mut open = Issue::new(MerchantKey::from("m1"));
        let mut closed = Issue::new(MerchantKey::from("m2"));
        closed.stage = Stage::Complete;
        closed.resolved_at = Some(Utc::now());
        store.create_issue(&open).await.unwrap();
        store.create_issue(&closed).await.unwrap();
        open.stage = Stage::Analyze;
        store.update_issue(&open).await.unwrap();

        let active = store.load_active_issues().await.unwrap();
        assert_eq!(active, vec![open.id]);
    }

    #[tokio::test]
    async fn delete_issue_preserves_audit_entries() {
        use remediation_types::{Actor, AuditEntryId, AuditEventType};

        let store = MemoryStore::new();
        let issue = Issue::new(MerchantKey::from("m1"));
        store.create_issue(&issue).await.unwrap();
        let entry = AuditEntry {
            id: AuditEntryId::new(),
            timestamp: Utc::now(),
            issue_id: issue.id,
            event_type: AuditEventType::SignalObserved,
            actor: Actor::System,
            inputs: Default::default(),
            outputs: Default::default(),
            reasoning: Default::default(),
            self_hash: "h".into(),
            previous_hash: String::new(),
        };
        store.append_audit_entry(&entry).await.unwrap();

        store.delete_issue(issue.id).await.unwrap();
        assert!(store.get_issue(issue.id).await.unwrap().is_none());
        let entries = store.list_audit_entries(issue.id).await.unwrap();
        assert_eq!(entries.len(), 1);
    }
}
