#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-store-core** – Durable storage abstraction for the
//! remediation core.
//!
//! This crate defines the [`DurableStore`] trait and its error and filter
//! types without providing a concrete implementation. Storage drivers
//! (`remediation-store-sqlite`, `remediation-store-memory`) implement this
//! trait in separate crates so that engine and orchestrator code never
//! depends on a specific backend.
//!
//! The audit relation is immutable by construction: this trait exposes no
//! update or delete operation for audit entries at all. `remediation-audit`
//! and the backends additionally enforce the rule at the storage layer
//! (trigger or programmatic guard) so that a bug elsewhere in the
//! application cannot erase history even if it tries to reach the database
//! directly.

use async_trait::async_trait;
use remediation_types::{
    Action, ActionId, AuditEntry, CheckpointRecord, Issue, IssueId, MerchantKey, Pattern,
    PatternId, ResolutionKind, Signal, SignalId, Stage,
};

/// Errors raised by a [`DurableStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No row exists for the given identifier.
    #[error("{0} not found")]
    NotFound(String),
    /// The underlying backend (connection, disk, network) failed.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A value failed to serialize or deserialize across the storage
    /// boundary (e.g. a JSON column or the checkpoint blob).
    #[error("serialization error: {0}")]
    Serialization(String),
    /// An attempt was made to update or delete an immutable audit entry.
    #[error("audit entries are immutable: {0}")]
    ImmutableViolation(String),
}

/// Filter predicate for [`DurableStore::list_issues`]. Every `Some` field
/// narrows the result set; `None` fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    /// Restrict to a single merchant.
    pub merchant: Option<MerchantKey>,
    /// Restrict to issues currently at this stage.
    pub stage: Option<Stage>,
    /// Restrict to issues that resolved with this resolution kind.
    pub resolution: Option<ResolutionKind>,
}

/// Durable, typed persistence for every entity in the data model, plus two
/// composed operations (`save_checkpoint`, `load_active_issues`) that bundle
/// multi-row updates into a single transaction.
#[async_trait]
pub trait DurableStore: Send + Sync {
    // ── issues ──────────────────────────────────────────────
    /// Insert a brand-new issue.
    async fn create_issue(&self, issue: &Issue) -> Result<(), StoreError>;
    /// Fetch an issue by id.
    async fn get_issue(&self, id: IssueId) -> Result<Option<Issue>, StoreError>;
    /// Overwrite an issue's row with the given state.
    async fn update_issue(&self, issue: &Issue) -> Result<(), StoreError>;
    /// List issues matching `filter`.
    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>, StoreError>;
    /// Delete an issue and cascade to its signals, actions, and checkpoint.
    /// Audit entries are never deleted by this call (§3 ownership note);
    /// they remain as orphaned rows, removable only via administrative
    /// escalation outside this trait.
    async fn delete_issue(&self, id: IssueId) -> Result<(), StoreError>;

    // ── signals ─────────────────────────────────────────────
    /// Insert a signal. Signals are immutable after insert; there is no
    /// update operation.
    async fn insert_signal(&self, signal: &Signal) -> Result<(), StoreError>;
    /// Fetch a signal by id.
    async fn get_signal(&self, id: SignalId) -> Result<Option<Signal>, StoreError>;
    /// List every signal folded into `issue_id`, in insertion order.
    async fn list_signals_for_issue(&self, issue_id: IssueId) -> Result<Vec<Signal>, StoreError>;

    // ── patterns ────────────────────────────────────────────
    /// Insert a newly detected pattern.
    async fn insert_pattern(&self, pattern: &Pattern) -> Result<(), StoreError>;
    /// Fetch a pattern by id.
    async fn get_pattern(&self, id: PatternId) -> Result<Option<Pattern>, StoreError>;
    /// Find patterns matching the given fingerprint components
    /// `(error_code, normalized_shape)` observed since `since`, most recent
    /// first. Used by `detect_patterns` as a fallback when the fingerprint
    /// cache misses.
    async fn find_recent_patterns(
        &self,
        error_code: &str,
        normalized_shape: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Pattern>, StoreError>;

    // ── actions ─────────────────────────────────────────────
    /// Insert a newly created action.
    async fn create_action(&self, action: &Action) -> Result<(), StoreError>;
    /// Fetch an action by id.
    async fn get_action(&self, id: ActionId) -> Result<Option<Action>, StoreError>;
    /// Overwrite an action's row with the given state.
    async fn update_action(&self, action: &Action) -> Result<(), StoreError>;
    /// List every action still `in_progress`, used by checkpoint/resume to
    /// re-examine interrupted executions.
    async fn list_in_progress_actions(&self) -> Result<Vec<Action>, StoreError>;

    // ── audit (append-only) ─────────────────────────────────
    /// Append an audit entry. The backend MUST reject any later attempt to
    /// update or delete this row; this trait deliberately exposes no such
    /// method.
    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError>;
    /// List every audit entry for `issue_id` in insertion order.
    async fn list_audit_entries(&self, issue_id: IssueId) -> Result<Vec<AuditEntry>, StoreError>;
    /// Fetch the most recent audit entry for `issue_id`, if any.
    async fn latest_audit_entry(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<AuditEntry>, StoreError>;

    // ── checkpoint / resume ─────────────────────────────────
    /// Upsert the checkpoint for `issue_id` and update the issue's `stage`
    /// and `updated_at` in one transaction.
    async fn save_checkpoint(
        &self,
        issue_id: IssueId,
        stage: Stage,
        blob: Vec<u8>,
    ) -> Result<CheckpointRecord, StoreError>;
    /// Fetch the checkpoint for `issue_id`, if one exists.
    async fn get_checkpoint(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<CheckpointRecord>, StoreError>;
    /// Every issue whose stage is not terminal, for resume at startup.
    async fn load_active_issues(&self) -> Result<Vec<IssueId>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_filter_default_is_unconstrained() {
        let filter = IssueFilter::default();
        assert!(filter.merchant.is_none());
        assert!(filter.stage.is_none());
        assert!(filter.resolution.is_none());
    }
}
