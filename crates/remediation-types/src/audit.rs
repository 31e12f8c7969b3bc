//! The [`AuditEntry`] entity — one link in the per-issue hash chain.
//!
//! This module only describes the shape; hash computation and chain
//! verification live in `remediation-audit`, which depends on this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AuditEntryId, IssueId, JsonMap};

/// Classification of what an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A new issue was opened for a (merchant, source) key.
    IssueOpened,
    /// A stage handler observed and processed a signal.
    SignalObserved,
    /// A pattern was detected or matched.
    PatternDetected,
    /// The analyzer returned (or failed to return) a root-cause hypothesis.
    RootCauseAnalyzed,
    /// An action was selected.
    ActionDecided,
    /// An action's risk was classified.
    RiskAssessed,
    /// An issue was registered with the approval coordinator.
    ApprovalRequested,
    /// An operator recorded a verdict.
    ApprovalDecided,
    /// An action was dispatched to the external executor.
    ActionExecuted,
    /// The full reasoning chain was recorded for a completed issue.
    IssueRecorded,
    /// A handler raised an error.
    StageError,
    /// An audit-chain or immutability violation was detected.
    IntegrityViolation,
}

/// Who performed the action an audit entry records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    /// The pipeline itself, acting without a human in the loop.
    System,
    /// A human operator, identified by their operator id.
    Operator(String),
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Operator(id) => write!(f, "{id}"),
        }
    }
}

/// An immutable, hash-chained audit event.
///
/// `self_hash` and `previous_hash` are populated by the audit log at append
/// time (see `remediation-audit::append`); constructing an `AuditEntry`
/// directly with both hashes empty represents an unwritten draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier.
    pub id: AuditEntryId,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The issue this entry concerns.
    pub issue_id: IssueId,
    /// What kind of event this is.
    pub event_type: AuditEventType,
    /// Who performed it.
    pub actor: Actor,
    /// Inputs to the operation being recorded.
    pub inputs: JsonMap,
    /// Outputs of the operation being recorded.
    pub outputs: JsonMap,
    /// Reasoning or rationale attached to the event.
    pub reasoning: JsonMap,
    /// SHA-256 hex digest of the canonical JSON of every other field.
    pub self_hash: String,
    /// `self_hash` of the immediately preceding entry for this issue, or the
    /// empty string for the first entry in the chain.
    pub previous_hash: String,
}
