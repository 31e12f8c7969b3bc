#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-types** – Shared domain primitives for the remediation core.
//!
//! The crate is dependency-light and sits at the bottom of the crate graph so
//! that every other crate — bus, store, engine, orchestrator — can depend on
//! it without causing cycles. It makes no assumptions about I/O, storage
//! engines, or transport; it only describes the shapes that flow between
//! them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod action;
pub mod audit;
pub mod checkpoint;
pub mod ids;
pub mod issue;
pub mod pattern;
pub mod reasoning;
pub mod signal;

pub use action::{Action, ActionStatus, ActionType, RiskLevel};
pub use audit::{Actor, AuditEntry, AuditEventType};
pub use checkpoint::CheckpointRecord;
pub use ids::{ActionId, AuditEntryId, CheckpointId, IssueId, PatternId, SignalId};
pub use issue::{ApprovalStatus, Issue, IssueCounters, ResolutionKind, RootCauseCategory, Stage};
pub use pattern::{Pattern, PatternType};
pub use reasoning::{Explanation, ReasoningStep};
pub use signal::{MigrationStage, Severity, Signal, SignalSource};

//─────────────────────────────
//  Common scalar aliases
//─────────────────────────────

/// Stable identifier for a merchant undergoing migration.
///
/// Kept as a transparent string newtype (rather than a bare `String`) so that
/// call sites cannot accidentally swap a merchant key for an error message or
/// action type at a function boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MerchantKey(pub String);

impl MerchantKey {
    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MerchantKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MerchantKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for MerchantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Free-form key/value bag used for action parameters, results, and
/// reasoning annotations. Kept as `serde_json::Value` maps rather than typed
/// structs because the shapes originate from external collaborators
/// (analyzer, action executor) that are out of this crate's scope.
pub type JsonMap = HashMap<String, serde_json::Value>;

/// Errors raised while constructing or validating domain values.
///
/// Each variant names the invariant from the specification it enforces so
/// that callers can match on the failure class instead of parsing messages.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    /// A confidence value was outside the closed interval `[0, 1]`.
    #[error("confidence {0} is outside the valid range [0, 1]")]
    ConfidenceOutOfRange(f64),
    /// A frequency counter was below the minimum allowed value of 1.
    #[error("pattern frequency must be >= 1, got {0}")]
    FrequencyTooLow(u64),
    /// A required string field was empty.
    #[error("{field} must not be empty")]
    EmptyField {
        /// Name of the offending field.
        field: &'static str,
    },
    /// An issue's resolution timestamp disagreed with its stage.
    #[error("resolved_at must be set iff stage is terminal (stage={stage:?}, resolved_at_present={resolved_at_present})")]
    ResolutionMismatch {
        /// Stage recorded on the issue at validation time.
        stage: Stage,
        /// Whether `resolved_at` was populated.
        resolved_at_present: bool,
    },
    /// `approval_status` was set without `requires_approval`, or vice versa.
    #[error("approval_status is only meaningful when requires_approval is true")]
    ApprovalStatusMismatch,
}

/// Validate that a confidence score lies in `[0, 1]`.
pub fn validate_confidence(confidence: f64) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ValidationError::ConfidenceOutOfRange(confidence));
    }
    Ok(())
}
