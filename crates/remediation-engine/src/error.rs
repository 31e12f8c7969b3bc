//! [`EngineError`] – the subset of the top-level taxonomy (§7) a stage
//! handler can raise. The orchestrator's `RemediationError` wraps this with
//! `#[from]` alongside the taxonomy classes that originate above the
//! engine (bus/input errors).

use remediation_audit::AuditError;
use remediation_store_core::StoreError;

use crate::state::StateCodecError;

/// Errors a stage handler can raise.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An illegal transition was attempted, an unknown issue/action was
    /// referenced, or an operation was invoked at the wrong stage.
    #[error("state error: {0}")]
    State(String),
    /// The durable store, shared KV, analyzer, or action executor failed.
    #[error("dependency error: {0}")]
    Dependency(String),
    /// An audit-chain mismatch, hash recompute disagreement, or checkpoint
    /// decode failure. Fatal to the affected issue (§7): callers must
    /// freeze the issue at its current stage rather than retry.
    #[error("integrity error: {0}")]
    Integrity(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ImmutableViolation(msg) => Self::Integrity(msg),
            other => Self::Dependency(other.to_string()),
        }
    }
}

impl From<AuditError> for EngineError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::ChainBroken { .. } => Self::Integrity(err.to_string()),
            AuditError::Store(inner) => inner.into(),
        }
    }
}

impl From<StateCodecError> for EngineError {
    fn from(err: StateCodecError) -> Self {
        Self::Integrity(err.to_string())
    }
}
