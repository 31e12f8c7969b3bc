//! [`RemediationError`] – the top-level error taxonomy (§7).
//!
//! Handler code inside `remediation-engine` raises `EngineError`, which only
//! knows about the three classes that originate at or below the engine
//! (state, dependency, integrity). The orchestrator is the seam where the
//! bus and the approval coordinator join the taxonomy, and where the
//! remaining two classes - malformed input and rate limiting - are named.
//! Recovery policy in [`crate::orchestrator`] dispatches purely on the
//! variant, never on the wrapped message.

use remediation_approval::ApprovalError;
use remediation_audit::AuditError;
use remediation_bus_core::BusError;
use remediation_engine::EngineError;
use remediation_store_core::StoreError;

/// Every error class the orchestrator can observe.
#[derive(Debug, thiserror::Error)]
pub enum RemediationError {
    /// A malformed signal or decision payload was supplied. Surfaced
    /// synchronously to the caller; never retried.
    #[error("input error: {0}")]
    Input(String),
    /// An illegal transition, an unknown issue or action, or an operation
    /// invoked at the wrong stage.
    #[error("state error: {0}")]
    State(String),
    /// The bus, store, KV, analyzer, or action executor failed.
    #[error("dependency error: {0}")]
    Dependency(String),
    /// An audit-chain mismatch or checkpoint decode failure. Fatal to the
    /// affected issue: the issue is frozen at its current stage rather than
    /// retried.
    #[error("integrity error: {0}")]
    Integrity(String),
    /// An action was suppressed by the rate limiter. Not a failure: the
    /// issue still proceeds to `record` with resolution `rate_limited`.
    #[error("rate limited")]
    RateLimited,
}

impl From<EngineError> for RemediationError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::State(msg) => Self::State(msg),
            EngineError::Dependency(msg) => Self::Dependency(msg),
            EngineError::Integrity(msg) => Self::Integrity(msg),
        }
    }
}

impl From<StoreError> for RemediationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ImmutableViolation(msg) => Self::Integrity(msg),
            other => Self::Dependency(other.to_string()),
        }
    }
}

impl From<AuditError> for RemediationError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::ChainBroken { .. } => Self::Integrity(err.to_string()),
            AuditError::Store(inner) => inner.into(),
        }
    }
}

impl From<BusError> for RemediationError {
    fn from(err: BusError) -> Self {
        Self::Dependency(err.to_string())
    }
}

impl From<ApprovalError> for RemediationError {
    fn from(err: ApprovalError) -> Self {
        Self::State(err.to_string())
    }
}
