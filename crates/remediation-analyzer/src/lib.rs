#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-analyzer** – Analyzer client contract (§4.13 / §6).
//!
//! The real root-cause analyzer is an LLM-backed collaborator and
//! explicitly out of scope (§1): this crate defines only the narrow,
//! synchronous-RPC contract the `analyze` stage handler consumes —
//! [`AnalyzerClient`] — plus [`StubAnalyzerClient`], an in-memory
//! implementation used by tests and the bundled demo binary so the
//! pipeline is runnable end to end without the real collaborator.
//!
//! The contract tolerates malformed responses by design: `analyze` never
//! blocks the pipeline on an analyzer failure, so this crate also exposes
//! [`AnalyzerResponse::low_confidence_default`] for handlers to fall back
//! on directly rather than re-deriving the same degraded response at every
//! call site.

use async_trait::async_trait;
use remediation_types::{ActionType, RootCauseCategory};
use serde::{Deserialize, Serialize};

/// One alternative hypothesis the analyzer considered and rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    /// The rejected hypothesis, in the analyzer's own words.
    pub hypothesis: String,
    /// Confidence the analyzer assigned the alternative.
    pub confidence: f64,
    /// Why the analyzer preferred the primary hypothesis instead.
    pub rejected_reason: String,
}

/// The analyzer's root-cause hypothesis for a batch of signals, mirroring
/// the wire contract of §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerResponse {
    /// The analyzer's best-guess root cause category.
    pub category: RootCauseCategory,
    /// Confidence in `category`, `[0, 1]`.
    pub confidence: f64,
    /// Free-text reasoning supporting `category`.
    pub reasoning: String,
    /// Opaque references to the evidence backing `category` (signal ids,
    /// excerpts, log lines).
    pub evidence: Vec<String>,
    /// Hypotheses the analyzer considered and rejected.
    pub alternatives: Vec<Alternative>,
    /// Action types the analyzer recommends, most preferred first; `decide`
    /// selects among these by policy.
    pub recommended_actions: Vec<ActionType>,
}

impl AnalyzerResponse {
    /// The response `analyze` falls back to when the analyzer call fails
    /// outright or returns something malformed: a low-confidence escalation
    /// recommendation with no evidence, so the pipeline can continue to
    /// `decide` and still reach a safe outcome (§4.7: "never blocks").
    pub fn low_confidence_default(reason: impl Into<String>) -> Self {
        Self {
            category: RootCauseCategory::ConfigError,
            confidence: 0.0,
            reasoning: reason.into(),
            evidence: Vec::new(),
            alternatives: Vec::new(),
            recommended_actions: vec![ActionType::Escalation],
        }
    }
}

/// Context accompanying a batch of signals sent to the analyzer: anything
/// that helps it reason beyond the raw signal payloads (merchant migration
/// history, prior root causes for this merchant, etc). Left as an opaque
/// JSON map since its shape is owned by the out-of-scope analyzer, not this
/// crate.
pub type AnalyzerContext = remediation_types::JsonMap;

/// Errors raised by an [`AnalyzerClient`] implementation.
#[derive(Debug, thiserror::Error, Clone)]
pub enum AnalyzerError {
    /// The call failed, timed out, or the analyzer returned something the
    /// client could not parse into an [`AnalyzerResponse`].
    #[error("analyzer call failed: {0}")]
    Failed(String),
}

/// Synchronous-RPC contract consumed from the out-of-scope LLM analyzer:
/// input is a batch of signals plus free-form context, output is a root
/// cause hypothesis (§6).
#[async_trait]
pub trait AnalyzerClient: Send + Sync {
    /// Ask the analyzer for a root-cause hypothesis given `signals` and
    /// `context`.
    async fn analyze(
        &self,
        signals: &[remediation_types::Signal],
        context: &AnalyzerContext,
    ) -> Result<AnalyzerResponse, AnalyzerError>;
}

/// In-memory stub standing in for the real LLM analyzer. Applies a small
/// set of deterministic heuristics over the signals' error codes so tests
/// and the demo binary can exercise every branch of `decide`/`assess_risk`
/// without a live model call.
#[derive(Default)]
pub struct StubAnalyzerClient;

#[async_trait]
impl AnalyzerClient for StubAnalyzerClient {
    async fn analyze(
        &self,
        signals: &[remediation_types::Signal],
        _context: &AnalyzerContext,
    ) -> Result<AnalyzerResponse, AnalyzerError> {
        let Some(signal) = signals.last() else {
            return Ok(AnalyzerResponse::low_confidence_default(
                "no signals supplied to analyze",
            ));
        };

        let code = signal.error_code.as_deref().unwrap_or_default();
        let response = if code.contains("404") {
            AnalyzerResponse {
                category: RootCauseCategory::MigrationMisstep,
                confidence: 0.88,
                reasoning: "merchant endpoint not yet migrated; matches known cutover gap"
                    .into(),
                evidence: vec![signal.id.to_string()],
                alternatives: vec![Alternative {
                    hypothesis: "platform regression".into(),
                    confidence: 0.1,
                    rejected_reason: "no other merchants affected in this window".into(),
                }],
                recommended_actions: vec![ActionType::SupportGuidance, ActionType::RetryOperation],
            }
        } else if code.contains("TIMEOUT") || code.contains("5") {
            AnalyzerResponse {
                category: RootCauseCategory::PlatformRegression,
                confidence: 0.62,
                reasoning: "elevated latency consistent with a platform-side regression".into(),
                evidence: vec![signal.id.to_string()],
                alternatives: Vec::new(),
                recommended_actions: vec![ActionType::TemporaryMitigation, ActionType::Escalation],
            }
        } else {
            AnalyzerResponse::low_confidence_default("no heuristic matched this error shape")
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use remediation_types::{MerchantKey, Severity, SignalId, SignalSource};

    fn signal(error_code: &str) -> remediation_types::Signal {
        remediation_types::Signal {
            id: SignalId::new(),
            received_at: Utc::now(),
            source: SignalSource::WebhookFailure,
            merchant: MerchantKey::from("m1"),
            severity: Severity::High,
            migration_stage: None,
            error_message: Some("webhook not found".into()),
            error_code: Some(error_code.into()),
            resource: None,
            raw_payload: Default::default(),
            context: Default::default(),
            issue_id: None,
        }
    }

    #[tokio::test]
    async fn not_found_code_yields_high_confidence_migration_misstep() {
        let client = StubAnalyzerClient;
        let response = client
            .analyze(&[signal("WEBHOOK_404")], &AnalyzerContext::new())
            .await
            .unwrap();
        assert_eq!(response.category, RootCauseCategory::MigrationMisstep);
        assert!(response.confidence > 0.8);
    }

    #[tokio::test]
    async fn empty_signal_batch_falls_back_to_low_confidence_default() {
        let client = StubAnalyzerClient;
        let response = client.analyze(&[], &AnalyzerContext::new()).await.unwrap();
        assert_eq!(response.confidence, 0.0);
        assert_eq!(response.recommended_actions, vec![ActionType::Escalation]);
    }

    #[test]
    fn low_confidence_default_always_escalates() {
        let response = AnalyzerResponse::low_confidence_default("timeout");
        assert_eq!(response.recommended_actions, vec![ActionType::Escalation]);
        assert_eq!(response.confidence, 0.0);
    }
}
