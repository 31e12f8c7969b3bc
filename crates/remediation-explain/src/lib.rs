#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-explain** – Explanation builder (§4.12).
//!
//! `remediation-types::ReasoningStep` and `Explanation` define the shapes;
//! this crate is where stage handlers build individual steps and where the
//! full per-issue explanation is content-addressed before it is attached
//! verbatim to the final `issue_recorded` audit entry, so that every
//! decision is reconstructable from the audit log alone without re-running
//! the pipeline.

use remediation_types::{Explanation, Issue, JsonMap, ReasoningStep, Stage};
use sha2::{Digest, Sha256};

/// Build and append a [`ReasoningStep`] to `issue.reasoning_chain`.
///
/// Thin convenience over `Issue::reasoning_chain.push` so that stage
/// handlers build steps uniformly instead of constructing
/// `ReasoningStep` literals inline.
pub struct StepBuilder {
    stage: Stage,
    summary: String,
    confidence: f64,
    evidence_refs: Vec<String>,
    data: JsonMap,
    uncertainty: Option<String>,
}

impl StepBuilder {
    /// Start building a step for `stage` with the given `summary` and
    /// `confidence`.
    pub fn new(stage: Stage, summary: impl Into<String>, confidence: f64) -> Self {
        Self {
            stage,
            summary: summary.into(),
            confidence: confidence.clamp(0.0, 1.0),
            evidence_refs: Vec::new(),
            data: JsonMap::new(),
            uncertainty: None,
        }
    }

    /// Attach an evidence reference (a signal id, pattern id, or analyzer
    /// citation, as an opaque string).
    pub fn evidence(mut self, reference: impl Into<String>) -> Self {
        self.evidence_refs.push(reference.into());
        self
    }

    /// Attach a structured data field specific to the stage.
    pub fn data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Mark this step as recorded despite the stage not reaching its target
    /// confidence, rather than blocking the pipeline (§4.7: `analyze`
    /// "never blocks").
    pub fn uncertain(mut self, reason: impl Into<String>) -> Self {
        self.uncertainty = Some(reason.into());
        self
    }

    /// Finish building the step.
    pub fn build(self) -> ReasoningStep {
        ReasoningStep {
            stage: self.stage,
            summary: self.summary,
            confidence: self.confidence,
            evidence_refs: self.evidence_refs,
            data: self.data,
            uncertainty: self.uncertainty,
        }
    }
}

/// Append `step` to `issue`'s reasoning chain and log it at the severity
/// matching whether it carries uncertainty.
pub fn record_step(issue: &mut Issue, step: ReasoningStep) {
    if let Some(reason) = &step.uncertainty {
        tracing::warn!(
            issue_id = %issue.id,
            stage = %step.stage,
            confidence = step.confidence,
            uncertainty = %reason,
            "recorded uncertain reasoning step"
        );
    } else {
        tracing::debug!(
            issue_id = %issue.id,
            stage = %step.stage,
            confidence = step.confidence,
            summary = %step.summary,
            "recorded reasoning step"
        );
    }
    issue.reasoning_chain.push(step);
}

/// Build the full [`Explanation`] for `issue` from its accumulated
/// reasoning chain.
pub fn build_explanation(issue: &Issue) -> Explanation {
    Explanation::from_issue(issue)
}

/// Content address for an explanation: the SHA-256 hex digest of its
/// canonical JSON serialization, suitable for embedding in the final audit
/// entry's `inputs`/`outputs` map as a verifiable reference.
pub fn content_address(explanation: &Explanation) -> String {
    let value = serde_json::to_value(explanation).expect("Explanation always serializes");
    let canonical = serde_json::to_vec(&value).expect("canonical value always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use remediation_types::MerchantKey;

    #[test]
    fn builder_clamps_confidence_into_range() {
        let step = StepBuilder::new(Stage::Observe, "test", 1.5).build();
        assert_eq!(step.confidence, 1.0);
    }

    #[test]
    fn record_step_appends_in_order() {
        let mut issue = Issue::new(MerchantKey::from("m1"));
        record_step(&mut issue, StepBuilder::new(Stage::Observe, "one", 1.0).build());
        record_step(&mut issue, StepBuilder::new(Stage::DetectPatterns, "two", 0.5).build());
        assert_eq!(issue.reasoning_chain.len(), 2);
        assert_eq!(issue.reasoning_chain[0].summary, "one");
    }

    #[test]
    fn content_address_is_stable_for_identical_explanations() {
        let mut issue_a = Issue::new(MerchantKey::from("m1"));
        let mut issue_b = issue_a.clone();
        record_step(&mut issue_a, StepBuilder::new(Stage::Observe, "x", 1.0).build());
        record_step(&mut issue_b, StepBuilder::new(Stage::Observe, "x", 1.0).build());

        let hash_a = content_address(&build_explanation(&issue_a));
        let hash_b = content_address(&build_explanation(&issue_b));
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn content_address_changes_with_content() {
        let mut issue = Issue::new(MerchantKey::from("m1"));
        let empty = content_address(&build_explanation(&issue));
        record_step(&mut issue, StepBuilder::new(Stage::Observe, "x", 1.0).build());
        let with_step = content_address(&build_explanation(&issue));
        assert_ne!(empty, with_step);
    }
}
