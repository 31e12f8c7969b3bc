//! The [`ReasoningStep`] shape produced by every stage handler.

use serde::{Deserialize, Serialize};

use crate::{Issue, JsonMap, Stage};

/// A structured explanation emitted by one stage handler.
///
/// Aggregated in `Issue::reasoning_chain` and attached verbatim to the final
/// `issue_recorded` audit entry so that every decision is reconstructable
/// without re-running the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// The stage that produced this step.
    pub stage: Stage,
    /// One-line human-readable summary, e.g. "Observed webhook_failure from m1".
    pub summary: String,
    /// Confidence in this step's conclusion, `[0, 1]`.
    pub confidence: f64,
    /// References to evidence (signal ids, pattern ids, analyzer citations)
    /// supporting this step, as opaque strings.
    pub evidence_refs: Vec<String>,
    /// Structured data specific to the stage (e.g. the fingerprint tuple).
    pub data: JsonMap,
    /// Present when the stage could not reach its target confidence and
    /// continued anyway rather than blocking the pipeline.
    pub uncertainty: Option<String>,
}

impl ReasoningStep {
    /// Build a step with no evidence, data, or uncertainty — the common case
    /// for deterministic stages like `observe`.
    pub fn simple(stage: Stage, summary: impl Into<String>, confidence: f64) -> Self {
        Self {
            stage,
            summary: summary.into(),
            confidence,
            evidence_refs: Vec::new(),
            data: JsonMap::new(),
            uncertainty: None,
        }
    }
}

/// One explanation record: every reasoning step collected for an issue,
/// content-addressable so it can be referenced from the final audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    /// The issue this explanation belongs to.
    pub issue_id: crate::IssueId,
    /// Every reasoning step in stage order.
    pub steps: Vec<ReasoningStep>,
}

impl Explanation {
    /// Build the explanation for `issue` from its accumulated reasoning chain.
    pub fn from_issue(issue: &Issue) -> Self {
        Self {
            issue_id: issue.id,
            steps: issue.reasoning_chain.clone(),
        }
    }
}
