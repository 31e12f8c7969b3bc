//! The [`Issue`] entity and its [`Stage`] state machine enumeration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    action::{ActionType, RiskLevel},
    validate_confidence, ActionId, IssueId, MerchantKey, PatternId, ReasoningStep, SignalId,
    ValidationError,
};

/// A named point in the issue lifecycle state machine.
///
/// See `remediation-engine` for the transition table and handler
/// implementations; this enum only names the states so that every crate can
/// refer to them without depending on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Recording the incoming signal.
    Observe,
    /// Clustering signals into patterns.
    DetectPatterns,
    /// Consulting the analyzer for a root-cause hypothesis.
    Analyze,
    /// Selecting a remediation action.
    Decide,
    /// Classifying the chosen action's risk.
    AssessRisk,
    /// Halted pending an operator verdict.
    WaitApproval,
    /// Dispatching the chosen action to the external executor.
    Execute,
    /// Appending the reasoning chain and outcome to the audit log.
    Record,
    /// Terminal: no further transitions.
    Complete,
}

impl Stage {
    /// Whether this stage is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Observe => "observe",
            Self::DetectPatterns => "detect_patterns",
            Self::Analyze => "analyze",
            Self::Decide => "decide",
            Self::AssessRisk => "assess_risk",
            Self::WaitApproval => "wait_approval",
            Self::Execute => "execute",
            Self::Record => "record",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

/// How an issue ultimately concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// An action was executed and resolved the issue.
    Resolved,
    /// An operator rejected the proposed action.
    Rejected,
    /// The proposed action was suppressed by the rate limiter.
    RateLimited,
    /// The pipeline gave up after repeated handler failures.
    Aborted,
    /// The issue was frozen after an integrity violation.
    IntegrityFrozen,
}

/// Status of an approval gate. Only meaningful when `requires_approval` is
/// true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Registered with the approval coordinator; no verdict yet.
    Pending,
    /// An operator approved the action.
    Approved,
    /// An operator rejected the action.
    Rejected,
}

/// Root cause category returned by the external analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCauseCategory {
    /// The merchant mis-stepped during their own migration.
    MigrationMisstep,
    /// A regression in the platform itself.
    PlatformRegression,
    /// Documentation failed to cover the merchant's scenario.
    DocumentationGap,
    /// A configuration error, merchant- or platform-side.
    ConfigError,
}

/// Running counters tracked on an issue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IssueCounters {
    /// Number of signals folded into this issue.
    pub signals: u64,
    /// Number of patterns detected for this issue.
    pub patterns: u64,
    /// Number of consecutive handler failures observed.
    pub errors: u64,
}

/// The unit of coordination: one issue per (merchant, signal cluster) moving
/// through the reasoning pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Stable identifier.
    pub id: IssueId,
    /// The merchant this issue concerns.
    pub merchant: MerchantKey,
    /// Current position in the state machine.
    pub stage: Stage,
    /// How the issue concluded, once terminal.
    pub resolution: Option<ResolutionKind>,
    /// Root cause category selected by the analyzer.
    pub root_cause_category: Option<RootCauseCategory>,
    /// Analyzer confidence in the root cause, `[0, 1]`.
    pub root_cause_confidence: Option<f64>,
    /// Free-text rationale accompanying the root cause.
    pub root_cause_rationale: Option<String>,
    /// The action type chosen by `decide`, if any.
    pub chosen_action_type: Option<ActionType>,
    /// The risk level assigned by `assess_risk`, if any.
    pub risk_level: Option<RiskLevel>,
    /// Whether the chosen action requires operator approval.
    pub requires_approval: bool,
    /// Status of the approval gate, meaningful only when `requires_approval`.
    pub approval_status: Option<ApprovalStatus>,
    /// Running counters.
    pub counters: IssueCounters,
    /// Every signal folded into this issue, in dequeue order.
    pub signal_ids: Vec<SignalId>,
    /// Every pattern detected for this issue.
    pub pattern_ids: Vec<PatternId>,
    /// The action currently selected or executing for this issue.
    pub action_id: Option<ActionId>,
    /// Ordered reasoning steps emitted by each stage handler.
    pub reasoning_chain: Vec<ReasoningStep>,
    /// The most recent handler error, if any.
    pub last_error: Option<String>,
    /// When the issue was created.
    pub created_at: DateTime<Utc>,
    /// When the issue was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the issue reached a terminal stage.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Start a brand-new issue for `merchant` at the `observe` stage.
    pub fn new(merchant: MerchantKey) -> Self {
        let now = Utc::now();
        Self {
            id: IssueId::new(),
            merchant,
            stage: Stage::Observe,
            resolution: None,
            root_cause_category: None,
            root_cause_confidence: None,
            root_cause_rationale: None,
            chosen_action_type: None,
            risk_level: None,
            requires_approval: false,
            approval_status: None,
            counters: IssueCounters::default(),
            signal_ids: Vec::new(),
            pattern_ids: Vec::new(),
            action_id: None,
            reasoning_chain: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    /// Validate the cross-field invariants from §3 of the specification.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(confidence) = self.root_cause_confidence {
            validate_confidence(confidence)?;
        }
        let resolved_at_present = self.resolved_at.is_some();
        if self.stage.is_terminal() != resolved_at_present {
            return Err(ValidationError::ResolutionMismatch {
                stage: self.stage,
                resolved_at_present,
            });
        }
        if !self.requires_approval && self.approval_status.is_some() {
            return Err(ValidationError::ApprovalStatusMismatch);
        }
        Ok(())
    }

    /// Idempotently fold a signal into this issue: a `signal_id` already
    /// present is a no-op, satisfying the at-most-once append property
    /// required by redelivery.
    pub fn append_signal(&mut self, signal_id: SignalId) -> bool {
        if self.signal_ids.contains(&signal_id) {
            return false;
        }
        self.signal_ids.push(signal_id);
        self.counters.signals += 1;
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_issue_is_valid() {
        let issue = Issue::new(MerchantKey::from("m1"));
        assert!(issue.validate().is_ok());
        assert_eq!(issue.stage, Stage::Observe);
    }

    #[test]
    fn resolution_mismatch_is_rejected() {
        let mut issue = Issue::new(MerchantKey::from("m1"));
        issue.stage = Stage::Complete;
        assert_eq!(
            issue.validate(),
            Err(ValidationError::ResolutionMismatch {
                stage: Stage::Complete,
                resolved_at_present: false,
            })
        );
    }

    #[test]
    fn duplicate_signal_append_is_noop() {
        let mut issue = Issue::new(MerchantKey::from("m1"));
        let sid = SignalId::new();
        assert!(issue.append_signal(sid));
        assert!(!issue.append_signal(sid));
        assert_eq!(issue.counters.signals, 1);
        assert_eq!(issue.signal_ids.len(), 1);
    }
}
