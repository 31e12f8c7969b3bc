//! The [`Action`] entity — a planned or executed remediation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActionId, IssueId, JsonMap};

/// The remediation action chosen by the `decide` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Send the merchant a support article or written guidance; no system
    /// mutation.
    SupportGuidance,
    /// Apply a reversible, time-boxed workaround (e.g. disable a webhook).
    TemporaryMitigation,
    /// Permanently reconfigure a merchant-facing setting.
    ConfigurationChange,
    /// Escalate to a human team with no automated remediation attempted.
    Escalation,
    /// Retry a previously failed operation idempotently.
    RetryOperation,
}

impl ActionType {
    /// The inherent risk level of this action type before any situational
    /// adjustment by `assess_risk`.
    pub fn baseline_risk(self) -> RiskLevel {
        match self {
            Self::SupportGuidance => RiskLevel::Low,
            Self::RetryOperation => RiskLevel::Low,
            Self::ConfigurationChange => RiskLevel::Medium,
            Self::TemporaryMitigation => RiskLevel::High,
            Self::Escalation => RiskLevel::Critical,
        }
    }
}

/// Categorical severity governing whether human approval is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// No approval required; reversible or inert.
    Low,
    /// No approval required by default, but logged prominently.
    Medium,
    /// Requires approval unless confidence is exceptionally high.
    High,
    /// Always requires approval.
    Critical,
}

/// Lifecycle status of an action. Transitions are forward-only except for
/// the explicit rollback edge from `Completed`/`Failed` to `RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Selected but not yet dispatched.
    Pending,
    /// Routed to `wait_approval`; awaiting an operator verdict.
    PendingApproval,
    /// Persisted as in-flight; the external call has been made but not yet
    /// observed to complete (the two-phase record of §4.9).
    InProgress,
    /// Executed successfully.
    Completed,
    /// Executed and failed.
    Failed,
    /// Previously completed or failed, then explicitly rolled back.
    RolledBack,
    /// An operator rejected the action at the approval gate; never executed.
    Rejected,
}

impl ActionStatus {
    /// Whether this status is terminal for the purposes of `success`
    /// becoming meaningful (§3: "`success` is null until status is one of
    /// these").
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }

    /// Whether `to` is a legal forward transition from `self`, or the single
    /// allowed rollback edge.
    pub fn can_transition_to(self, to: ActionStatus) -> bool {
        use ActionStatus::*;
        if self == to {
            return false;
        }
        match (self, to) {
            (Pending, PendingApproval)
            | (Pending, InProgress)
            | (Pending, Rejected)
            | (PendingApproval, InProgress)
            | (PendingApproval, Rejected)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (Completed, RolledBack)
            | (Failed, RolledBack) => true,
            _ => false,
        }
    }
}

/// A planned or executed remediation action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier.
    pub id: ActionId,
    /// The issue this action remediates.
    pub issue_id: IssueId,
    /// Which kind of remediation was chosen.
    pub action_type: ActionType,
    /// Risk classification assigned by `assess_risk`.
    pub risk_level: RiskLevel,
    /// Current lifecycle status.
    pub status: ActionStatus,
    /// Parameters supplied to the external action executor.
    pub parameters: JsonMap,
    /// Result returned by the external action executor, once known.
    pub result: JsonMap,
    /// Whether the action succeeded; `None` until `status.is_settled()`.
    pub success: Option<bool>,
    /// Error message captured on failure.
    pub error_message: Option<String>,
    /// Data captured before execution so the action can be reversed.
    pub rollback_data: Option<JsonMap>,
    /// Operator feedback, analyzer rationale, and other reasoning
    /// annotations keyed by source.
    pub reasoning: JsonMap,
    /// When the action record was created.
    pub created_at: DateTime<Utc>,
    /// When the external call was dispatched.
    pub executed_at: Option<DateTime<Utc>>,
    /// When the action reached a settled status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Action {
    /// Apply a status transition, rejecting any edge not in the forward (or
    /// single rollback) table.
    pub fn transition_to(&mut self, to: ActionStatus) -> Result<(), String> {
        if !self.status.can_transition_to(to) {
            return Err(format!(
                "illegal action status transition {:?} -> {:?}",
                self.status, to
            ));
        }
        self.status = to;
        if to.is_settled() {
            self.completed_at = Some(Utc::now());
            self.success = Some(match to {
                ActionStatus::Completed => true,
                ActionStatus::Failed => false,
                // Only reached via the successful-rollback edge (§4.11: "flip
                // `rolled_back` on success"), so the action settled as reversed.
                ActionStatus::RolledBack => true,
                ActionStatus::Pending | ActionStatus::PendingApproval | ActionStatus::InProgress | ActionStatus::Rejected => {
                    unreachable!("is_settled() only true for Completed/Failed/RolledBack")
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_legal() {
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::InProgress));
        assert!(ActionStatus::InProgress.can_transition_to(ActionStatus::Completed));
        assert!(ActionStatus::Completed.can_transition_to(ActionStatus::RolledBack));
    }

    #[test]
    fn backward_transitions_are_illegal() {
        assert!(!ActionStatus::Completed.can_transition_to(ActionStatus::InProgress));
        assert!(!ActionStatus::RolledBack.can_transition_to(ActionStatus::Completed));
    }

    #[test]
    fn settled_statuses_match_spec() {
        assert!(ActionStatus::Completed.is_settled());
        assert!(ActionStatus::Failed.is_settled());
        assert!(ActionStatus::RolledBack.is_settled());
        assert!(!ActionStatus::Pending.is_settled());
        assert!(!ActionStatus::InProgress.is_settled());
    }
}
