#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-approval** – Approval coordinator (§4.10).
//!
//! Holds the set of issues currently parked at `Stage::WaitApproval` along
//! with their pending action id, accepts operator verdicts, and broadcasts
//! every verdict to subscribers without depending on one being present
//! (§9's resolution of the Open Question: emitting the audit entry alone is
//! sufficient for correctness; `subscribe()` is an optional hook for an
//! external websocket layer).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use remediation_types::{ActionId, IssueId};
use tokio::sync::{broadcast, RwLock};

/// An operator's decision on a gated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The operator approved the action; the pipeline proceeds to execute.
    Approve,
    /// The operator rejected the action; the pipeline completes without
    /// executing.
    Reject,
}

/// An issue currently parked at the approval gate.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    /// The gated issue.
    pub issue_id: IssueId,
    /// The action awaiting a verdict.
    pub action_id: ActionId,
    /// When this issue was registered with the coordinator.
    pub registered_at: DateTime<Utc>,
}

/// A recorded operator decision, broadcast to subscribers and returned to
/// the orchestrator so it can resume the gated issue.
#[derive(Debug, Clone)]
pub struct Decision {
    /// The action the verdict concerns.
    pub action_id: ActionId,
    /// The issue the action belongs to.
    pub issue_id: IssueId,
    /// The operator who recorded the verdict.
    pub operator: String,
    /// Approve or reject.
    pub verdict: Verdict,
    /// Free-text feedback accompanying the verdict.
    pub feedback: Option<String>,
    /// When the verdict was recorded.
    pub decided_at: DateTime<Utc>,
}

/// Errors raised by the approval coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// No pending approval is registered for the given action id.
    #[error("no pending approval registered for action {0}")]
    UnknownAction(ActionId),
}

/// Filters for [`ApprovalCoordinator::pending`].
#[derive(Debug, Clone, Default)]
pub struct PendingFilter {
    /// Restrict to a single issue.
    pub issue_id: Option<IssueId>,
}

/// Holds issues at the `wait_approval` gate and coordinates operator
/// verdicts. Constructed once at startup and shared by reference (§9).
pub struct ApprovalCoordinator {
    pending: RwLock<HashMap<ActionId, PendingApproval>>,
    decisions: RwLock<Vec<Decision>>,
    verdicts: broadcast::Sender<Decision>,
}

impl Default for ApprovalCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalCoordinator {
    /// Build an empty coordinator.
    pub fn new() -> Self {
        let (verdicts, _) = broadcast::channel(256);
        Self {
            pending: RwLock::new(HashMap::new()),
            decisions: RwLock::new(Vec::new()),
            verdicts,
        }
    }

    /// Register `issue_id`/`action_id` as parked at the approval gate.
    /// Called by the `assess_risk` handler when it routes to
    /// `wait_approval`.
    pub async fn register(&self, issue_id: IssueId, action_id: ActionId) {
        let mut pending = self.pending.write().await;
        pending.insert(
            action_id,
            PendingApproval {
                issue_id,
                action_id,
                registered_at: Utc::now(),
            },
        );
        tracing::info!(issue_id = %issue_id, action_id = %action_id, "issue parked at approval gate");
    }

    /// Record an operator's verdict on `action_id`. Removes it from the
    /// pending set, appends the decision to history, and broadcasts it to
    /// any subscribers. Returns the recorded [`Decision`] so the caller
    /// (typically the orchestrator, polling for arrived verdicts) can
    /// resume the gated issue.
    pub async fn decide(
        &self,
        action_id: ActionId,
        operator: impl Into<String>,
        verdict: Verdict,
        feedback: Option<String>,
    ) -> Result<Decision, ApprovalError> {
        let registration = {
            let mut pending = self.pending.write().await;
            pending
                .remove(&action_id)
                .ok_or(ApprovalError::UnknownAction(action_id))?
        };

        let decision = Decision {
            action_id,
            issue_id: registration.issue_id,
            operator: operator.into(),
            verdict,
            feedback,
            decided_at: Utc::now(),
        };

        self.decisions.write().await.push(decision.clone());
        // A verdict with no subscribers attached is not an error: the
        // coordinator never awaits or depends on a listener being present.
        let _ = self.verdicts.send(decision.clone());

        tracing::info!(
            issue_id = %decision.issue_id,
            action_id = %action_id,
            operator = %decision.operator,
            verdict = ?decision.verdict,
            "recorded operator verdict"
        );
        Ok(decision)
    }

    /// The current set of issues parked at the approval gate, optionally
    /// narrowed by `filter`.
    pub async fn pending(&self, filter: &PendingFilter) -> Vec<PendingApproval> {
        let pending = self.pending.read().await;
        pending
            .values()
            .filter(|p| filter.issue_id.map(|id| id == p.issue_id).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Every decision recorded so far whose `issue_id` still has an entry
    /// the orchestrator has not yet consumed. In this single-process
    /// design decisions are simply polled by issue id; production
    /// deployments running multiple orchestrator instances would instead
    /// have each instance track its own consumption offset into
    /// `subscribe()`.
    pub async fn decisions_for(&self, issue_id: IssueId) -> Vec<Decision> {
        let decisions = self.decisions.read().await;
        decisions
            .iter()
            .filter(|d| d.issue_id == issue_id)
            .cloned()
            .collect()
    }

    /// Subscribe to the live stream of verdicts. Intended for an external
    /// websocket layer; the coordinator itself never depends on a receiver
    /// being attached (§9 Open Question resolution).
    pub fn subscribe(&self) -> broadcast::Receiver<Decision> {
        self.verdicts.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_decide_removes_from_pending() {
        let coordinator = ApprovalCoordinator::new();
        let issue_id = IssueId::new();
        let action_id = ActionId::new();
        coordinator.register(issue_id, action_id).await;

        assert_eq!(coordinator.pending(&PendingFilter::default()).await.len(), 1);

        coordinator
            .decide(action_id, "op_42", Verdict::Approve, None)
            .await
            .unwrap();

        assert!(coordinator.pending(&PendingFilter::default()).await.is_empty());
    }

    #[tokio::test]
    async fn deciding_unknown_action_errors() {
        let coordinator = ApprovalCoordinator::new();
        let result = coordinator
            .decide(ActionId::new(), "op_1", Verdict::Reject, None)
            .await;
        assert!(matches!(result, Err(ApprovalError::UnknownAction(_))));
    }

    #[tokio::test]
    async fn decision_is_broadcast_to_subscribers() {
        let coordinator = ApprovalCoordinator::new();
        let mut rx = coordinator.subscribe();
        let issue_id = IssueId::new();
        let action_id = ActionId::new();
        coordinator.register(issue_id, action_id).await;

        coordinator
            .decide(action_id, "op_42", Verdict::Approve, Some("looks fine".into()))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.action_id, action_id);
        assert_eq!(received.operator, "op_42");
    }

    #[tokio::test]
    async fn decide_without_any_subscriber_still_succeeds() {
        let coordinator = ApprovalCoordinator::new();
        let issue_id = IssueId::new();
        let action_id = ActionId::new();
        coordinator.register(issue_id, action_id).await;

        let result = coordinator
            .decide(action_id, "op_42", Verdict::Reject, None)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn decisions_for_filters_by_issue() {
        let coordinator = ApprovalCoordinator::new();
        let issue_a = IssueId::new();
        let action_a = ActionId::new();
        coordinator.register(issue_a, action_a).await;
        coordinator
            .decide(action_a, "op_1", Verdict::Approve, None)
            .await
            .unwrap();

        let decisions = coordinator.decisions_for(issue_a).await;
        assert_eq!(decisions.len(), 1);
        assert!(coordinator.decisions_for(IssueId::new()).await.is_empty());
    }
}
