#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-executor** – Action executor (§4.11).
//!
//! Defines [`ActionExecutorClient`], the narrow contract the `execute`
//! stage handler consumes from the out-of-scope remediation integrations
//! (§1), and ships [`StubActionExecutorClient`], an in-memory
//! implementation used by tests and the bundled demo binary. `ActionExecutor`
//! is the dispatch wrapper: it consults the rate limiter first (denying
//! without ever calling the client), then invokes the client through a
//! circuit breaker, then records the outcome and attempts rollback on
//! failure when rollback data was captured.

use async_trait::async_trait;
use chrono::Utc;
use remediation_breaker::{BreakerError, CircuitBreaker};
use remediation_kv::SharedKv;
use remediation_rate_limiter::RateLimiter;
use remediation_types::{Action, ActionStatus, JsonMap, MerchantKey};

/// What the external action executor reported for one dispatch, mirroring
/// the wire contract of §6: `{success, result, error_message, duration_ms,
/// rollback_performed?}`.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Whether the action succeeded.
    pub success: bool,
    /// Structured result payload.
    pub result: JsonMap,
    /// Error message, present only when `success` is false.
    pub error_message: Option<String>,
    /// Wall-clock duration of the call, in milliseconds.
    pub duration_ms: u64,
    /// Whether a rollback was performed as part of this call.
    pub rollback_performed: Option<bool>,
}

/// Errors raised by an [`ActionExecutorClient`] implementation.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ExecutorClientError {
    /// The downstream integration failed or timed out.
    #[error("action executor call failed: {0}")]
    Failed(String),
}

/// The narrow contract consumed from the out-of-scope remediation
/// integrations. Must be idempotent by action id (§6): calling `execute`
/// twice for the same action id must be safe, since a crash between
/// persisting `in_progress` and observing the result requires exactly this
/// on resume (§4.9).
#[async_trait]
pub trait ActionExecutorClient: Send + Sync {
    /// Dispatch `action` to the downstream system and await its outcome.
    async fn execute(&self, action: &Action) -> Result<ExecutionOutcome, ExecutorClientError>;
    /// Attempt to reverse a previously executed action using the
    /// `rollback_data` captured before dispatch.
    async fn rollback(
        &self,
        action: &Action,
        rollback_data: &JsonMap,
    ) -> Result<bool, ExecutorClientError>;
}

/// In-memory stub standing in for the real remediation integrations.
/// Always succeeds, echoing the action's parameters back as its result;
/// used by tests and the demo binary so the pipeline is runnable end to end
/// without a real downstream system.
#[derive(Default)]
pub struct StubActionExecutorClient;

#[async_trait]
impl ActionExecutorClient for StubActionExecutorClient {
    async fn execute(&self, action: &Action) -> Result<ExecutionOutcome, ExecutorClientError> {
        Ok(ExecutionOutcome {
            success: true,
            result: action.parameters.clone(),
            error_message: None,
            duration_ms: 0,
            rollback_performed: None,
        })
    }

    async fn rollback(
        &self,
        _action: &Action,
        _rollback_data: &JsonMap,
    ) -> Result<bool, ExecutorClientError> {
        Ok(true)
    }
}

/// Outcome of [`ActionExecutor::execute`] as applied to the `Action` record:
/// either the downstream outcome, or a synthetic rejection that never
/// reached the client at all.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The rate limiter denied the reservation; the client was never
    /// called. The action should be recorded with resolution kind
    /// `rate_limited` and not treated as a handler failure.
    RateLimited,
    /// The circuit breaker guarding the client is open; the client was
    /// never called.
    BreakerOpen,
    /// The client was invoked and returned (successfully or not).
    Executed(ExecutionOutcome),
}

/// Wraps an [`ActionExecutorClient`] with rate-limiting and circuit
/// breaking, and applies the resulting status transitions to the `Action`
/// record in place.
///
/// Holds the client as a trait object rather than a generic parameter so
/// that it composes into the orchestrator's single, non-generic handler
/// context (§9: "globals / singletons -> explicit context").
pub struct ActionExecutor {
    client: Box<dyn ActionExecutorClient>,
}

impl ActionExecutor {
    /// Wrap `client`.
    pub fn new(client: impl ActionExecutorClient + 'static) -> Self {
        Self {
            client: Box::new(client),
        }
    }

    /// Execute `action` for `merchant`, consulting `limiter` first and
    /// dispatching through `breaker`. Mutates `action` in place: advances
    /// its status, fills in `result`/`error_message`/`completed_at`, and
    /// attempts rollback on failure when `rollback_data` is present.
    pub async fn execute(
        &self,
        action: &mut Action,
        merchant: &MerchantKey,
        kv: &dyn SharedKv,
        limiter: &RateLimiter,
        breaker: &CircuitBreaker,
    ) -> DispatchOutcome {
        let reservation = limiter
            .check_and_reserve(kv, merchant, action.action_type)
            .await;
        if !reservation.allowed {
            tracing::info!(
                action_id = %action.id,
                merchant = %merchant,
                current = reservation.current,
                limit = reservation.limit,
                "action suppressed by rate limiter"
            );
            limiter
                .flag_excessive(kv, merchant, action.action_type, reservation.current, reservation.limit)
                .await;
            return DispatchOutcome::RateLimited;
        }

        let _ = action.transition_to(ActionStatus::InProgress);
        action.executed_at = Some(Utc::now());

        let client = &self.client;
        let call_action = action.clone();
        let result = breaker
            .call(|| async move { client.execute(&call_action).await })
            .await;

        match result {
            Err(BreakerError::Open(_)) => DispatchOutcome::BreakerOpen,
            Err(BreakerError::Inner(err)) => {
                action.error_message = Some(err.to_string());
                let _ = action.transition_to(ActionStatus::Failed);
                self.try_rollback(action).await;
                DispatchOutcome::Executed(ExecutionOutcome {
                    success: false,
                    result: JsonMap::new(),
                    error_message: Some(err.to_string()),
                    duration_ms: 0,
                    rollback_performed: None,
                })
            }
            Ok(outcome) => {
                action.result = outcome.result.clone();
                if outcome.success {
                    let _ = action.transition_to(ActionStatus::Completed);
                } else {
                    action.error_message = outcome.error_message.clone();
                    let _ = action.transition_to(ActionStatus::Failed);
                    self.try_rollback(action).await;
                }
                DispatchOutcome::Executed(outcome)
            }
        }
    }

    async fn try_rollback(&self, action: &mut Action) {
        let Some(rollback_data) = action.rollback_data.clone() else {
            return;
        };
        match self.client.rollback(action, &rollback_data).await {
            Ok(true) => {
                let _ = action.transition_to(ActionStatus::RolledBack);
                tracing::info!(action_id = %action.id, "action rolled back after failure");
            }
            Ok(false) => {
                tracing::warn!(action_id = %action.id, "rollback attempted but did not report success");
            }
            Err(err) => {
                tracing::error!(action_id = %action.id, error = %err, "rollback attempt itself failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remediation_breaker::BreakerConfig;
    use remediation_kv::InMemoryKv;
    use remediation_rate_limiter::WindowLimit;
    use remediation_types::{ActionType, IssueId, RiskLevel};
    use std::time::Duration;

    fn sample_action() -> Action {
        Action {
            id: remediation_types::ActionId::new(),
            issue_id: IssueId::new(),
            action_type: ActionType::SupportGuidance,
            risk_level: RiskLevel::Low,
            status: ActionStatus::Pending,
            parameters: JsonMap::new(),
            result: JsonMap::new(),
            success: None,
            error_message: None,
            rollback_data: None,
            reasoning: JsonMap::new(),
            created_at: Utc::now(),
            executed_at: None,
            completed_at: None,
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl ActionExecutorClient for AlwaysFails {
        async fn execute(&self, _action: &Action) -> Result<ExecutionOutcome, ExecutorClientError> {
            Ok(ExecutionOutcome {
                success: false,
                result: JsonMap::new(),
                error_message: Some("downstream rejected".into()),
                duration_ms: 5,
                rollback_performed: None,
            })
        }

        async fn rollback(
            &self,
            _action: &Action,
            _rollback_data: &JsonMap,
        ) -> Result<bool, ExecutorClientError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn successful_execution_completes_the_action() {
        let executor = ActionExecutor::new(StubActionExecutorClient);
        let kv = InMemoryKv::new();
        let limiter = RateLimiter::new(WindowLimit::new(10, Duration::from_secs(60)));
        let breaker = CircuitBreaker::new("executor", BreakerConfig::default());
        let merchant = MerchantKey::from("m1");

        let mut action = sample_action();
        let outcome = executor
            .execute(&mut action, &merchant, &kv, &limiter, &breaker)
            .await;

        assert!(matches!(outcome, DispatchOutcome::Executed(o) if o.success));
        assert_eq!(action.status, ActionStatus::Completed);
        assert_eq!(action.success, Some(true));
    }

    #[tokio::test]
    async fn rate_limited_never_reaches_client() {
        let executor = ActionExecutor::new(StubActionExecutorClient);
        let kv = InMemoryKv::new();
        let limiter = RateLimiter::new(WindowLimit::new(0, Duration::from_secs(60)));
        let breaker = CircuitBreaker::new("executor", BreakerConfig::default());
        let merchant = MerchantKey::from("m1");

        let mut action = sample_action();
        let outcome = executor
            .execute(&mut action, &merchant, &kv, &limiter, &breaker)
            .await;

        assert!(matches!(outcome, DispatchOutcome::RateLimited));
        assert_eq!(action.status, ActionStatus::Pending);
    }

    #[tokio::test]
    async fn failure_with_rollback_data_attempts_rollback() {
        let executor = ActionExecutor::new(AlwaysFails);
        let kv = InMemoryKv::new();
        let limiter = RateLimiter::new(WindowLimit::new(10, Duration::from_secs(60)));
        let breaker = CircuitBreaker::new("executor", BreakerConfig::default());
        let merchant = MerchantKey::from("m1");

        let mut action = sample_action();
        action.rollback_data = Some(JsonMap::new());
        let outcome = executor
            .execute(&mut action, &merchant, &kv, &limiter, &breaker)
            .await;

        assert!(matches!(outcome, DispatchOutcome::Executed(o) if !o.success));
        assert_eq!(action.status, ActionStatus::RolledBack);
        assert_eq!(action.success, Some(true));
    }

    #[tokio::test]
    async fn failure_without_rollback_data_stays_failed() {
        let executor = ActionExecutor::new(AlwaysFails);
        let kv = InMemoryKv::new();
        let limiter = RateLimiter::new(WindowLimit::new(10, Duration::from_secs(60)));
        let breaker = CircuitBreaker::new("executor", BreakerConfig::default());
        let merchant = MerchantKey::from("m1");

        let mut action = sample_action();
        let outcome = executor
            .execute(&mut action, &merchant, &kv, &limiter, &breaker)
            .await;

        assert!(matches!(outcome, DispatchOutcome::Executed(_)));
        assert_eq!(action.status, ActionStatus::Failed);
        assert_eq!(action.success, Some(false));
    }
}
