#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-engine** – Issue lifecycle state machine (§4.7).
//!
//! Ties together the pure transition table ([`transitions`]), the
//! versioned checkpoint encoding ([`state`]), the stage handlers
//! ([`handlers`]), and the explicit collaborator bundle ([`context`]) into
//! one entry point, [`advance`], that the orchestrator drives in a loop:
//! fetch an issue, call `advance`, persist what comes back, repeat until
//! the issue blocks at `wait_approval` or reaches `complete`.

pub mod context;
pub mod error;
pub mod handlers;
pub mod state;
pub mod transitions;

pub use context::{EngineThresholds, HandlerContext};
pub use error::EngineError;
pub use state::{ChosenAction, CommonState, RootCauseSnapshot, StageState, StateCodecError};

use remediation_types::{Issue, Signal, Stage};

/// What a single `advance` call did, for the orchestrator's logging and
/// checkpoint bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The issue moved to a new, non-terminal, non-blocking stage; the
    /// orchestrator should call `advance` again immediately.
    Advanced(Stage),
    /// The issue is now parked at `wait_approval`; the orchestrator should
    /// stop driving it until an operator verdict arrives.
    Blocked,
    /// The issue reached `complete`.
    Finished,
}

/// Drive `issue` through exactly one stage handler, starting from
/// `issue.stage`, and verify the proposed transition against
/// [`transitions::is_allowed`] before committing it to `issue.stage`.
///
/// Callers own persistence: `advance` only mutates `issue` in memory and
/// appends audit entries through `ctx.store` as a side effect of the
/// handler it runs. The caller is responsible for calling
/// `ctx.store.update_issue` (and, typically, writing a fresh checkpoint via
/// [`state`]) once `advance` returns.
///
/// `signal` is required when `issue.stage` is `observe` or
/// `detect_patterns`, and ignored otherwise. `signals` is the full set of
/// signals folded into the issue so far, required only at `analyze`.
pub async fn advance(
    ctx: &HandlerContext<'_>,
    issue: &mut Issue,
    signal: Option<&Signal>,
    signals: &[Signal],
) -> Result<AdvanceOutcome, EngineError> {
    let from = issue.stage;
    let to = match from {
        Stage::Observe => {
            let signal = signal
                .ok_or_else(|| EngineError::State("observe requires a signal".into()))?;
            handlers::observe(ctx, issue, signal).await?
        }
        Stage::DetectPatterns => {
            let signal = signal
                .ok_or_else(|| EngineError::State("detect_patterns requires a signal".into()))?;
            handlers::detect_patterns(ctx, issue, signal).await?
        }
        Stage::Analyze => handlers::analyze(ctx, issue, signals).await?,
        Stage::Decide => handlers::decide(ctx, issue).await?,
        Stage::AssessRisk => handlers::assess_risk(ctx, issue).await?,
        Stage::Execute => handlers::execute(ctx, issue).await?,
        Stage::Record => handlers::record(ctx, issue).await?,
        Stage::WaitApproval => {
            return Err(EngineError::State(
                "advance called on an issue parked at wait_approval; call resume instead".into(),
            ))
        }
        Stage::Complete => {
            return Ok(AdvanceOutcome::Finished);
        }
    };

    if !transitions::is_allowed(from, to) {
        return Err(EngineError::State(format!(
            "handler for stage {from} proposed illegal transition to {to}"
        )));
    }
    issue.stage = to;

    Ok(match to {
        Stage::WaitApproval => AdvanceOutcome::Blocked,
        Stage::Complete => AdvanceOutcome::Finished,
        other => AdvanceOutcome::Advanced(other),
    })
}

/// Resume an issue parked at `wait_approval` once an operator verdict has
/// arrived, verifying the resulting transition the same way [`advance`]
/// does.
pub async fn resume(
    ctx: &HandlerContext<'_>,
    issue: &mut Issue,
    decision: &remediation_approval::Decision,
) -> Result<AdvanceOutcome, EngineError> {
    if issue.stage != Stage::WaitApproval {
        return Err(EngineError::State(format!(
            "resume called on an issue at {} instead of wait_approval",
            issue.stage
        )));
    }
    let from = issue.stage;
    let to = handlers::resume_after_approval(ctx, issue, decision).await?;
    if !transitions::is_allowed(from, to) {
        return Err(EngineError::State(format!(
            "resume_after_approval proposed illegal transition to {to}"
        )));
    }
    issue.stage = to;
    Ok(match to {
        Stage::Complete => AdvanceOutcome::Finished,
        other => AdvanceOutcome::Advanced(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use remediation_analyzer::StubAnalyzerClient;
    use remediation_approval::{ApprovalCoordinator, Verdict};
    use remediation_breaker::{BreakerConfig, BreakerRegistry};
    use remediation_cache::FingerprintCache;
    use remediation_executor::{ActionExecutor, StubActionExecutorClient};
    use remediation_kv::InMemoryKv;
    use remediation_rate_limiter::{RateLimiter, WindowLimit};
    use remediation_store_core::DurableStore;
    use remediation_store_memory::MemoryStore;
    use remediation_types::{MerchantKey, Severity, SignalId, SignalSource};
    use std::time::Duration;

    fn sample_signal(merchant: &str, error_code: &str) -> Signal {
        Signal {
            id: SignalId::new(),
            received_at: chrono::Utc::now(),
            source: SignalSource::WebhookFailure,
            merchant: MerchantKey::from(merchant),
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

    struct Harness {
        store: MemoryStore,
        kv: InMemoryKv,
        cache: FingerprintCache,
        analyzer: StubAnalyzerClient,
        executor: ActionExecutor,
        limiter: RateLimiter,
        breakers: BreakerRegistry,
        approvals: ApprovalCoordinator,
    }

    impl Harness {
        fn new() -> Self {
            let mut breakers = BreakerRegistry::new();
            breakers.register("analyzer", BreakerConfig::default());
            breakers.register("executor", BreakerConfig::default());
            Self {
                store: MemoryStore::new(),
                kv: InMemoryKv::new(),
                cache: FingerprintCache::new(Duration::from_secs(60), Duration::from_secs(60)),
                analyzer: StubAnalyzerClient,
                executor: ActionExecutor::new(StubActionExecutorClient),
                limiter: RateLimiter::new(WindowLimit::new(100, Duration::from_secs(60))),
                breakers,
                approvals: ApprovalCoordinator::new(),
            }
        }

        fn ctx(&self) -> HandlerContext<'_> {
            HandlerContext {
                store: &self.store,
                cache: &self.cache,
                kv: &self.kv,
                analyzer: &self.analyzer,
                executor: &self.executor,
                limiter: &self.limiter,
                breakers: &self.breakers,
                approvals: &self.approvals,
                thresholds: EngineThresholds::default(),
            }
        }
    }

    #[tokio::test]
    async fn high_confidence_low_risk_path_runs_straight_through_to_complete() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let mut issue = Issue::new(MerchantKey::from("m1"));
        harness.store.create_issue(&issue).await.unwrap();
        let signal = sample_signal("m1", "WEBHOOK_404");

        let outcome = advance(&ctx, &mut issue, Some(&signal), &[]).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Advanced(Stage::DetectPatterns));

        let outcome = advance(&ctx, &mut issue, Some(&signal), &[]).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Advanced(Stage::Analyze));

        let outcome = advance(&ctx, &mut issue, None, &[signal.clone()]).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Advanced(Stage::Decide));
        assert!(issue.root_cause_confidence.unwrap() > 0.8);

        let outcome = advance(&ctx, &mut issue, None, &[]).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Advanced(Stage::AssessRisk));

        let outcome = advance(&ctx, &mut issue, None, &[]).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Advanced(Stage::Execute));
        assert!(!issue.requires_approval);

        let outcome = advance(&ctx, &mut issue, None, &[]).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Advanced(Stage::Record));

        let outcome = advance(&ctx, &mut issue, None, &[]).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Finished);
        assert_eq!(issue.stage, Stage::Complete);
        assert!(issue.resolved_at.is_some());

        let entries = harness.store.list_audit_entries(issue.id).await.unwrap();
        // IssueOpened, SignalObserved, PatternDetected, RootCauseAnalyzed,
        // ActionDecided, RiskAssessed, ActionExecuted, IssueRecorded (§8 scenario 1).
        assert_eq!(entries.len(), 8);
        remediation_audit::verify_chain(&harness.store, issue.id).await.unwrap();
    }

    #[tokio::test]
    async fn low_confidence_path_blocks_on_approval_then_resumes() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let mut issue = Issue::new(MerchantKey::from("m1"));
        harness.store.create_issue(&issue).await.unwrap();
        let signal = sample_signal("m1", "UNKNOWN_SHAPE");

        advance(&ctx, &mut issue, Some(&signal), &[]).await.unwrap();
        advance(&ctx, &mut issue, Some(&signal), &[]).await.unwrap();
        let outcome = advance(&ctx, &mut issue, None, &[signal.clone()]).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Advanced(Stage::Decide));
        assert_eq!(issue.root_cause_confidence, Some(0.0));

        advance(&ctx, &mut issue, None, &[]).await.unwrap();
        let outcome = advance(&ctx, &mut issue, None, &[]).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Blocked);
        assert!(issue.requires_approval);
        assert_eq!(issue.stage, Stage::WaitApproval);

        let action_id = issue.action_id.unwrap();
        let decision = harness
            .approvals
            .decide(action_id, "op_1", Verdict::Approve, Some("looks fine".into()))
            .await
            .unwrap();

        let outcome = resume(&ctx, &mut issue, &decision).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Advanced(Stage::Execute));

        advance(&ctx, &mut issue, None, &[]).await.unwrap();
        let outcome = advance(&ctx, &mut issue, None, &[]).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Finished);
    }

    #[tokio::test]
    async fn rejection_at_approval_gate_completes_without_executing() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let mut issue = Issue::new(MerchantKey::from("m1"));
        harness.store.create_issue(&issue).await.unwrap();
        let signal = sample_signal("m1", "UNKNOWN_SHAPE");

        advance(&ctx, &mut issue, Some(&signal), &[]).await.unwrap();
        advance(&ctx, &mut issue, Some(&signal), &[]).await.unwrap();
        advance(&ctx, &mut issue, None, &[signal.clone()]).await.unwrap();
        advance(&ctx, &mut issue, None, &[]).await.unwrap();
        let outcome = advance(&ctx, &mut issue, None, &[]).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Blocked);

        let action_id = issue.action_id.unwrap();
        let decision = harness
            .approvals
            .decide(action_id, "op_1", Verdict::Reject, Some("too risky".into()))
            .await
            .unwrap();

        let outcome = resume(&ctx, &mut issue, &decision).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Finished);
        assert_eq!(issue.resolution, Some(remediation_types::ResolutionKind::Rejected));

        let action = harness.store.get_action(action_id).await.unwrap().unwrap();
        assert_eq!(action.status, remediation_types::ActionStatus::Rejected);

        remediation_audit::verify_chain(&harness.store, issue.id).await.unwrap();
    }

    #[tokio::test]
    async fn advance_on_wait_approval_is_rejected() {
        let harness = Harness::new();
        let ctx = harness.ctx();
        let mut issue = Issue::new(MerchantKey::from("m1"));
        issue.stage = Stage::WaitApproval;

        let result = advance(&ctx, &mut issue, None, &[]).await;
        assert!(matches!(result, Err(EngineError::State(_))));
    }

    #[tokio::test]
    async fn detect_patterns_reuses_a_pattern_already_persisted_in_the_store() {
        use remediation_types::{Pattern, PatternId, PatternType};

        let harness = Harness::new();
        let ctx = harness.ctx();
        let signal = sample_signal("m1", "WEBHOOK_404");
        let fingerprint = signal.fingerprint();

        // A pattern already promoted by an earlier process (or before this
        // fingerprint's cache entry's TTL expired); the fresh process's cache
        // is cold, so `detect_patterns` can only find it by consulting the
        // store directly (§4.4, §4.7).
        let existing = Pattern {
            id: PatternId::new(),
            pattern_type: PatternType::RecurringError,
            confidence: 0.9,
            signal_ids: vec![],
            affected_merchants: vec![MerchantKey::from("m0")],
            first_seen: chrono::Utc::now() - chrono::Duration::hours(1),
            last_seen: chrono::Utc::now() - chrono::Duration::minutes(5),
            frequency: 5,
            characteristics: std::collections::HashMap::from([
                ("error_code".to_string(), serde_json::json!(fingerprint.1)),
                ("normalized_shape".to_string(), serde_json::json!(fingerprint.2)),
            ]),
        };
        harness.store.insert_pattern(&existing).await.unwrap();

        let mut issue = Issue::new(MerchantKey::from("m1"));
        harness.store.create_issue(&issue).await.unwrap();

        advance(&ctx, &mut issue, Some(&signal), &[]).await.unwrap();
        let outcome = advance(&ctx, &mut issue, Some(&signal), &[]).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Advanced(Stage::Analyze));
        assert_eq!(issue.pattern_ids, vec![existing.id]);

        let matches = harness
            .store
            .find_recent_patterns(
                &fingerprint.1,
                &fingerprint.2,
                chrono::Utc::now() - chrono::Duration::hours(2),
            )
            .await
            .unwrap();
        assert_eq!(
            matches.len(),
            1,
            "detect_patterns must reuse the existing pattern rather than create a duplicate"
        );
    }
}
