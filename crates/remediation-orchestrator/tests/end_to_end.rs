//! Integration tests exercising the orchestrator's main loop end to end
//! (§8): single low-risk resolution, high-risk approval gating (both
//! verdicts), redelivery idempotence across a simulated restart, and rate
//! limiting. Everything runs against the in-memory bus, store, and KV so the
//! tests need no external services.

use std::collections::HashMap;
use std::time::Duration;

use remediation_analyzer::StubAnalyzerClient;
use remediation_approval::{PendingFilter, Verdict};
use remediation_breaker::{BreakerConfig, BreakerRegistry};
use remediation_bus_core::{InMemoryBus, SignalBus};
use remediation_cache::FingerprintCache;
use remediation_engine::{EngineThresholds, HandlerContext};
use remediation_executor::{ActionExecutor, StubActionExecutorClient};
use remediation_kv::InMemoryKv;
use remediation_orchestrator::{Orchestrator, OrchestratorConfig};
use remediation_rate_limiter::{RateLimiter, WindowLimit};
use remediation_store_core::{DurableStore, IssueFilter};
use remediation_store_memory::MemoryStore;
use remediation_types::{
    ActionType, MerchantKey, ResolutionKind, Severity, Signal, SignalId, SignalSource, Stage,
};

struct Harness {
    store: MemoryStore,
    kv: InMemoryKv,
    cache: FingerprintCache,
    analyzer: StubAnalyzerClient,
    executor: ActionExecutor,
    limiter: RateLimiter,
    breakers: BreakerRegistry,
    approvals: remediation_approval::ApprovalCoordinator,
    bus: InMemoryBus,
}

impl Harness {
    fn new(limit: WindowLimit) -> Self {
        let mut breakers = BreakerRegistry::new();
        breakers.register("analyzer", BreakerConfig::default());
        breakers.register("executor", BreakerConfig::default());
        Self {
            store: MemoryStore::new(),
            kv: InMemoryKv::new(),
            cache: FingerprintCache::new(Duration::from_secs(60), Duration::from_secs(60)),
            analyzer: StubAnalyzerClient,
            executor: ActionExecutor::new(StubActionExecutorClient),
            limiter: RateLimiter::new(limit),
            breakers,
            approvals: remediation_approval::ApprovalCoordinator::new(),
            bus: InMemoryBus::new(),
        }
    }

    fn orchestrator(&self) -> Orchestrator<'_> {
        let ctx = HandlerContext {
            store: &self.store,
            cache: &self.cache,
            kv: &self.kv,
            analyzer: &self.analyzer,
            executor: &self.executor,
            limiter: &self.limiter,
            breakers: &self.breakers,
            approvals: &self.approvals,
            thresholds: EngineThresholds::default(),
        };
        Orchestrator::new(
            ctx,
            &self.bus,
            OrchestratorConfig {
                batch_max: 64,
                fetch_wait_ms: 20,
                max_consecutive_failures: 5,
            },
        )
    }
}

fn signal(merchant: &str, source: SignalSource, error_code: &str) -> Signal {
    Signal {
        id: SignalId::new(),
        received_at: chrono::Utc::now(),
        source,
        merchant: MerchantKey::from(merchant),
        severity: Severity::High,
        migration_stage: None,
        error_message: Some(format!("{error_code} observed")),
        error_code: Some(error_code.into()),
        resource: None,
        raw_payload: HashMap::new(),
        context: HashMap::new(),
        issue_id: None,
    }
}

#[tokio::test]
async fn single_low_risk_resolution_runs_straight_through_to_complete() {
    let harness = Harness::new(WindowLimit::new(10, Duration::from_secs(60)));
    harness.bus.start().await.unwrap();
    let orch = harness.orchestrator();

    harness
        .bus
        .push(signal("m1", SignalSource::WebhookFailure, "WEBHOOK_404"));

    let processed = orch.run_once().await.unwrap();
    assert_eq!(processed, 1);

    let issues = harness.store.list_issues(&IssueFilter::default()).await.unwrap();
    assert_eq!(issues.len(), 1);
    let issue = &issues[0];
    assert_eq!(issue.stage, Stage::Complete);
    assert_eq!(issue.resolution, Some(ResolutionKind::Resolved));
    assert!(!issue.requires_approval);

    let entries = harness.store.list_audit_entries(issue.id).await.unwrap();
    // IssueOpened, SignalObserved, PatternDetected, RootCauseAnalyzed,
    // ActionDecided, RiskAssessed, ActionExecuted, IssueRecorded (§8 scenario 1).
    assert_eq!(entries.len(), 8);
    remediation_audit::verify_chain(&harness.store, issue.id).await.unwrap();
}

#[tokio::test]
async fn high_risk_action_gates_on_approval_then_resumes_after_approve() {
    let harness = Harness::new(WindowLimit::new(10, Duration::from_secs(60)));
    harness.bus.start().await.unwrap();
    let orch = harness.orchestrator();

    harness
        .bus
        .push(signal("m1", SignalSource::ApiFailure, "GATEWAY_TIMEOUT"));
    orch.run_once().await.unwrap();

    let issues = harness.store.list_issues(&IssueFilter::default()).await.unwrap();
    assert_eq!(issues.len(), 1);
    let issue_id = issues[0].id;
    assert_eq!(issues[0].stage, Stage::WaitApproval);
    assert!(issues[0].requires_approval);
    assert_eq!(issues[0].risk_level, Some(remediation_types::RiskLevel::High));

    let pending = harness.approvals.pending(&PendingFilter::default()).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].issue_id, issue_id);

    let action_id = issues[0].action_id.unwrap();
    harness
        .approvals
        .decide(action_id, "op_42", Verdict::Approve, Some("looks fine".into()))
        .await
        .unwrap();

    // Empty poll: resumes the gated issue via the approval coordinator.
    orch.run_once().await.unwrap();

    let issue = harness.store.get_issue(issue_id).await.unwrap().unwrap();
    assert_eq!(issue.stage, Stage::Complete);
    assert_eq!(issue.resolution, Some(ResolutionKind::Resolved));

    let action = harness.store.get_action(action_id).await.unwrap().unwrap();
    let feedback = action
        .reasoning
        .get("operator_feedback")
        .expect("operator feedback recorded on the action");
    assert_eq!(feedback["operator"], serde_json::json!("op_42"));

    remediation_audit::verify_chain(&harness.store, issue_id).await.unwrap();
}

#[tokio::test]
async fn rejection_at_approval_gate_completes_without_executing() {
    let harness = Harness::new(WindowLimit::new(10, Duration::from_secs(60)));
    harness.bus.start().await.unwrap();
    let orch = harness.orchestrator();

    harness
        .bus
        .push(signal("m1", SignalSource::ApiFailure, "GATEWAY_TIMEOUT"));
    orch.run_once().await.unwrap();

    let issues = harness.store.list_issues(&IssueFilter::default()).await.unwrap();
    let issue_id = issues[0].id;
    let action_id = issues[0].action_id.unwrap();

    harness
        .approvals
        .decide(action_id, "op_7", Verdict::Reject, Some("too risky".into()))
        .await
        .unwrap();
    orch.run_once().await.unwrap();

    let issue = harness.store.get_issue(issue_id).await.unwrap().unwrap();
    assert_eq!(issue.stage, Stage::Complete);
    assert_eq!(issue.resolution, Some(ResolutionKind::Rejected));

    let action = harness.store.get_action(action_id).await.unwrap().unwrap();
    assert_eq!(action.status, remediation_types::ActionStatus::Rejected);
    assert!(action.executed_at.is_none(), "a rejected action must never reach the executor");
}

#[tokio::test]
async fn rehydrate_index_routes_redelivered_signal_to_the_same_gated_issue() {
    let harness = Harness::new(WindowLimit::new(10, Duration::from_secs(60)));
    harness.bus.start().await.unwrap();

    let sig = signal("m1", SignalSource::ApiFailure, "GATEWAY_TIMEOUT");
    harness.bus.push(sig.clone());

    let issue_id = {
        let orch = harness.orchestrator();
        orch.run_once().await.unwrap();
        let issues = harness.store.list_issues(&IssueFilter::default()).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].stage, Stage::WaitApproval);
        issues[0].id
    };

    // Simulate a process restart: a fresh orchestrator starts with a cold
    // in-memory index and must rehydrate it from the store before the next
    // redelivered signal arrives.
    let orch2 = harness.orchestrator();
    let rehydrated = orch2.rehydrate_index().await.unwrap();
    assert_eq!(rehydrated, 1);

    harness.bus.push(sig.clone());
    orch2.run_once().await.unwrap();

    let issues = harness.store.list_issues(&IssueFilter::default()).await.unwrap();
    assert_eq!(issues.len(), 1, "redelivery of the same signal must not open a second issue");
    let issue = harness.store.get_issue(issue_id).await.unwrap().unwrap();
    assert_eq!(issue.signal_ids.len(), 1, "duplicate signal_id is folded in at most once");
}

#[tokio::test]
async fn eleventh_action_within_the_window_is_rate_limited_and_flags_the_merchant() {
    let harness = Harness::new(WindowLimit::new(10, Duration::from_secs(60)));
    harness.bus.start().await.unwrap();
    let orch = harness.orchestrator();

    for _ in 0..11 {
        harness
            .bus
            .push(signal("m1", SignalSource::WebhookFailure, "WEBHOOK_404"));
    }
    let processed = orch.run_once().await.unwrap();
    assert_eq!(processed, 11);

    let issues = harness.store.list_issues(&IssueFilter::default()).await.unwrap();
    assert_eq!(issues.len(), 11, "each signal resolves before the next arrives, opening 11 issues");

    let resolutions: Vec<_> = issues.iter().filter_map(|i| i.resolution).collect();
    assert_eq!(
        resolutions.iter().filter(|r| **r == ResolutionKind::RateLimited).count(),
        1,
        "exactly the 11th action should be suppressed by the limiter"
    );
    assert_eq!(
        resolutions.iter().filter(|r| **r == ResolutionKind::Resolved).count(),
        10
    );

    assert!(
        harness
            .limiter
            .is_flagged(&harness.kv, &MerchantKey::from("m1"), ActionType::SupportGuidance)
            .await,
        "merchant should be flagged for excessive use after the limit is crossed"
    );
}

#[tokio::test]
async fn resume_in_progress_actions_completes_a_crash_interrupted_execute() {
    use remediation_types::{Action, ActionId, ActionStatus, Issue, RiskLevel};

    let harness = Harness::new(WindowLimit::new(10, Duration::from_secs(60)));

    // Simulate a crash between persisting `status = in_progress` and
    // observing the executor's result (§4.9, §8 scenario 4): an issue
    // parked at `execute` with its chosen action still `in_progress`,
    // written directly to the store rather than reached by driving the
    // pipeline.
    let mut issue = Issue::new(MerchantKey::from("m1"));
    issue.stage = Stage::Execute;
    let action = Action {
        id: ActionId::new(),
        issue_id: issue.id,
        action_type: ActionType::SupportGuidance,
        risk_level: RiskLevel::Low,
        status: ActionStatus::InProgress,
        parameters: HashMap::new(),
        result: HashMap::new(),
        success: None,
        error_message: None,
        rollback_data: None,
        reasoning: HashMap::new(),
        created_at: chrono::Utc::now(),
        executed_at: Some(chrono::Utc::now()),
        completed_at: None,
    };
    issue.action_id = Some(action.id);
    harness.store.create_issue(&issue).await.unwrap();
    harness.store.create_action(&action).await.unwrap();

    // A fresh orchestrator stands in for the restarted process.
    let orch = harness.orchestrator();
    orch.rehydrate_index().await.unwrap();
    let resumed = orch.resume_in_progress_actions().await.unwrap();
    assert_eq!(resumed, 1);

    let settled_issue = harness.store.get_issue(issue.id).await.unwrap().unwrap();
    assert_eq!(settled_issue.stage, Stage::Complete);
    assert_eq!(settled_issue.resolution, Some(ResolutionKind::Resolved));

    let settled_action = harness.store.get_action(action.id).await.unwrap().unwrap();
    assert_eq!(settled_action.status, ActionStatus::Completed);
    assert_eq!(settled_action.success, Some(true));

    remediation_audit::verify_chain(&harness.store, issue.id).await.unwrap();
}
