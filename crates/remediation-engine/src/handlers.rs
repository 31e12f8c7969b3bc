//! Stage handlers (§4.7): one function per lifecycle stage. Each advances
//! `issue` in place, emits exactly one audit entry per observable
//! transition (§2), and returns the next [`Stage`] — which the caller must
//! confirm against [`crate::transitions::is_allowed`] before committing.
//!
//! Handlers are expressed as `async fn` rather than the strictly pure
//! `state -> state'` shape of §9's design note: every suspension point they
//! cross (store I/O, the analyzer call, the action executor call) is itself
//! one of the suspension points enumerated in §5, and Rust's `async`/`await`
//! already marks those points explicitly in the handler's control flow. The
//! pure part of the design — the transition table — is enforced separately
//! and is checked independently of any handler's I/O.

use std::collections::HashMap;

use chrono::Utc;
use remediation_approval::Verdict;
use remediation_breaker::BreakerError;
use remediation_explain::StepBuilder;
use remediation_executor::DispatchOutcome;
use remediation_store_core::StoreError;
use remediation_types::{
    Action, ActionId, ActionStatus, ActionType, Actor, AuditEventType, Issue, JsonMap, Pattern,
    PatternType, ResolutionKind, RiskLevel, Signal, Stage,
};

use crate::context::HandlerContext;
use crate::error::EngineError;

fn json_map(pairs: impl IntoIterator<Item = (&'static str, serde_json::Value)>) -> JsonMap {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<HashMap<_, _>>()
}

/// `observe` (§4.7): record the incoming signal on the issue.
pub async fn observe(
    ctx: &HandlerContext<'_>,
    issue: &mut Issue,
    signal: &Signal,
) -> Result<Stage, EngineError> {
    // `observe` only ever runs once per issue: the transition table has no
    // edge back into `observe`, so the first signal that reaches this
    // handler is always the one that opened the issue (§2).
    remediation_audit::append(
        ctx.store,
        issue.id,
        AuditEventType::IssueOpened,
        Actor::System,
        json_map([("merchant", serde_json::json!(issue.merchant.to_string()))]),
        JsonMap::new(),
        JsonMap::new(),
    )
    .await?;

    let is_new = issue.append_signal(signal.id);
    if is_new {
        match ctx.store.insert_signal(signal).await {
            Ok(()) => {}
            Err(StoreError::Backend(_)) => {
                // Redelivery of an already-durable signal is expected under
                // at-least-once bus semantics; a genuine backend failure on
                // the first attempt still propagates.
            }
            Err(err) => return Err(err.into()),
        }
    }

    let step = StepBuilder::new(
        Stage::Observe,
        format!("Observed {} from {}", signal.source, signal.merchant),
        1.0,
    )
    .evidence(signal.id.to_string())
    .build();
    remediation_explain::record_step(issue, step);

    remediation_audit::append(
        ctx.store,
        issue.id,
        AuditEventType::SignalObserved,
        Actor::System,
        json_map([("signal_id", serde_json::json!(signal.id.to_string()))]),
        JsonMap::new(),
        JsonMap::new(),
    )
    .await?;

    issue.updated_at = Utc::now();
    Ok(Stage::DetectPatterns)
}

/// `detect_patterns` (§4.7): fingerprint the latest signal, consult the
/// cache, and promote to a persisted [`Pattern`] once the hit count clears
/// the configured threshold.
pub async fn detect_patterns(
    ctx: &HandlerContext<'_>,
    issue: &mut Issue,
    signal: &Signal,
) -> Result<Stage, EngineError> {
    let fingerprint = signal.fingerprint();
    let hint = ctx
        .cache
        .record(ctx.kv, fingerprint.clone(), signal.merchant.clone())
        .await
        .map_err(|e| EngineError::Dependency(e.to_string()))?;

    let mut promoted_pattern_id = hint.pattern_id;
    if promoted_pattern_id.is_none() {
        // The cache is a hint only (§4.4); on a miss, consult the durable
        // store directly before starting a fresh candidate so a pattern
        // promoted by an earlier process (or before this cache entry's TTL
        // expired) is reused instead of re-accumulated from scratch.
        let since = Utc::now() - chrono::Duration::seconds(ctx.thresholds.pattern_lookback_secs);
        let existing = ctx
            .store
            .find_recent_patterns(&fingerprint.1, &fingerprint.2, since)
            .await?;
        if let Some(existing_pattern) = existing.into_iter().next() {
            ctx.cache
                .promote(ctx.kv, &fingerprint, existing_pattern.id)
                .await
                .map_err(|e| EngineError::Dependency(e.to_string()))?;
            promoted_pattern_id = Some(existing_pattern.id);
        }
    }
    if promoted_pattern_id.is_none() && hint.count >= ctx.thresholds.pattern_promotion_threshold {
        let pattern = Pattern {
            id: remediation_types::PatternId::new(),
            pattern_type: if hint.merchants.len() > 1 {
                PatternType::CrossMerchant
            } else {
                PatternType::RecurringError
            },
            confidence: (hint.count as f64 / (hint.count as f64 + 1.0)).min(0.99),
            signal_ids: issue.signal_ids.clone(),
            affected_merchants: hint.merchants.iter().cloned().collect(),
            first_seen: hint.first_seen,
            last_seen: hint.last_seen,
            frequency: hint.count,
            characteristics: HashMap::from([
                ("error_code".to_string(), serde_json::json!(fingerprint.1)),
                ("normalized_shape".to_string(), serde_json::json!(fingerprint.2)),
            ]),
        };
        ctx.store.insert_pattern(&pattern).await?;
        ctx.cache
            .promote(ctx.kv, &fingerprint, pattern.id)
            .await
            .map_err(|e| EngineError::Dependency(e.to_string()))?;
        promoted_pattern_id = Some(pattern.id);
    }

    if let Some(pattern_id) = promoted_pattern_id {
        if !issue.pattern_ids.contains(&pattern_id) {
            issue.pattern_ids.push(pattern_id);
            issue.counters.patterns += 1;
        }
    }

    let step = StepBuilder::new(
        Stage::DetectPatterns,
        format!("Fingerprint seen {} time(s) across {} merchant(s)", hint.count, hint.merchants.len()),
        if promoted_pattern_id.is_some() { 0.9 } else { 0.4 },
    )
    .data("fingerprint_count", serde_json::json!(hint.count))
    .build();
    remediation_explain::record_step(issue, step);

    remediation_audit::append(
        ctx.store,
        issue.id,
        AuditEventType::PatternDetected,
        Actor::System,
        json_map([("signal_id", serde_json::json!(signal.id.to_string()))]),
        json_map([("promoted", serde_json::json!(promoted_pattern_id.is_some()))]),
        JsonMap::new(),
    )
    .await?;

    issue.updated_at = Utc::now();
    Ok(Stage::Analyze)
}

/// `analyze` (§4.7): ask the analyzer for a root-cause hypothesis. Never
/// blocks the pipeline: a failed call or a malformed response degrades to
/// [`remediation_analyzer::AnalyzerResponse::low_confidence_default`] and
/// the uncertainty is recorded on the reasoning step instead of propagated
/// as an error.
pub async fn analyze(
    ctx: &HandlerContext<'_>,
    issue: &mut Issue,
    signals: &[Signal],
) -> Result<Stage, EngineError> {
    let analyzer = ctx.analyzer;
    let owned_signals = signals.to_vec();
    let context = JsonMap::new();
    let breaker = ctx.breakers.get("analyzer");

    let response = match breaker {
        Some(breaker) => {
            let owned_signals = owned_signals.clone();
            breaker
                .call(|| async move { analyzer.analyze(&owned_signals, &context).await })
                .await
                .unwrap_or_else(|err| {
                    let reason = match err {
                        BreakerError::Open(_) => "analyzer circuit breaker is open".to_string(),
                        BreakerError::Inner(inner) => inner.to_string(),
                    };
                    remediation_analyzer::AnalyzerResponse::low_confidence_default(reason)
                })
        }
        None => analyzer
            .analyze(&owned_signals, &context)
            .await
            .unwrap_or_else(|err| {
                remediation_analyzer::AnalyzerResponse::low_confidence_default(err.to_string())
            }),
    };

    issue.root_cause_category = Some(response.category);
    issue.root_cause_confidence = Some(response.confidence);
    issue.root_cause_rationale = Some(response.reasoning.clone());

    let recommended = serde_json::to_value(&response.recommended_actions)
        .expect("Vec<ActionType> always serializes");

    let mut step = StepBuilder::new(Stage::Analyze, response.reasoning.clone(), response.confidence)
        .data("recommended_actions", recommended);
    for reference in &response.evidence {
        step = step.evidence(reference.clone());
    }
    if response.confidence < ctx.thresholds.decide_confidence_threshold {
        step = step.uncertain(format!(
            "analyzer confidence {:.2} below decision threshold",
            response.confidence
        ));
    }
    remediation_explain::record_step(issue, step.build());

    remediation_audit::append(
        ctx.store,
        issue.id,
        AuditEventType::RootCauseAnalyzed,
        Actor::System,
        JsonMap::new(),
        json_map([
            ("category", serde_json::to_value(response.category).unwrap()),
            ("confidence", serde_json::json!(response.confidence)),
        ]),
        JsonMap::new(),
    )
    .await?;

    issue.updated_at = Utc::now();
    Ok(Stage::Decide)
}

/// `decide` (§4.7): select one action type from the analyzer's
/// recommendations — lowest-risk option meeting the confidence threshold,
/// else escalate.
pub async fn decide(ctx: &HandlerContext<'_>, issue: &mut Issue) -> Result<Stage, EngineError> {
    let recommended: Vec<ActionType> = issue
        .reasoning_chain
        .iter()
        .rev()
        .find(|step| step.stage == Stage::Analyze)
        .and_then(|step| step.data.get("recommended_actions"))
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default();

    let confidence = issue.root_cause_confidence.unwrap_or(0.0);
    let chosen = if confidence >= ctx.thresholds.decide_confidence_threshold {
        recommended
            .iter()
            .copied()
            .min_by_key(|action_type| action_type.baseline_risk())
            .unwrap_or(ActionType::Escalation)
    } else {
        ActionType::Escalation
    };

    let action = Action {
        id: ActionId::new(),
        issue_id: issue.id,
        action_type: chosen,
        risk_level: chosen.baseline_risk(),
        status: ActionStatus::Pending,
        parameters: json_map([("merchant", serde_json::json!(issue.merchant.as_str()))]),
        result: JsonMap::new(),
        success: None,
        error_message: None,
        rollback_data: Some(JsonMap::new()),
        reasoning: JsonMap::new(),
        created_at: Utc::now(),
        executed_at: None,
        completed_at: None,
    };
    ctx.store.create_action(&action).await?;
    issue.chosen_action_type = Some(chosen);
    issue.action_id = Some(action.id);

    let step = StepBuilder::new(
        Stage::Decide,
        format!("Selected {chosen:?} given confidence {confidence:.2}"),
        confidence,
    )
    .data("action_id", serde_json::json!(action.id.to_string()))
    .build();
    remediation_explain::record_step(issue, step);

    remediation_audit::append(
        ctx.store,
        issue.id,
        AuditEventType::ActionDecided,
        Actor::System,
        JsonMap::new(),
        json_map([("action_type", serde_json::to_value(chosen).unwrap())]),
        JsonMap::new(),
    )
    .await?;

    issue.updated_at = Utc::now();
    Ok(Stage::AssessRisk)
}

/// `assess_risk` (§4.7): classify the chosen action's risk and route to
/// `wait_approval` when the risk is high/critical or confidence is below
/// threshold, else straight to `execute`.
pub async fn assess_risk(ctx: &HandlerContext<'_>, issue: &mut Issue) -> Result<Stage, EngineError> {
    let action_id = issue
        .action_id
        .ok_or_else(|| EngineError::State("assess_risk reached with no chosen action".into()))?;
    let mut action = ctx
        .store
        .get_action(action_id)
        .await?
        .ok_or_else(|| EngineError::State(format!("unknown action {action_id}")))?;

    let confidence = issue.root_cause_confidence.unwrap_or(0.0);
    let mut risk = action.action_type.baseline_risk();
    if confidence < ctx.thresholds.risk_escalation_confidence_floor {
        risk = escalate_one_level(risk);
    }
    action.risk_level = risk;
    issue.risk_level = Some(risk);

    let requires_approval =
        risk >= RiskLevel::High || confidence < ctx.thresholds.decide_confidence_threshold;
    issue.requires_approval = requires_approval;

    let next_stage = if requires_approval {
        action.transition_to(ActionStatus::PendingApproval).map_err(EngineError::State)?;
        issue.approval_status = Some(remediation_types::ApprovalStatus::Pending);
        ctx.approvals.register(issue.id, action.id).await;
        remediation_audit::append(
            ctx.store,
            issue.id,
            AuditEventType::ApprovalRequested,
            Actor::System,
            JsonMap::new(),
            json_map([("risk_level", serde_json::to_value(risk).unwrap())]),
            JsonMap::new(),
        )
        .await?;
        Stage::WaitApproval
    } else {
        Stage::Execute
    };

    ctx.store.update_action(&action).await?;

    let step = StepBuilder::new(
        Stage::AssessRisk,
        format!("Classified risk as {risk:?} (requires_approval={requires_approval})"),
        confidence,
    )
    .build();
    remediation_explain::record_step(issue, step);

    remediation_audit::append(
        ctx.store,
        issue.id,
        AuditEventType::RiskAssessed,
        Actor::System,
        JsonMap::new(),
        json_map([("risk_level", serde_json::to_value(risk).unwrap())]),
        JsonMap::new(),
    )
    .await?;

    issue.updated_at = Utc::now();
    Ok(next_stage)
}

fn escalate_one_level(risk: RiskLevel) -> RiskLevel {
    match risk {
        RiskLevel::Low => RiskLevel::Medium,
        RiskLevel::Medium => RiskLevel::High,
        RiskLevel::High | RiskLevel::Critical => RiskLevel::Critical,
    }
}

/// `execute` (§4.7, §4.9, §4.11): dispatch the chosen action. Persists
/// `status = in_progress` before the external call (the two-phase record of
/// §4.9) so that a crash between dispatch and completion leaves a durable
/// trace for the runtime's startup resume pass to examine.
pub async fn execute(ctx: &HandlerContext<'_>, issue: &mut Issue) -> Result<Stage, EngineError> {
    let action_id = issue
        .action_id
        .ok_or_else(|| EngineError::State("execute reached with no chosen action".into()))?;
    let mut action = ctx
        .store
        .get_action(action_id)
        .await?
        .ok_or_else(|| EngineError::State(format!("unknown action {action_id}")))?;

    if matches!(action.status, ActionStatus::Pending | ActionStatus::PendingApproval) {
        action.transition_to(ActionStatus::InProgress).map_err(EngineError::State)?;
        ctx.store.update_action(&action).await?;
    }

    let breaker = ctx.breakers.get("executor");
    let outcome = if let Some(breaker) = breaker {
        ctx.executor
            .execute(&mut action, &issue.merchant, ctx.kv, ctx.limiter, &breaker)
            .await
    } else {
        return Err(EngineError::Dependency("no circuit breaker registered for executor".into()));
    };
    match &outcome {
        DispatchOutcome::RateLimited => {
            // The limiter denied the reservation before the client was ever
            // called, so the pre-dispatch `in_progress` persist above never
            // corresponded to real work in flight; settle the action so it
            // does not linger in `list_in_progress_actions` forever.
            action.error_message = Some("rate limited".into());
            action.transition_to(ActionStatus::Failed).map_err(EngineError::State)?;
            issue.resolution = Some(ResolutionKind::RateLimited);
            let step = StepBuilder::new(Stage::Execute, "Action suppressed by rate limiter", 1.0)
                .uncertain("rate limited")
                .build();
            remediation_explain::record_step(issue, step);
        }
        DispatchOutcome::BreakerOpen => {
            return Err(EngineError::Dependency("action executor circuit is open".into()));
        }
        DispatchOutcome::Executed(result) => {
            let step = StepBuilder::new(
                Stage::Execute,
                format!("Executed {:?}: success={}", action.action_type, result.success),
                if result.success { 1.0 } else { 0.3 },
            )
            .build();
            remediation_explain::record_step(issue, step);
        }
    }
    ctx.store.update_action(&action).await?;

    remediation_audit::append(
        ctx.store,
        issue.id,
        AuditEventType::ActionExecuted,
        Actor::System,
        JsonMap::new(),
        json_map([("action_status", serde_json::to_value(action.status).unwrap())]),
        JsonMap::new(),
    )
    .await?;

    issue.updated_at = Utc::now();
    Ok(Stage::Record)
}

/// `record` (§4.7, §4.12): append the full reasoning chain and outcome to
/// audit and transition to `complete`.
pub async fn record(ctx: &HandlerContext<'_>, issue: &mut Issue) -> Result<Stage, EngineError> {
    finalize(ctx, issue).await?;
    Ok(Stage::Complete)
}

/// Shared finalization used both by `record` and by the `wait_approval` ->
/// `complete` rejection edge, which bypasses `record` per the transition
/// table but still owes the issue one closing audit entry (§2: "every
/// observable transition yields one audit entry").
pub(crate) async fn finalize(ctx: &HandlerContext<'_>, issue: &mut Issue) -> Result<(), EngineError> {
    if issue.resolution.is_none() {
        let action_status = match issue.action_id {
            Some(action_id) => ctx.store.get_action(action_id).await?.map(|a| a.status),
            None => None,
        };
        issue.resolution = Some(match action_status {
            Some(ActionStatus::Rejected) => ResolutionKind::Rejected,
            _ => ResolutionKind::Resolved,
        });
    }

    let explanation = remediation_explain::build_explanation(issue);
    let content_address = remediation_explain::content_address(&explanation);

    remediation_audit::append(
        ctx.store,
        issue.id,
        AuditEventType::IssueRecorded,
        Actor::System,
        JsonMap::new(),
        json_map([
            ("resolution", serde_json::to_value(issue.resolution).unwrap()),
            ("explanation_hash", serde_json::json!(content_address)),
        ]),
        json_map([(
            "explanation",
            serde_json::to_value(&explanation).expect("Explanation always serializes"),
        )]),
    )
    .await?;

    let now = Utc::now();
    issue.stage = Stage::Complete;
    issue.resolved_at = Some(now);
    issue.updated_at = now;
    Ok(())
}

/// Resume an issue parked at `wait_approval` once an operator verdict has
/// arrived (§4.10). Approval advances to `execute`; rejection bypasses
/// `record` entirely per the transition table, going straight to
/// `complete` after the operator's feedback and the closing audit entry are
/// written.
pub async fn resume_after_approval(
    ctx: &HandlerContext<'_>,
    issue: &mut Issue,
    decision: &remediation_approval::Decision,
) -> Result<Stage, EngineError> {
    let action_id = issue
        .action_id
        .ok_or_else(|| EngineError::State("wait_approval reached with no chosen action".into()))?;
    let mut action = ctx
        .store
        .get_action(action_id)
        .await?
        .ok_or_else(|| EngineError::State(format!("unknown action {action_id}")))?;

    let feedback_record = json_map([
        ("operator", serde_json::json!(decision.operator)),
        ("verdict", serde_json::json!(format!("{:?}", decision.verdict))),
        ("feedback", serde_json::json!(decision.feedback)),
        ("decided_at", serde_json::json!(decision.decided_at.to_rfc3339())),
    ]);
    action
        .reasoning
        .insert("operator_feedback".to_string(), serde_json::Value::Object(
            feedback_record.into_iter().collect(),
        ));

    let next_stage = match decision.verdict {
        Verdict::Approve => {
            issue.approval_status = Some(remediation_types::ApprovalStatus::Approved);
            Stage::Execute
        }
        Verdict::Reject => {
            action.transition_to(ActionStatus::Rejected).map_err(EngineError::State)?;
            issue.approval_status = Some(remediation_types::ApprovalStatus::Rejected);
            issue.resolution = Some(ResolutionKind::Rejected);
            Stage::Complete
        }
    };
    ctx.store.update_action(&action).await?;

    remediation_audit::append(
        ctx.store,
        issue.id,
        AuditEventType::ApprovalDecided,
        Actor::Operator(decision.operator.clone()),
        JsonMap::new(),
        json_map([("verdict", serde_json::json!(format!("{:?}", decision.verdict)))]),
        JsonMap::new(),
    )
    .await?;

    if next_stage == Stage::Complete {
        finalize(ctx, issue).await?;
    } else {
        issue.updated_at = Utc::now();
    }
    Ok(next_stage)
}
