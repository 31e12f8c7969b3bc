//! [`Orchestrator`] – the main event loop (§4.8).
//!
//! Drains a bounded batch from the signal bus, routes each message to the
//! issue it belongs to, drives the issue through the engine until it blocks
//! or finishes, polls the approval coordinator for gated issues whose
//! verdicts have arrived, and commits the bus batch. One `Orchestrator`
//! instance corresponds to one logical worker; `remediation-runtime` is
//! responsible for spinning up however many of these a deployment needs and
//! for keying dispatch so that no two workers ever drive the same issue
//! concurrently.

use dashmap::DashMap;
use remediation_approval::Decision;
use remediation_bus_core::SignalBus;
use remediation_engine::{AdvanceOutcome, EngineError, HandlerContext};
use remediation_store_core::IssueFilter;
use remediation_types::{
    Actor, AuditEventType, Issue, IssueId, JsonMap, ResolutionKind, Signal, Stage,
};

use crate::checkpoint::build_checkpoint_state;
use crate::config::OrchestratorConfig;
use crate::error::RemediationError;
use crate::issue_key::IssueKey;

fn json_map(pairs: impl IntoIterator<Item = (&'static str, serde_json::Value)>) -> JsonMap {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Drains the bus, routes signals to issues, and drives the engine.
pub struct Orchestrator<'a> {
    ctx: HandlerContext<'a>,
    bus: &'a dyn SignalBus,
    config: OrchestratorConfig,
    index: DashMap<IssueKey, IssueId>,
}

impl<'a> Orchestrator<'a> {
    /// Build an orchestrator over an empty in-memory index. Call
    /// [`Orchestrator::rehydrate_index`] after construction when resuming
    /// from a prior run.
    pub fn new(ctx: HandlerContext<'a>, bus: &'a dyn SignalBus, config: OrchestratorConfig) -> Self {
        Self {
            ctx,
            bus,
            config,
            index: DashMap::new(),
        }
    }

    /// Repopulate the in-memory issue-key index from every non-terminal
    /// issue in the store (§4.9 startup resume). Must run once before the
    /// first `run_once` call in a freshly started process; a cold index
    /// would otherwise open a duplicate issue for the next signal belonging
    /// to an issue that was already in flight when the process last
    /// stopped.
    pub async fn rehydrate_index(&self) -> Result<usize, RemediationError> {
        let issue_ids = self.ctx.store.load_active_issues().await?;
        let mut rehydrated = 0;
        for issue_id in issue_ids {
            let Some(issue) = self.ctx.store.get_issue(issue_id).await? else {
                continue;
            };
            let signals = self.ctx.store.list_signals_for_issue(issue_id).await?;
            let Some(first_signal) = signals.first() else {
                continue;
            };
            let key = IssueKey {
                merchant: issue.merchant.clone(),
                source: first_signal.source,
            };
            self.index.insert(key, issue.id);
            rehydrated += 1;
        }
        tracing::info!(count = rehydrated, "rehydrated in-flight issue index");
        Ok(rehydrated)
    }

    /// Re-examine every action a prior process left `status = in_progress`
    /// (§4.9 two-phase record, §8 scenario 4: "crash between persisting
    /// action status=`in_progress` and executor return"). Must run once at
    /// startup after [`Orchestrator::rehydrate_index`].
    ///
    /// Each such action belongs to an issue parked at `execute`; re-driving
    /// that issue re-enters the `execute` handler, which finds the action
    /// already `in_progress` and re-invokes the action executor client
    /// rather than re-transitioning it — relying on the client's
    /// idempotent-by-action-id contract (§6) to either observe the prior
    /// call's result or safely repeat it. The handler settles the action to
    /// `completed`, `failed`, or `rolled_back` and the issue proceeds to
    /// `record` exactly as it would have without the crash.
    pub async fn resume_in_progress_actions(&self) -> Result<usize, RemediationError> {
        let actions = self.ctx.store.list_in_progress_actions().await?;
        let mut resumed = 0;
        for action in actions {
            let Some(mut issue) = self.ctx.store.get_issue(action.issue_id).await? else {
                tracing::warn!(action_id = %action.id, "in_progress action has no owning issue, skipping");
                continue;
            };
            if issue.stage != Stage::Execute {
                continue;
            }
            tracing::warn!(
                action_id = %action.id,
                issue_id = %issue.id,
                "resuming action left in_progress by a prior crash"
            );
            self.drive(&mut issue, None).await?;
            resumed += 1;
        }
        if resumed > 0 {
            tracing::info!(count = resumed, "resumed in-flight actions after restart");
        }
        Ok(resumed)
    }

    /// Run one iteration of the main loop: fetch a batch, process every
    /// message, poll the approval gate, and commit. Returns the number of
    /// messages successfully folded into an issue.
    pub async fn run_once(&self) -> Result<usize, RemediationError> {
        let batch = self
            .bus
            .fetch(self.config.batch_max, self.config.fetch_wait_ms)
            .await?;

        if batch.is_empty() {
            self.poll_approvals().await?;
            return Ok(0);
        }

        let mut processed = 0;
        for message in &batch {
            match self.process_message(&message.signal).await {
                Ok(()) => processed += 1,
                Err(err) => {
                    tracing::error!(
                        signal_id = %message.signal.id,
                        merchant = %message.signal.merchant,
                        error = %err,
                        "failed to process signal"
                    );
                }
            }
        }
        self.bus.commit().await?;
        self.poll_approvals().await?;
        Ok(processed)
    }

    async fn process_message(&self, signal: &Signal) -> Result<(), RemediationError> {
        let key = IssueKey::from_signal(signal);
        let mut issue = self.fetch_or_create_issue(&key).await?;

        // An issue gated on approval, or one already frozen/aborted, only
        // absorbs the new signal; it is never driven further here.
        if issue.stage == Stage::WaitApproval || issue.resolution.is_some() {
            if issue.append_signal(signal.id) {
                self.ctx.store.insert_signal(signal).await?;
                self.ctx.store.update_issue(&issue).await?;
            }
            return Ok(());
        }

        self.drive(&mut issue, Some(signal)).await
    }

    async fn fetch_or_create_issue(&self, key: &IssueKey) -> Result<Issue, RemediationError> {
        if let Some(issue_id) = self.index.get(key).map(|entry| *entry) {
            if let Some(issue) = self.ctx.store.get_issue(issue_id).await? {
                if !issue.stage.is_terminal() {
                    return Ok(issue);
                }
            }
        }

        let issue = Issue::new(key.merchant.clone());
        self.ctx.store.create_issue(&issue).await?;
        self.index.insert(key.clone(), issue.id);
        tracing::debug!(issue_id = %issue.id, merchant = %issue.merchant, "opened new issue");
        Ok(issue)
    }

    /// Drive `issue` one stage at a time until it blocks, finishes, or a
    /// handler errors. `pending_signal` is consumed only while the issue is
    /// at `observe` or `detect_patterns`, matching the engine's contract.
    async fn drive(
        &self,
        issue: &mut Issue,
        mut pending_signal: Option<&Signal>,
    ) -> Result<(), RemediationError> {
        loop {
            let stage = issue.stage;
            let signal_arg = if matches!(stage, Stage::Observe | Stage::DetectPatterns) {
                pending_signal
            } else {
                None
            };
            let signals = if stage == Stage::Analyze {
                self.ctx.store.list_signals_for_issue(issue.id).await?
            } else {
                Vec::new()
            };

            match remediation_engine::advance(&self.ctx, issue, signal_arg, &signals).await {
                Ok(outcome) => {
                    self.persist_after_advance(issue).await?;
                    pending_signal = None;
                    match outcome {
                        AdvanceOutcome::Advanced(_) => continue,
                        AdvanceOutcome::Blocked | AdvanceOutcome::Finished => return Ok(()),
                    }
                }
                Err(err) => {
                    self.record_handler_failure(issue, err).await?;
                    return Ok(());
                }
            }
        }
    }

    async fn persist_after_advance(&self, issue: &mut Issue) -> Result<(), RemediationError> {
        self.ctx.store.update_issue(issue).await?;
        let state = build_checkpoint_state(issue)?;
        let blob = remediation_engine::state::encode(&state);
        self.ctx
            .store
            .save_checkpoint(issue.id, issue.stage, blob)
            .await?;
        Ok(())
    }

    /// Record a handler failure, then either abandon the issue (after too
    /// many consecutive failures) or freeze it in place (on an integrity
    /// error, which is never retried - §7).
    async fn record_handler_failure(
        &self,
        issue: &mut Issue,
        err: EngineError,
    ) -> Result<(), RemediationError> {
        issue.last_error = Some(err.to_string());
        issue.updated_at = chrono::Utc::now();

        let event_type = match err {
            EngineError::Integrity(_) => AuditEventType::IntegrityViolation,
            _ => AuditEventType::StageError,
        };
        remediation_audit::append(
            self.ctx.store,
            issue.id,
            event_type,
            Actor::System,
            JsonMap::new(),
            json_map([
                ("error", serde_json::json!(err.to_string())),
                ("stage", serde_json::json!(issue.stage.to_string())),
            ]),
            JsonMap::new(),
        )
        .await?;

        match err {
            EngineError::Integrity(_) => {
                issue.resolution = Some(ResolutionKind::IntegrityFrozen);
                self.ctx.store.update_issue(issue).await?;
                tracing::error!(issue_id = %issue.id, "froze issue after integrity violation");
            }
            _ => {
                issue.counters.errors += 1;
                if issue.counters.errors >= self.config.max_consecutive_failures {
                    self.abort_issue(issue).await?;
                } else {
                    self.ctx.store.update_issue(issue).await?;
                }
            }
        }
        Ok(())
    }

    async fn abort_issue(&self, issue: &mut Issue) -> Result<(), RemediationError> {
        issue.resolution = Some(ResolutionKind::Aborted);
        let now = chrono::Utc::now();
        issue.stage = Stage::Complete;
        issue.resolved_at = Some(now);
        issue.updated_at = now;

        remediation_audit::append(
            self.ctx.store,
            issue.id,
            AuditEventType::IssueRecorded,
            Actor::System,
            JsonMap::new(),
            json_map([("resolution", serde_json::json!(ResolutionKind::Aborted))]),
            JsonMap::new(),
        )
        .await?;

        tracing::warn!(
            issue_id = %issue.id,
            errors = issue.counters.errors,
            "abandoned issue after too many consecutive handler failures"
        );
        self.persist_after_advance(issue).await
    }

    /// Resume every issue parked at `wait_approval` whose verdict has
    /// arrived since it was last polled.
    async fn poll_approvals(&self) -> Result<(), RemediationError> {
        let gated = self
            .ctx
            .store
            .list_issues(&IssueFilter {
                stage: Some(Stage::WaitApproval),
                ..Default::default()
            })
            .await?;

        for mut issue in gated {
            let Some(action_id) = issue.action_id else {
                continue;
            };
            let decisions = self.ctx.approvals.decisions_for(issue.id).await;
            let Some(decision) = decisions.into_iter().rev().find(|d| d.action_id == action_id)
            else {
                continue;
            };
            self.resume_gated_issue(&mut issue, &decision).await?;
        }
        Ok(())
    }

    async fn resume_gated_issue(
        &self,
        issue: &mut Issue,
        decision: &Decision,
    ) -> Result<(), RemediationError> {
        match remediation_engine::resume(&self.ctx, issue, decision).await {
            Ok(outcome) => {
                self.persist_after_advance(issue).await?;
                match outcome {
                    AdvanceOutcome::Advanced(_) => self.drive(issue, None).await,
                    AdvanceOutcome::Blocked | AdvanceOutcome::Finished => Ok(()),
                }
            }
            Err(err) => self.record_handler_failure(issue, err).await,
        }
    }
}
