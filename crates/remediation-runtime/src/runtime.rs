//! [`Runtime`] – bootstraps [`RuntimeContext`], drives the worker pool, and
//! exposes the query/approval surface (§6) external callers use to submit
//! signals, inspect issues, and resolve approvals.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use remediation_approval::{Decision, PendingApproval, PendingFilter, Verdict};
use remediation_audit::AuditError;
use remediation_bus_core::{InMemoryBus, SignalBus};
use remediation_orchestrator::{Orchestrator, OrchestratorConfig, RemediationError};
use remediation_store_core::IssueFilter;
use remediation_types::{AuditEntryId, Issue, IssueId, Signal};

use crate::config::RemediationConfig;
use crate::context::RuntimeContext;
use crate::error::RuntimeError;

/// Result shape for [`Runtime::verify_chain`] (§6): whether the issue's
/// audit chain still hashes together, and if not, the first entry at which
/// it broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    /// `true` if every entry's `previous_hash` matches its predecessor's
    /// self-hash all the way back to genesis.
    pub ok: bool,
    /// The first entry where verification failed, if any.
    pub first_bad_entry: Option<AuditEntryId>,
}

/// Owns every collaborator and the bundled reference bus, and drives the
/// main loop.
///
/// The orchestrator crate's own doc comment describes one `Orchestrator`
/// per worker, partitioned so no two workers ever drive the same issue. The
/// bundled [`InMemoryBus`] has no partition-aware consumption API — `fetch`
/// round-robins across every merchant partition with no way to scope a
/// worker to a subset — so partitioning dispatch across independently
/// indexed `Orchestrator`s here would let two workers open duplicate issues
/// for the same key. This runtime instead shares one `Orchestrator` (one
/// issue-key index) across `worker_pool_size` concurrently polling loops;
/// the worker count still bounds fan-out against the store and downstream
/// dependencies, it just doesn't get independent per-worker indices. A
/// deployment wiring in a partition-aware broker adapter should give each
/// worker its own `Orchestrator` instead.
pub struct Runtime {
    ctx: RuntimeContext,
    bus: Arc<InMemoryBus>,
    orchestrator_config: OrchestratorConfig,
    worker_pool_size: usize,
    shutdown_drain: Duration,
}

impl Runtime {
    /// Construct every collaborator and the bundled bus from `config`.
    /// Does not start the bus or the worker pool; call [`Runtime::run`] for
    /// that.
    pub async fn bootstrap(config: RemediationConfig) -> Result<Self, RuntimeError> {
        let worker_pool_size = config.resolved_worker_pool_size();
        let orchestrator_config = config.orchestrator.into();
        let shutdown_drain = Duration::from_millis(config.shutdown_drain_ms);
        let ctx = RuntimeContext::bootstrap(&config).await?;
        Ok(Self {
            ctx,
            bus: Arc::new(InMemoryBus::new()),
            orchestrator_config,
            worker_pool_size,
            shutdown_drain,
        })
    }

    /// Publish a signal onto the bundled bus. The producer-side entry point
    /// external callers use to feed the pipeline (§4.1); persistence and
    /// issue routing happen inside the worker loop, not here.
    pub fn submit_signal(&self, signal: Signal) {
        self.bus.push(signal);
    }

    /// Resolve a pending approval (§4.10).
    pub async fn decide(
        &self,
        action_id: remediation_types::ActionId,
        operator: impl Into<String>,
        verdict: Verdict,
        feedback: Option<String>,
    ) -> Result<Decision, RuntimeError> {
        self.ctx
            .approvals
            .decide(action_id, operator, verdict, feedback)
            .await
            .map_err(|err| RuntimeError::Remediation(RemediationError::from(err)))
    }

    /// List approvals awaiting an operator verdict, optionally scoped to
    /// one issue.
    pub async fn list_pending_approvals(&self, filter: &PendingFilter) -> Vec<PendingApproval> {
        self.ctx.approvals.pending(filter).await
    }

    /// Fetch one issue by id, or `None` if it does not exist.
    pub async fn get_issue(&self, id: IssueId) -> Result<Option<Issue>, RuntimeError> {
        self.ctx.store.get_issue(id).await.map_err(RuntimeError::from)
    }

    /// List issues matching `filter`.
    pub async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>, RuntimeError> {
        self.ctx
            .store
            .list_issues(filter)
            .await
            .map_err(RuntimeError::from)
    }

    /// Verify the hash chain of one issue's audit log (§6), translating
    /// [`remediation_audit::verify_chain`]'s `Result` into the `{ok,
    /// first_bad_entry}` shape external callers expect.
    pub async fn verify_chain(&self, issue_id: IssueId) -> Result<ChainVerification, RuntimeError> {
        match remediation_audit::verify_chain(self.ctx.store.as_ref(), issue_id).await {
            Ok(()) => Ok(ChainVerification {
                ok: true,
                first_bad_entry: None,
            }),
            Err(AuditError::ChainBroken { entry_id, .. }) => Ok(ChainVerification {
                ok: false,
                first_bad_entry: Some(entry_id),
            }),
            Err(AuditError::Store(err)) => Err(err.into()),
        }
    }

    /// Number of signals queued on the bundled bus but not yet fetched by a
    /// worker.
    pub fn pending_count(&self) -> usize {
        self.bus.pending_count()
    }

    /// Run orchestrator iterations against whatever is currently queued on
    /// the bus until it drains, without starting the long-running worker
    /// pool. Used by one-shot CLI commands that submit a signal and want to
    /// see its immediate effect before the process exits. Returns the
    /// total number of messages processed.
    pub async fn drain_once(&self) -> Result<usize, RuntimeError> {
        self.bus.start().await?;
        let handler_ctx = self.ctx.handler_ctx();
        let orchestrator = Orchestrator::new(handler_ctx, self.bus.as_ref(), self.orchestrator_config);
        orchestrator.rehydrate_index().await?;
        orchestrator.resume_in_progress_actions().await?;

        let mut processed = 0;
        loop {
            let n = orchestrator.run_once().await?;
            processed += n;
            if n == 0 || self.bus.pending_count() == 0 {
                break;
            }
        }
        self.bus.stop().await?;
        Ok(processed)
    }

    /// Start the bus, rehydrate the issue index from the store, then drive
    /// `worker_pool_size` concurrent polling loops until `shutdown`
    /// resolves. On shutdown, waits up to the configured drain window
    /// before returning so in-flight handlers get a chance to persist
    /// their checkpoint (§5).
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), RuntimeError> {
        self.bus.start().await?;

        let handler_ctx = self.ctx.handler_ctx();
        let orchestrator = Orchestrator::new(handler_ctx, self.bus.as_ref(), self.orchestrator_config);
        let rehydrated = orchestrator.rehydrate_index().await?;
        orchestrator.resume_in_progress_actions().await?;
        tracing::info!(
            rehydrated,
            workers = self.worker_pool_size,
            "remediation runtime started"
        );

        let orchestrator_ref = &orchestrator;
        let workers = (0..self.worker_pool_size).map(|worker_id| async move {
            loop {
                if let Err(err) = orchestrator_ref.run_once().await {
                    tracing::error!(worker_id, error = %err, "worker iteration failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        });

        tokio::select! {
            _ = futures::future::join_all(workers) => {}
            () = shutdown => {
                tracing::info!(drain_ms = self.shutdown_drain.as_millis() as u64, "shutdown requested, draining in-flight work");
                tokio::time::sleep(self.shutdown_drain).await;
            }
        }

        self.bus.stop().await?;
        Ok(())
    }
}
