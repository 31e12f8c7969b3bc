//! [`RuntimeContext`] – owns every collaborator the engine reaches through
//! [`remediation_engine::HandlerContext`], built once at startup from a
//! [`RemediationConfig`](crate::config::RemediationConfig).

use std::time::Duration;

use remediation_analyzer::{AnalyzerClient, StubAnalyzerClient};
use remediation_approval::ApprovalCoordinator;
use remediation_breaker::BreakerRegistry;
use remediation_cache::FingerprintCache;
use remediation_engine::{EngineThresholds, HandlerContext};
use remediation_executor::{ActionExecutor, StubActionExecutorClient};
use remediation_kv::{InMemoryKv, SharedKv};
use remediation_rate_limiter::RateLimiter;
use remediation_store_core::DurableStore;
use remediation_store_memory::MemoryStore;
use remediation_store_sqlite::SqliteStore;

use crate::config::{RemediationConfig, StorageBackend};
use crate::error::RuntimeError;

/// "analyzer" and "executor" are the two dependency breakers every handler
/// path trips through; registered by these names at bootstrap.
const ANALYZER_BREAKER: &str = "analyzer";
const EXECUTOR_BREAKER: &str = "executor";

/// Owns the durable store, shared KV, fingerprint cache, analyzer and
/// executor clients, rate limiter, breaker registry, and approval
/// coordinator — everything a [`HandlerContext`] borrows from.
pub struct RuntimeContext {
    /// Durable storage for issues, signals, patterns, actions, and audit.
    pub store: Box<dyn DurableStore>,
    /// Shared KV used for rate limiting, the cache's shared tier, and
    /// fingerprint counters.
    pub kv: Box<dyn SharedKv>,
    /// Two-tier fingerprint pattern cache.
    pub cache: FingerprintCache,
    /// Root-cause analyzer client.
    pub analyzer: Box<dyn AnalyzerClient>,
    /// Remediation action dispatcher.
    pub executor: ActionExecutor,
    /// Sliding-window rate limiter.
    pub limiter: RateLimiter,
    /// Named circuit breakers for external dependencies.
    pub breakers: BreakerRegistry,
    /// Operator approval coordinator.
    pub approvals: ApprovalCoordinator,
    /// Confidence/risk policy thresholds.
    pub thresholds: EngineThresholds,
}

impl RuntimeContext {
    /// Construct every collaborator from `config`. Opens the configured
    /// storage backend, which may perform I/O (e.g. creating a sqlite
    /// file).
    pub async fn bootstrap(config: &RemediationConfig) -> Result<Self, RuntimeError> {
        let store: Box<dyn DurableStore> = match &config.storage {
            StorageBackend::Memory => Box::new(MemoryStore::new()),
            StorageBackend::Sqlite { path } => Box::new(SqliteStore::open(path).await?),
        };

        let kv: Box<dyn SharedKv> = Box::new(InMemoryKv::new());

        let cache = FingerprintCache::new(
            Duration::from_secs(config.cache.local_ttl_secs),
            Duration::from_secs(config.cache.kv_ttl_secs),
        );

        let analyzer: Box<dyn AnalyzerClient> = Box::new(StubAnalyzerClient);
        let executor = ActionExecutor::new(StubActionExecutorClient);

        let limiter = RateLimiter::new(config.rate_limit.into());

        let mut breakers = BreakerRegistry::new();
        breakers.register(ANALYZER_BREAKER, config.breaker.into());
        breakers.register(EXECUTOR_BREAKER, config.breaker.into());

        let approvals = ApprovalCoordinator::new();

        Ok(Self {
            store,
            kv,
            cache,
            analyzer,
            executor,
            limiter,
            breakers,
            approvals,
            thresholds: config.thresholds.into(),
        })
    }

    /// Borrow every collaborator into a [`HandlerContext`] for one
    /// `remediation_engine::advance`/`resume` call.
    pub fn handler_ctx(&self) -> HandlerContext<'_> {
        HandlerContext {
            store: self.store.as_ref(),
            cache: &self.cache,
            kv: self.kv.as_ref(),
            analyzer: self.analyzer.as_ref(),
            executor: &self.executor,
            limiter: &self.limiter,
            breakers: &self.breakers,
            approvals: &self.approvals,
            thresholds: self.thresholds,
        }
    }
}
