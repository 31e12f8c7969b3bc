//! [`HandlerContext`] – every collaborator a stage handler needs, built once
//! at startup and passed by reference (§9: "globals / singletons -> explicit
//! context"). No handler reaches a global or a singleton.

use remediation_analyzer::AnalyzerClient;
use remediation_approval::ApprovalCoordinator;
use remediation_breaker::BreakerRegistry;
use remediation_cache::FingerprintCache;
use remediation_executor::ActionExecutor;
use remediation_kv::SharedKv;
use remediation_rate_limiter::RateLimiter;
use remediation_store_core::DurableStore;

/// Thresholds governing `decide` and `assess_risk` policy (§4.7), loaded
/// from `RemediationConfig` at startup.
#[derive(Debug, Clone, Copy)]
pub struct EngineThresholds {
    /// Minimum analyzer confidence `decide` requires before trusting its
    /// top recommendation; below this, `decide` escalates instead.
    pub decide_confidence_threshold: f64,
    /// Below this confidence, `assess_risk` bumps the action's baseline
    /// risk up one level before deciding whether to gate on approval.
    pub risk_escalation_confidence_floor: f64,
    /// Minimum fingerprint hit count before `detect_patterns` promotes a
    /// candidate fingerprint to a persisted pattern.
    pub pattern_promotion_threshold: u64,
    /// How far back `detect_patterns` asks the durable store for matching
    /// patterns on a cache miss (§4.4, §4.7), in seconds.
    pub pattern_lookback_secs: i64,
}

impl Default for EngineThresholds {
    fn default() -> Self {
        Self {
            decide_confidence_threshold: 0.6,
            risk_escalation_confidence_floor: 0.5,
            pattern_promotion_threshold: 3,
            pattern_lookback_secs: 86_400,
        }
    }
}

/// Every external collaborator a stage handler may need, bundled so that
/// handler signatures stay stable as the set of dependencies grows.
pub struct HandlerContext<'a> {
    /// The durable store.
    pub store: &'a dyn DurableStore,
    /// The fingerprint cache.
    pub cache: &'a FingerprintCache,
    /// The shared KV backing the cache and rate limiter.
    pub kv: &'a dyn SharedKv,
    /// The external root-cause analyzer.
    pub analyzer: &'a dyn AnalyzerClient,
    /// The action executor, itself wrapping rate limiting and circuit
    /// breaking for the downstream dependency it calls.
    pub executor: &'a ActionExecutor,
    /// The merchant-scoped rate limiter.
    pub limiter: &'a RateLimiter,
    /// Process-local circuit breakers, keyed by dependency name
    /// (`"analyzer"`, `"executor"`).
    pub breakers: &'a BreakerRegistry,
    /// The approval coordinator.
    pub approvals: &'a ApprovalCoordinator,
    /// Policy thresholds.
    pub thresholds: EngineThresholds,
}
