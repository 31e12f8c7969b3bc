//! [`RemediationConfig`] – layered runtime configuration (§4.14).
//!
//! Assembled in three layers, lowest priority first: each field's own
//! [`Default`] impl, an optional TOML file, and `REMEDIATION_*` environment
//! variables (double underscore as the nesting separator, e.g.
//! `REMEDIATION_RATE_LIMIT__LIMIT`). Validation runs once, synchronously, at
//! the end of [`load`]; an invalid configuration is a startup error, never a
//! silently-ignored default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Storage backend selection (§4.14, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process-local, non-durable store. Fine for the demo binary and
    /// tests; a restart loses every issue.
    Memory,
    /// SQLite-backed durable store at `path`.
    Sqlite {
        /// Database file path, created if missing.
        path: String,
    },
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::Memory
    }
}

/// Mirrors [`remediation_orchestrator::OrchestratorConfig`] as a
/// serializable settings section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Maximum messages pulled from the bus per `fetch` call.
    pub batch_max: usize,
    /// Maximum milliseconds `fetch` waits for at least one message.
    pub fetch_wait_ms: u64,
    /// Consecutive handler failures on one issue before it is abandoned.
    pub max_consecutive_failures: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let defaults = remediation_orchestrator::OrchestratorConfig::default();
        Self {
            batch_max: defaults.batch_max,
            fetch_wait_ms: defaults.fetch_wait_ms,
            max_consecutive_failures: defaults.max_consecutive_failures,
        }
    }
}

impl From<OrchestratorSettings> for remediation_orchestrator::OrchestratorConfig {
    fn from(s: OrchestratorSettings) -> Self {
        Self {
            batch_max: s.batch_max,
            fetch_wait_ms: s.fetch_wait_ms,
            max_consecutive_failures: s.max_consecutive_failures,
        }
    }
}

/// Default rate limit applied uniformly to every `(merchant, action_type)`
/// pair (§4.5). The bundled core does not differentiate by action type; a
/// deployment needing that would extend this to a map keyed by
/// [`remediation_types::ActionType`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Maximum reservations allowed within one window.
    pub limit: u64,
    /// Width of the sliding window, in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            limit: 10,
            window_secs: 60,
        }
    }
}

impl From<RateLimitSettings> for remediation_rate_limiter::WindowLimit {
    fn from(s: RateLimitSettings) -> Self {
        Self::new(s.limit, Duration::from_secs(s.window_secs))
    }
}

/// Circuit breaker tunables, applied to every registered dependency breaker
/// (`"analyzer"`, `"executor"`) (§4.6). A deployment wanting per-dependency
/// tunables would extend this to a map keyed by breaker name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures before tripping to open.
    pub failure_threshold: u32,
    /// Seconds an open breaker waits before admitting a probe.
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
        }
    }
}

impl From<BreakerSettings> for remediation_breaker::BreakerConfig {
    fn from(s: BreakerSettings) -> Self {
        Self {
            failure_threshold: s.failure_threshold,
            recovery_timeout: Duration::from_secs(s.recovery_timeout_secs),
        }
    }
}

/// Mirrors [`remediation_engine::EngineThresholds`] as a serializable
/// settings section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSettings {
    /// Minimum analyzer confidence `decide` trusts before escalating.
    pub decide_confidence_threshold: f64,
    /// Confidence floor below which `assess_risk` escalates risk one level.
    pub risk_escalation_confidence_floor: f64,
    /// Minimum fingerprint hit count before promoting a pattern.
    pub pattern_promotion_threshold: u64,
    /// How far back to ask the durable store for matching patterns on a
    /// cache miss, in seconds.
    pub pattern_lookback_secs: i64,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        let defaults = remediation_engine::EngineThresholds::default();
        Self {
            decide_confidence_threshold: defaults.decide_confidence_threshold,
            risk_escalation_confidence_floor: defaults.risk_escalation_confidence_floor,
            pattern_promotion_threshold: defaults.pattern_promotion_threshold,
            pattern_lookback_secs: defaults.pattern_lookback_secs,
        }
    }
}

impl From<ThresholdSettings> for remediation_engine::EngineThresholds {
    fn from(s: ThresholdSettings) -> Self {
        Self {
            decide_confidence_threshold: s.decide_confidence_threshold,
            risk_escalation_confidence_floor: s.risk_escalation_confidence_floor,
            pattern_promotion_threshold: s.pattern_promotion_threshold,
            pattern_lookback_secs: s.pattern_lookback_secs,
        }
    }
}

/// Fingerprint cache TTLs (§4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Process-local tier TTL, in seconds.
    pub local_ttl_secs: u64,
    /// Shared-KV tier TTL, in seconds.
    pub kv_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            local_ttl_secs: 300,
            kv_ttl_secs: 3600,
        }
    }
}

/// The full layered configuration (§4.14): defaults, then an optional TOML
/// file, then `REMEDIATION_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Durable storage backend.
    pub storage: StorageBackend,
    /// Main loop tunables.
    pub orchestrator: OrchestratorSettings,
    /// Rate limit applied to every `(merchant, action_type)` pair.
    pub rate_limit: RateLimitSettings,
    /// Circuit breaker tunables, shared by every registered dependency.
    pub breaker: BreakerSettings,
    /// Confidence/risk policy thresholds.
    pub thresholds: ThresholdSettings,
    /// Fingerprint cache TTLs.
    pub cache: CacheSettings,
    /// Worker pool size; `None` resolves to CPU cores x 2 at bootstrap
    /// time (§5).
    pub worker_pool_size: Option<usize>,
    /// Milliseconds a shutdown waits for in-flight handlers to persist
    /// their current stage before the process exits (§5).
    pub shutdown_drain_ms: u64,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::default(),
            orchestrator: OrchestratorSettings::default(),
            rate_limit: RateLimitSettings::default(),
            breaker: BreakerSettings::default(),
            thresholds: ThresholdSettings::default(),
            cache: CacheSettings::default(),
            worker_pool_size: None,
            shutdown_drain_ms: 5_000,
        }
    }
}

/// Errors raised while loading or validating [`RemediationConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The `config` crate failed to parse or merge a source.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    /// A loaded configuration violated a cross-field invariant.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl RemediationConfig {
    /// Validate cross-field invariants not expressible in the type system.
    /// Runs once at startup; a failure here is a synchronous error, never a
    /// silent fallback to a default (§4.14).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let StorageBackend::Sqlite { path } = &self.storage {
            if path.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "storage.path must not be empty for the sqlite backend".into(),
                ));
            }
        }
        if self.orchestrator.batch_max == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.batch_max must be >= 1".into(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_secs must be >= 1".into(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be >= 1".into(),
            ));
        }
        for (name, value) in [
            (
                "thresholds.decide_confidence_threshold",
                self.thresholds.decide_confidence_threshold,
            ),
            (
                "thresholds.risk_escalation_confidence_floor",
                self.thresholds.risk_escalation_confidence_floor,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.worker_pool_size == Some(0) {
            return Err(ConfigError::Invalid(
                "worker_pool_size must be >= 1 when set".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the worker pool size: the configured value, or CPU cores x 2
    /// (§5) when unset.
    pub fn resolved_worker_pool_size(&self) -> usize {
        self.worker_pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                * 2
        })
    }
}

/// Load a [`RemediationConfig`] from defaults, an optional TOML file at
/// `file_path`, and `REMEDIATION_*` environment overrides, then validate
/// the result.
pub fn load(file_path: Option<&str>) -> Result<RemediationConfig, ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = file_path {
        builder = builder.add_source(config::File::with_name(path).required(false));
    }
    let built = builder
        .add_source(config::Environment::with_prefix("REMEDIATION").separator("__"))
        .build()?;
    let cfg: RemediationConfig = built.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        assert!(RemediationConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_sqlite_path_is_rejected() {
        let mut cfg = RemediationConfig::default();
        cfg.storage = StorageBackend::Sqlite { path: "  ".into() };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut cfg = RemediationConfig::default();
        cfg.thresholds.decide_confidence_threshold = 1.5;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn resolved_worker_pool_size_defaults_to_cpu_cores_times_two() {
        let cfg = RemediationConfig::default();
        let expected = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) * 2;
        assert_eq!(cfg.resolved_worker_pool_size(), expected);
    }

    #[test]
    fn explicit_worker_pool_size_is_honored() {
        let mut cfg = RemediationConfig::default();
        cfg.worker_pool_size = Some(3);
        assert_eq!(cfg.resolved_worker_pool_size(), 3);
    }

    #[test]
    fn env_override_takes_effect() {
        std::env::set_var("REMEDIATION_RATE_LIMIT__LIMIT", "42");
        let cfg = load(None).unwrap();
        std::env::remove_var("REMEDIATION_RATE_LIMIT__LIMIT");
        assert_eq!(cfg.rate_limit.limit, 42);
    }
}
