//! [`OrchestratorConfig`] – tunables for the main loop (§4.8, §4.14).
//!
//! These are the orchestrator's own knobs; the wider layered configuration
//! (defaults -> TOML file -> `REMEDIATION_*` env overrides) lives in
//! `remediation-runtime`, which builds one of these alongside
//! `remediation_engine::EngineThresholds` at startup.

/// Tunables governing how the main loop drains the bus and drives issues.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Maximum messages pulled from the bus in one `fetch` call.
    pub batch_max: usize,
    /// Maximum time, in milliseconds, `fetch` waits for at least one
    /// message before returning an empty batch.
    pub fetch_wait_ms: u64,
    /// Consecutive handler failures on one issue before it is abandoned
    /// with resolution `aborted` (§4.8).
    pub max_consecutive_failures: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_max: 64,
            fetch_wait_ms: 1_000,
            max_consecutive_failures: 5,
        }
    }
}
