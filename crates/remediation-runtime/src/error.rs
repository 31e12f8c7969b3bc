//! Top-level error type for the runtime crate.

/// Errors raised while loading configuration, bootstrapping collaborators,
/// or driving the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    /// The logging subscriber could not be installed.
    #[error("failed to install logging subscriber: {0}")]
    Logging(String),
    /// A durable store backend failed to open.
    #[error(transparent)]
    Store(#[from] remediation_store_core::StoreError),
    /// The signal bus failed to start or stop.
    #[error(transparent)]
    Bus(#[from] remediation_bus_core::BusError),
    /// An orchestrator iteration or query surface call failed.
    #[error(transparent)]
    Remediation(#[from] remediation_orchestrator::RemediationError),
}
