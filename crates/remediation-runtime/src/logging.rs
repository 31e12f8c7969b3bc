//! Structured logging installer.
//!
//! Mirrors the orchestration service's own setup: an [`EnvFilter`] layered
//! under `tracing_subscriber::fmt`, defaulting to `info` when `level` fails
//! to parse and `RUST_LOG` is unset.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global [`tracing`] subscriber. Call once, as early as
/// possible in `main`, before [`crate::config::load`] so configuration
/// errors are themselves logged.
pub fn init(level: &str) -> Result<(), crate::error::RuntimeError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|err| crate::error::RuntimeError::Logging(err.to_string()))
}
