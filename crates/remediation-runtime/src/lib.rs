#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-runtime** – Startup and worker pool for the remediation
//! core (§4.8, §4.14).
//!
//! Owns everything the other crates assume is handed to them rather than
//! reached for globally: installing logging, loading the layered
//! configuration, opening the durable store, wiring every protective-layer
//! collaborator into one [`context::RuntimeContext`], and driving the
//! worker pool that polls the signal bus and advances issues through the
//! engine. Also exposes the query/approval surface (§6) a CLI or any other
//! front end calls into — submitting signals, listing and inspecting
//! issues, resolving approvals, and verifying an issue's audit chain.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::RemediationConfig;
pub use context::RuntimeContext;
pub use error::RuntimeError;
pub use runtime::{ChainVerification, Runtime};
