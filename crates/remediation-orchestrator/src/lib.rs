#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **remediation-orchestrator** – Main event loop (§4.8).
//!
//! Ties the engine ([`remediation_engine::advance`]/`resume`), the signal
//! bus, and the approval coordinator together into one [`Orchestrator`]
//! that a runtime builds once per worker and drives in a loop:
//! `run_once().await` until told to stop. `remediation-runtime` owns
//! startup (rehydrating the issue index, installing logging, loading
//! config) and the worker pool that runs several orchestrators
//! concurrently, one per issue-keyed partition.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod issue_key;
pub mod orchestrator;

pub use config::OrchestratorConfig;
pub use error::RemediationError;
pub use issue_key::IssueKey;
pub use orchestrator::Orchestrator;
