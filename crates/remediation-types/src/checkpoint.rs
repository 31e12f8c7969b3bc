//! The [`CheckpointRecord`] entity — the persisted resume point for one issue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CheckpointId, IssueId, Stage};

/// One checkpoint per issue (unique), sufficient to resume the issue's
/// in-memory handle after a process restart.
///
/// The `state_blob` is opaque at this layer — it is the versioned, tagged
/// encoding produced by `remediation-engine::StageState` — so that this
/// crate does not need to depend on the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Unique identifier for this checkpoint row.
    pub id: CheckpointId,
    /// The issue this checkpoint resumes.
    pub issue_id: IssueId,
    /// The stage the issue was at when this checkpoint was written.
    pub stage: Stage,
    /// Versioned, tagged serialization of the issue's in-memory state.
    pub state_blob: Vec<u8>,
    /// The checkpoint this one superseded, if any.
    pub parent_checkpoint_id: Option<CheckpointId>,
    /// Consecutive handler failures observed for this issue.
    pub error_count: u64,
    /// The most recent handler error message, if any.
    pub last_error: Option<String>,
    /// When this checkpoint row was first created.
    pub created_at: DateTime<Utc>,
    /// When this checkpoint row was last overwritten.
    pub updated_at: DateTime<Utc>,
}
