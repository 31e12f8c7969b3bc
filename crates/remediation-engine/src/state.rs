//! [`StageState`] – the versioned, tagged checkpoint encoding (§9, §3).
//!
//! Rather than checkpointing an open map, the in-memory state is a
//! discriminated record with one variant per lifecycle stage, each holding
//! exactly the fields meaningful once an issue has reached that point.
//! Encoding prefixes a version tag so that a checkpoint written by one
//! version of this crate can be rejected (rather than silently
//! misinterpreted) by a future version that changes the shape — decoding an
//! unknown tag is a hard [`StateCodecError`], never a silent fallback.

use remediation_types::{
    ActionId, ActionType, IssueId, MerchantKey, PatternId, ReasoningStep, RiskLevel,
    RootCauseCategory, SignalId, Stage,
};
use serde::{Deserialize, Serialize};

/// Fields meaningful to every stage: identity, accumulated signals/patterns,
/// counters, and the reasoning chain so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommonState {
    /// The issue this checkpoint belongs to.
    pub issue_id: IssueId,
    /// The merchant the issue concerns.
    pub merchant: MerchantKey,
    /// Every signal folded into the issue so far.
    pub signal_ids: Vec<SignalId>,
    /// Every pattern detected for the issue so far.
    pub pattern_ids: Vec<PatternId>,
    /// Consecutive handler failures observed.
    pub error_count: u64,
    /// Reasoning steps emitted so far, in stage order.
    pub reasoning_chain: Vec<ReasoningStep>,
}

/// The root-cause hypothesis accepted by `decide`, carried by every stage
/// from `Decide` onward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RootCauseSnapshot {
    /// The accepted category.
    pub category: RootCauseCategory,
    /// Confidence in `category`.
    pub confidence: f64,
    /// Free-text rationale.
    pub rationale: String,
}

/// The chosen action, carried by every stage from `AssessRisk` onward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChosenAction {
    /// The action record id.
    pub action_id: ActionId,
    /// The action type selected by `decide`.
    pub action_type: ActionType,
    /// The risk level assigned by `assess_risk`, once known.
    pub risk_level: Option<RiskLevel>,
}

/// The discriminated, per-stage checkpoint payload. Handlers are total
/// functions over this type: a handler for stage `S` only ever receives the
/// `S` variant and only ever produces the variant for a stage `S'` with
/// `transitions::is_allowed(S, S')`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StageState {
    /// Recording the incoming signal.
    Observe {
        /// Shared fields.
        common: CommonState,
    },
    /// Clustering signals into patterns.
    DetectPatterns {
        /// Shared fields.
        common: CommonState,
    },
    /// Awaiting/having consulted the analyzer.
    Analyze {
        /// Shared fields.
        common: CommonState,
    },
    /// Selecting a remediation action.
    Decide {
        /// Shared fields.
        common: CommonState,
        /// The accepted root-cause hypothesis.
        root_cause: RootCauseSnapshot,
    },
    /// Classifying the chosen action's risk.
    AssessRisk {
        /// Shared fields.
        common: CommonState,
        /// The accepted root-cause hypothesis.
        root_cause: RootCauseSnapshot,
        /// The action selected by `decide`, risk not yet assigned.
        action: ChosenAction,
    },
    /// Halted pending an operator verdict.
    WaitApproval {
        /// Shared fields.
        common: CommonState,
        /// The accepted root-cause hypothesis.
        root_cause: RootCauseSnapshot,
        /// The action awaiting a verdict.
        action: ChosenAction,
    },
    /// Dispatching the chosen action to the external executor.
    Execute {
        /// Shared fields.
        common: CommonState,
        /// The accepted root-cause hypothesis.
        root_cause: RootCauseSnapshot,
        /// The action being dispatched.
        action: ChosenAction,
    },
    /// Appending the reasoning chain and outcome to the audit log.
    Record {
        /// Shared fields.
        common: CommonState,
        /// The accepted root-cause hypothesis.
        root_cause: RootCauseSnapshot,
        /// The action that was dispatched (or rejected).
        action: ChosenAction,
    },
    /// Terminal: no further transitions.
    Complete {
        /// Shared fields.
        common: CommonState,
    },
}

impl StageState {
    /// The `Stage` this variant corresponds to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Observe { .. } => Stage::Observe,
            Self::DetectPatterns { .. } => Stage::DetectPatterns,
            Self::Analyze { .. } => Stage::Analyze,
            Self::Decide { .. } => Stage::Decide,
            Self::AssessRisk { .. } => Stage::AssessRisk,
            Self::WaitApproval { .. } => Stage::WaitApproval,
            Self::Execute { .. } => Stage::Execute,
            Self::Record { .. } => Stage::Record,
            Self::Complete { .. } => Stage::Complete,
        }
    }

    /// The fields common to every variant.
    pub fn common(&self) -> &CommonState {
        match self {
            Self::Observe { common }
            | Self::DetectPatterns { common }
            | Self::Analyze { common }
            | Self::Decide { common, .. }
            | Self::AssessRisk { common, .. }
            | Self::WaitApproval { common, .. }
            | Self::Execute { common, .. }
            | Self::Record { common, .. }
            | Self::Complete { common } => common,
        }
    }
}

/// The current encoding version. Bump this and add a migration path the day
/// a variant's shape changes incompatibly; never reuse a version number.
const CURRENT_VERSION: u16 = 1;

/// Errors raised while encoding or decoding a checkpoint blob.
#[derive(Debug, thiserror::Error)]
pub enum StateCodecError {
    /// The blob's version tag is newer or otherwise unrecognized by this
    /// build; decoding it without a migration would silently corrupt state.
    #[error("unknown checkpoint encoding version {0}; a migration is required")]
    UnknownVersion(u16),
    /// The blob was too short to contain a version tag.
    #[error("checkpoint blob is truncated")]
    Truncated,
    /// The payload failed to deserialize under its declared version.
    #[error("checkpoint payload decode error: {0}")]
    Payload(String),
}

/// Encode `state` into a versioned checkpoint blob suitable for
/// `DurableStore::save_checkpoint`.
pub fn encode(state: &StageState) -> Vec<u8> {
    let mut blob = CURRENT_VERSION.to_le_bytes().to_vec();
    let payload = bincode::serialize(state).expect("StageState always serializes");
    blob.extend(payload);
    blob
}

/// Decode a checkpoint blob previously produced by [`encode`]. Rejects any
/// version tag other than [`CURRENT_VERSION`] rather than guessing at a
/// compatible layout.
pub fn decode(blob: &[u8]) -> Result<StageState, StateCodecError> {
    if blob.len() < 2 {
        return Err(StateCodecError::Truncated);
    }
    let version = u16::from_le_bytes([blob[0], blob[1]]);
    if version != CURRENT_VERSION {
        return Err(StateCodecError::UnknownVersion(version));
    }
    bincode::deserialize(&blob[2..]).map_err(|e| StateCodecError::Payload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_common() -> CommonState {
        CommonState {
            issue_id: IssueId::new(),
            merchant: MerchantKey::from("m1"),
            signal_ids: vec![SignalId::new()],
            pattern_ids: vec![],
            error_count: 0,
            reasoning_chain: vec![ReasoningStep::simple(Stage::Observe, "observed", 1.0)],
        }
    }

    #[test]
    fn round_trip_is_byte_identical_across_encode_decode_encode() {
        let state = StageState::Observe {
            common: sample_common(),
        };
        let blob = encode(&state);
        let decoded = decode(&blob).unwrap();
        assert_eq!(decoded, state);
        let re_encoded = encode(&decoded);
        assert_eq!(blob, re_encoded);
    }

    #[test]
    fn unknown_version_is_rejected_not_misinterpreted() {
        let mut blob = encode(&StageState::Observe {
            common: sample_common(),
        });
        blob[0] = 0xff;
        blob[1] = 0xff;
        assert!(matches!(decode(&blob), Err(StateCodecError::UnknownVersion(_))));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        assert!(matches!(decode(&[0u8]), Err(StateCodecError::Truncated)));
    }

    #[test]
    fn stage_accessor_matches_variant() {
        let state = StageState::Decide {
            common: sample_common(),
            root_cause: RootCauseSnapshot {
                category: RootCauseCategory::ConfigError,
                confidence: 0.5,
                rationale: "x".into(),
            },
        };
        assert_eq!(state.stage(), Stage::Decide);
        let _ = Utc::now();
    }
}
