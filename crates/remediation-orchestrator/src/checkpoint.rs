//! Maps an [`Issue`] onto the engine's discriminated [`StageState`] so the
//! orchestrator can write a checkpoint after every stage transition (§4.9).

use remediation_engine::{ChosenAction, CommonState, EngineError, RootCauseSnapshot, StageState};
use remediation_types::{Issue, Stage};

/// Build the checkpoint payload for `issue`'s current stage.
///
/// Stages from `decide` onward require fields (`root_cause_category`,
/// `action_id`, ...) that the corresponding handler is responsible for
/// populating before returning; a missing field at this point means the
/// issue row and its stage have drifted apart, which is an integrity
/// failure rather than something to paper over with a default.
pub fn build_checkpoint_state(issue: &Issue) -> Result<StageState, EngineError> {
    let common = CommonState {
        issue_id: issue.id,
        merchant: issue.merchant.clone(),
        signal_ids: issue.signal_ids.clone(),
        pattern_ids: issue.pattern_ids.clone(),
        error_count: issue.counters.errors,
        reasoning_chain: issue.reasoning_chain.clone(),
    };

    let root_cause = |issue: &Issue| -> Result<RootCauseSnapshot, EngineError> {
        Ok(RootCauseSnapshot {
            category: issue.root_cause_category.ok_or_else(|| {
                EngineError::Integrity(format!(
                    "issue {} missing root_cause_category at stage {}",
                    issue.id, issue.stage
                ))
            })?,
            confidence: issue.root_cause_confidence.ok_or_else(|| {
                EngineError::Integrity(format!(
                    "issue {} missing root_cause_confidence at stage {}",
                    issue.id, issue.stage
                ))
            })?,
            rationale: issue.root_cause_rationale.clone().unwrap_or_default(),
        })
    };

    let action = |issue: &Issue| -> Result<ChosenAction, EngineError> {
        Ok(ChosenAction {
            action_id: issue.action_id.ok_or_else(|| {
                EngineError::Integrity(format!(
                    "issue {} missing action_id at stage {}",
                    issue.id, issue.stage
                ))
            })?,
            action_type: issue.chosen_action_type.ok_or_else(|| {
                EngineError::Integrity(format!(
                    "issue {} missing chosen_action_type at stage {}",
                    issue.id, issue.stage
                ))
            })?,
            risk_level: issue.risk_level,
        })
    };

    Ok(match issue.stage {
        Stage::Observe => StageState::Observe { common },
        Stage::DetectPatterns => StageState::DetectPatterns { common },
        Stage::Analyze => StageState::Analyze { common },
        Stage::Decide => StageState::Decide {
            common,
            root_cause: root_cause(issue)?,
        },
        Stage::AssessRisk => StageState::AssessRisk {
            common,
            root_cause: root_cause(issue)?,
            action: action(issue)?,
        },
        Stage::WaitApproval => StageState::WaitApproval {
            common,
            root_cause: root_cause(issue)?,
            action: action(issue)?,
        },
        Stage::Execute => StageState::Execute {
            common,
            root_cause: root_cause(issue)?,
            action: action(issue)?,
        },
        Stage::Record => StageState::Record {
            common,
            root_cause: root_cause(issue)?,
            action: action(issue)?,
        },
        Stage::Complete => StageState::Complete { common },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use remediation_types::MerchantKey;

    #[test]
    fn early_stage_checkpoints_without_root_cause_or_action() {
        let issue = Issue::new(MerchantKey::from("m1"));
        let state = build_checkpoint_state(&issue).unwrap();
        assert_eq!(state.stage(), Stage::Observe);
    }

    #[test]
    fn decide_stage_without_root_cause_is_an_integrity_error() {
        let mut issue = Issue::new(MerchantKey::from("m1"));
        issue.stage = Stage::Decide;
        assert!(matches!(
            build_checkpoint_state(&issue),
            Err(EngineError::Integrity(_))
        ));
    }
}
