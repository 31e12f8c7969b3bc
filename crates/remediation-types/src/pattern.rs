//! The [`Pattern`] entity — a cluster of signals sharing a fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{validate_confidence, MerchantKey, PatternId, SignalId, ValidationError};

/// Coarse classification of what a pattern represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Recurring failures that look like the same bug recurring.
    RecurringError,
    /// Spike in volume for an otherwise rare signal shape.
    VolumeSpike,
    /// The same fingerprint spreading across many merchants.
    CrossMerchant,
    /// A signal shape unseen before for this merchant.
    Novel,
}

/// A cluster of signals that share a fingerprint.
///
/// Written once per detection by `detect_patterns`; referenced read-only
/// thereafter by later stages and by the fingerprint cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    /// Unique identifier.
    pub id: PatternId,
    /// What kind of pattern this is.
    pub pattern_type: PatternType,
    /// Confidence that the clustered signals genuinely share a root cause,
    /// in `[0, 1]`.
    pub confidence: f64,
    /// Signals that were clustered into this pattern.
    pub signal_ids: Vec<SignalId>,
    /// Every merchant whose signals contributed to this pattern.
    pub affected_merchants: Vec<MerchantKey>,
    /// Timestamp of the earliest clustered signal.
    pub first_seen: DateTime<Utc>,
    /// Timestamp of the most recent clustered signal.
    pub last_seen: DateTime<Utc>,
    /// Number of signals clustered so far, always `>= 1`.
    pub frequency: u64,
    /// Free-form descriptive attributes (e.g. shared error code, endpoint).
    pub characteristics: HashMap<String, serde_json::Value>,
}

impl Pattern {
    /// Validate the structural invariants from the specification:
    /// confidence in `[0, 1]` and frequency `>= 1`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_confidence(self.confidence)?;
        if self.frequency == 0 {
            return Err(ValidationError::FrequencyTooLow(self.frequency));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Pattern {
        Pattern {
            id: PatternId::new(),
            pattern_type: PatternType::RecurringError,
            confidence: 0.5,
            signal_ids: vec![],
            affected_merchants: vec![],
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            frequency: 1,
            characteristics: HashMap::new(),
        }
    }

    #[test]
    fn rejects_zero_frequency() {
        let mut p = sample();
        p.frequency = 0;
        assert_eq!(p.validate(), Err(ValidationError::FrequencyTooLow(0)));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut p = sample();
        p.confidence = 1.5;
        assert!(p.validate().is_err());
    }
}
