//! [`IssueKey`] – routes an incoming signal to the issue it belongs to
//! (§4.8).

use remediation_types::{MerchantKey, Signal, SignalSource};

/// Signals sharing a merchant and source fold into the same open issue. A
/// terminal or frozen issue never matches an incoming key again; the next
/// signal for that key opens a fresh issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueKey {
    /// The affected merchant.
    pub merchant: MerchantKey,
    /// The signal source.
    pub source: SignalSource,
}

impl IssueKey {
    /// Derive the key a signal routes to.
    pub fn from_signal(signal: &Signal) -> Self {
        Self {
            merchant: signal.merchant.clone(),
            source: signal.source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use remediation_types::{Severity, SignalId};
    use std::collections::HashMap;

    fn signal(merchant: &str, source: SignalSource) -> Signal {
        Signal {
            id: SignalId::new(),
            received_at: Utc::now(),
            source,
            merchant: MerchantKey::from(merchant),
            severity: Severity::High,
            migration_stage: None,
            error_message: None,
            error_code: None,
            resource: None,
            raw_payload: HashMap::new(),
            context: HashMap::new(),
            issue_id: None,
        }
    }

    #[test]
    fn same_merchant_and_source_share_a_key() {
        let a = signal("m1", SignalSource::WebhookFailure);
        let b = signal("m1", SignalSource::WebhookFailure);
        assert_eq!(IssueKey::from_signal(&a), IssueKey::from_signal(&b));
    }

    #[test]
    fn different_source_is_a_distinct_key() {
        let a = signal("m1", SignalSource::WebhookFailure);
        let b = signal("m1", SignalSource::ApiFailure);
        assert_ne!(IssueKey::from_signal(&a), IssueKey::from_signal(&b));
    }
}
