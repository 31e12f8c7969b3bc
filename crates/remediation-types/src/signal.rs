//! The [`Signal`] entity — a single normalized observation arriving on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{IssueId, JsonMap, MerchantKey, SignalId};

/// Where a signal originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Raised by a merchant-facing support ticket.
    SupportTicket,
    /// Raised by an API failure observed by a platform integration.
    ApiFailure,
    /// Raised by a checkout error during a live transaction.
    CheckoutError,
    /// Raised by a webhook delivery failure.
    WebhookFailure,
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SupportTicket => "support_ticket",
            Self::ApiFailure => "api_failure",
            Self::CheckoutError => "checkout_error",
            Self::WebhookFailure => "webhook_failure",
        };
        write!(f, "{s}")
    }
}

/// Severity the signal was tagged with at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Cosmetic or informational.
    Low,
    /// Degraded experience but not blocking.
    Medium,
    /// Blocking for the affected merchant.
    High,
    /// Platform-wide or revenue-impacting.
    Critical,
}

/// Which leg of the migration the signal was observed during, if known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStage {
    /// Pre-cutover validation.
    PreCutover,
    /// The cutover window itself.
    Cutover,
    /// Post-cutover stabilization.
    PostCutover,
    /// Steady-state operation, well after migration.
    SteadyState,
}

/// A single normalized observation arriving on the `signals.normalized` topic.
///
/// Immutable after insert: once written to the durable store, a signal is
/// never updated. Corrections arrive as new signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique identifier, also used as the bus idempotence key.
    pub id: SignalId,
    /// When the signal was recorded by the durable store.
    pub received_at: DateTime<Utc>,
    /// Origin of the observation.
    pub source: SignalSource,
    /// The merchant this signal concerns.
    pub merchant: MerchantKey,
    /// Severity assigned at ingestion.
    pub severity: Severity,
    /// Migration leg the signal was observed during, if known.
    pub migration_stage: Option<MigrationStage>,
    /// Normalized, human-readable error message.
    pub error_message: Option<String>,
    /// Normalized machine error code, e.g. `WEBHOOK_404`.
    pub error_code: Option<String>,
    /// Resource identifier the error concerned (order id, webhook URL, ...).
    pub resource: Option<String>,
    /// Raw payload exactly as received, for forensic replay.
    pub raw_payload: JsonMap,
    /// Free-form context supplied by the producer (request id, user agent, ...).
    pub context: JsonMap,
    /// The issue this signal has been folded into, once routed.
    pub issue_id: Option<IssueId>,
}

impl Signal {
    /// The fingerprint tuple used by the pattern cache: `(source, error_code,
    /// normalized error shape)`. The error shape strips digits and
    /// high-cardinality tokens from the message so that two signals differing
    /// only in an order id still collide.
    pub fn fingerprint(&self) -> (SignalSource, String, String) {
        let code = self.error_code.clone().unwrap_or_default();
        let shape = self
            .error_message
            .as_deref()
            .map(normalize_error_shape)
            .unwrap_or_default();
        (self.source, code, shape)
    }
}

/// Collapse a free-text error message into a coarse shape suitable for
/// fingerprinting: digits become `#`, and runs of whitespace collapse to one
/// space, so `"order 4821 not found"` and `"order 77 not found"` fingerprint
/// identically.
pub fn normalize_error_shape(message: &str) -> String {
    let mut shape = String::with_capacity(message.len());
    let mut last_was_space = false;
    for ch in message.chars() {
        if ch.is_ascii_digit() {
            if shape.ends_with('#') {
                continue;
            }
            shape.push('#');
            last_was_space = false;
        } else if ch.is_whitespace() {
            if !last_was_space {
                shape.push(' ');
            }
            last_was_space = true;
        } else {
            shape.push(ch.to_ascii_lowercase());
            last_was_space = false;
        }
    }
    shape.trim().to_string()
}
