//! Newtype identifiers for every durable entity.
//!
//! Wrapping raw `Uuid`s keeps function signatures honest: a `StoreError`
//! about an unknown `IssueId` cannot be confused at compile time with one
//! about an unknown `ActionId`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(IssueId, "Identifier for an [`Issue`](crate::Issue).");
uuid_id!(SignalId, "Identifier for a [`Signal`](crate::Signal).");
uuid_id!(PatternId, "Identifier for a [`Pattern`](crate::Pattern).");
uuid_id!(ActionId, "Identifier for an [`Action`](crate::Action).");
uuid_id!(
    AuditEntryId,
    "Identifier for an [`AuditEntry`](crate::AuditEntry)."
);
uuid_id!(
    CheckpointId,
    "Identifier for a [`CheckpointRecord`](crate::CheckpointRecord)."
);
