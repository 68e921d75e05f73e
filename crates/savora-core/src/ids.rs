//! Strongly Typed Identifiers
//!
//! This module provides type-safe identifier types for savora.
//! Using the newtype pattern, these types prevent accidental misuse of
//! different ID types at compile time.
//!
//! # Example
//!
//! ```
//! use savora_core::{AuditId, CapaId};
//!
//! let audit = AuditId::new();
//! let capa = CapaId::new();
//!
//! // Type safety: cannot pass CapaId where AuditId is expected
//! fn requires_audit(id: AuditId) -> String {
//!     id.to_string()
//! }
//!
//! let result = requires_audit(audit);
//! // requires_audit(capa); // This would not compile!
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying UUID parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to define a strongly-typed ID type
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Consumes the ID, returning the underlying UUID.
            #[must_use]
            pub fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }
    };
}

define_id!(
    /// Strongly typed identifier for users (auditors, managers, staff).
    UserId
);

define_id!(
    /// Strongly typed identifier for audited entities (branch, bck, supplier).
    EntityId
);

define_id!(
    /// Strongly typed identifier for checklist templates.
    TemplateId
);

define_id!(
    /// Strongly typed identifier for audits.
    AuditId
);

define_id!(
    /// Strongly typed identifier for audit plans.
    PlanId
);

define_id!(
    /// Strongly typed identifier for findings.
    FindingId
);

define_id!(
    /// Strongly typed identifier for corrective actions (CAPA).
    CapaId
);

define_id!(
    /// Strongly typed identifier for CAPA sub-tasks.
    SubTaskId
);

define_id!(
    /// Strongly typed identifier for CAPA activity log entries.
    ActivityId
);
