//! Audited entity references.
//!
//! Every audit, finding, CAPA, and health score is attached to exactly one
//! audited entity: a retail branch, a central kitchen ("bck"), or a supplier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::EntityId;

/// The kind of audited entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A retail branch.
    Branch,
    /// A central kitchen.
    Bck,
    /// An external supplier.
    Supplier,
}

impl EntityType {
    /// All entity types, in declaration order.
    pub const ALL: [EntityType; 3] = [Self::Branch, Self::Bck, Self::Supplier];

    /// Whether entities of this type belong to a geographic region.
    ///
    /// Suppliers are external and have no region assignment; escalations
    /// for them route to audit managers instead of regional managers.
    #[must_use]
    pub fn is_regional(self) -> bool {
        matches!(self, Self::Branch | Self::Bck)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branch => write!(f, "branch"),
            Self::Bck => write!(f, "bck"),
            Self::Supplier => write!(f, "supplier"),
        }
    }
}

/// Error returned when parsing an [`EntityType`] from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEntityTypeError(pub String);

impl fmt::Display for ParseEntityTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown entity type: {}", self.0)
    }
}

impl std::error::Error for ParseEntityTypeError {}

impl FromStr for EntityType {
    type Err = ParseEntityTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "branch" => Ok(Self::Branch),
            "bck" => Ok(Self::Bck),
            "supplier" => Ok(Self::Supplier),
            other => Err(ParseEntityTypeError(other.to_string())),
        }
    }
}

/// A typed reference to one audited entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// The kind of entity.
    pub entity_type: EntityType,
    /// The entity's identifier.
    pub entity_id: EntityId,
}

impl EntityRef {
    /// Create a reference to an entity.
    #[must_use]
    pub fn new(entity_type: EntityType, entity_id: EntityId) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}
