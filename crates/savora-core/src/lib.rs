//! savora Core Library
//!
//! Shared types for the savora compliance platform.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (`AuditId`, `CapaId`, `UserId`, ...)
//! - [`entity`] - Audited entity references (branch, central kitchen, supplier)
//! - [`roles`] - Closed role enum with operation capabilities and view scoping

pub mod entity;
pub mod ids;
pub mod roles;

// Re-export main types for convenient access
pub use entity::{EntityRef, EntityType, ParseEntityTypeError};
pub use ids::{
    ActivityId, AuditId, CapaId, EntityId, FindingId, ParseIdError, PlanId, SubTaskId, TemplateId,
    UserId,
};
pub use roles::{Operation, RegionAssignment, UserRole};
