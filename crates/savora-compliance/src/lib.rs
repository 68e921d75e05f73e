//! Compliance workflow and scoring engine domain logic.
//!
//! This crate provides the core domain logic for food-safety compliance
//! tracking across branches, central kitchens, and suppliers: audit plans
//! and their expansion into scheduled audits, checklist scoring, findings
//! and corrective actions (CAPA), and the weighted per-entity health score.
//!
//! # Features
//!
//! - Audit plan CRUD with one-time and recurring schedules
//! - Scheduler expansion with round-robin auditor assignment
//! - Audit lifecycle state machine with optimistic status guards
//! - Checklist scoring with weighted sections and critical-fail rules
//! - Finding and CAPA generation with severity-derived due dates
//! - CAPA sub-tasks, evidence gating, and verification workflow
//! - Append-only CAPA activity log with a `system` actor for sweeps
//! - Escalation, auto-approval, and overdue-audit background sweeps
//! - Weighted 0-100 health score per entity with type-specific components
//!
//! # Services
//!
//! The [`services`] module provides business logic for:
//! - [`services::PlanService`] - Audit plans and scheduler expansion
//! - [`services::AuditService`] - Audit lifecycle operations
//! - [`services::FindingService`] - Checklist recording and CAPA generation
//! - [`services::CapaService`] - Assignee-side CAPA work
//! - [`services::VerificationService`] - Verifier approvals and rejections
//! - [`services::ScoringService`] - Health score recomputation
//!
//! # Ports
//!
//! The [`ports`] module defines the collaborators the engine consumes but
//! does not own: identity, the entity directory, the template catalog,
//! evidence storage, and notification delivery. Each ships an in-memory
//! implementation used as the test backend.

pub mod activity;
pub mod error;
pub mod jobs;
pub mod ports;
pub mod services;
pub mod types;

// Re-export commonly used types
pub use activity::{Actor, ActivityStore, CapaAction, CapaActivity, InMemoryActivityStore};
pub use error::{ComplianceError, Result};
pub use types::{
    AssignmentStrategy, Audit, AuditPlan, AuditResult, AuditStatus, Capa, CapaStatus, Finding,
    FindingStatus, Frequency, HealthScoreRecord, PlanScope, PlanStatus, Recurrence,
    ScoreComponent, Severity, SubTask, SubTaskStatus,
};
