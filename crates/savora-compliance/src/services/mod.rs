//! Service layer for the compliance workflow engine.
//!
//! This module provides the business logic services:
//! - [`plan::PlanService`] - Audit plan CRUD and scheduler expansion
//! - [`audit::AuditService`] - Audit lifecycle state machine
//! - [`finding::FindingService`] - Checklist responses to findings and CAPAs
//! - [`capa::CapaService`] - CAPA lifecycle, sub-tasks, and evidence gating
//! - [`verification::VerificationService`] - Human verification gate
//! - [`scoring::ScoringService`] - Weighted per-entity health scores

pub mod audit;
pub mod capa;
pub mod finding;
pub mod plan;
pub mod scoring;
pub mod verification;

// Re-export commonly used types
pub use audit::{AuditFilter, AuditService, AuditStore, InMemoryAuditStore, NewAudit};
pub use capa::{CapaFilter, CapaService, CapaStore, InMemoryCapaStore, NewSubTask};
pub use finding::{
    ChecklistOutcome, ChecklistResponse, FindingService, FindingStore, InMemoryFindingStore,
};
pub use plan::{InMemoryPlanStore, NewPlan, PlanService, PlanStore, UpdatePlan};
pub use scoring::{HealthScoreStore, InMemoryHealthScoreStore, ScoringService};
pub use verification::VerificationService;

/// Options for list operations.
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Maximum number of results.
    pub limit: i64,
    /// Number of results to skip.
    pub offset: i64,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}
