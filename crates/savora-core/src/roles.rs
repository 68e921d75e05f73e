//! Role capabilities and view scoping.
//!
//! Roles form a closed enum resolved once at the API boundary. The engine
//! itself never branches on role strings; callers decide up front whether an
//! operation is permitted and which entities a user may see, then invoke the
//! engine with an already-scoped view.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entity::{EntityRef, EntityType};
use crate::ids::{EntityId, UserId};

/// A user's role within the organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Branch or kitchen staff; works assigned CAPAs only.
    Staff,
    /// Manager of one branch.
    BranchManager,
    /// Manager of one central kitchen.
    BckManager,
    /// Oversees all branches and kitchens in assigned regions.
    RegionalManager,
    /// Owns the audit program; verifies CAPAs and audits.
    AuditManager,
    /// Conducts audits.
    Auditor,
    /// Full access.
    Admin,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Staff => write!(f, "staff"),
            Self::BranchManager => write!(f, "branch_manager"),
            Self::BckManager => write!(f, "bck_manager"),
            Self::RegionalManager => write!(f, "regional_manager"),
            Self::AuditManager => write!(f, "audit_manager"),
            Self::Auditor => write!(f, "auditor"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Engine operations a role may or may not perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Create, update, activate, pause audit plans; expand them into audits.
    ManagePlans,
    /// Start an audit and record checklist responses.
    ConductAudit,
    /// Work a CAPA: evidence, notes, sub-tasks, submission.
    WorkCapa,
    /// Approve or reject CAPAs; approve or flag audits.
    Verify,
    /// Trigger the escalation / auto-approval / overdue sweeps manually.
    RunSweeps,
    /// Read health scores.
    ViewScores,
    /// Force a health score recalculation.
    RecalculateScores,
}

/// A region a user is responsible for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionAssignment {
    /// The user holding the assignment.
    pub user_id: UserId,
    /// Region name.
    pub region: String,
}

/// Per-user context needed to evaluate view scoping.
#[derive(Debug, Clone, Default)]
pub struct ScopeContext {
    /// Entities the user directly manages (branch/bck manager, supplier owner).
    pub managed_entities: Vec<EntityId>,
    /// Regions the user covers (regional managers).
    pub regions: Vec<String>,
}

impl UserRole {
    /// Whether this role may perform the given operation.
    #[must_use]
    pub fn can_act(self, operation: Operation) -> bool {
        match self {
            Self::Admin => true,
            Self::AuditManager => !matches!(operation, Operation::ConductAudit),
            Self::Auditor => matches!(
                operation,
                Operation::ConductAudit | Operation::ViewScores
            ),
            Self::RegionalManager => matches!(
                operation,
                Operation::WorkCapa | Operation::ViewScores
            ),
            Self::BranchManager | Self::BckManager => matches!(
                operation,
                Operation::WorkCapa | Operation::ViewScores
            ),
            Self::Staff => matches!(operation, Operation::WorkCapa),
        }
    }

    /// Whether this role, with the given context, may see records for an
    /// entity located in `entity_region` and managed by the entities in
    /// `ctx.managed_entities`.
    #[must_use]
    pub fn can_view_entity(
        self,
        entity: &EntityRef,
        entity_region: Option<&str>,
        ctx: &ScopeContext,
    ) -> bool {
        match self {
            Self::Admin | Self::AuditManager | Self::Auditor => true,
            Self::RegionalManager => {
                entity.entity_type.is_regional()
                    && entity_region.is_some_and(|r| ctx.regions.iter().any(|own| own == r))
            }
            Self::BranchManager => {
                entity.entity_type == EntityType::Branch
                    && ctx.managed_entities.contains(&entity.entity_id)
            }
            Self::BckManager => {
                entity.entity_type == EntityType::Bck
                    && ctx.managed_entities.contains(&entity.entity_id)
            }
            Self::Staff => ctx.managed_entities.contains(&entity.entity_id),
        }
    }

    /// Filter a set of entity references to those the role may see.
    #[must_use]
    pub fn scope_filter<'a>(
        self,
        entities: &'a [(EntityRef, Option<String>)],
        ctx: &ScopeContext,
    ) -> Vec<&'a EntityRef> {
        entities
            .iter()
            .filter(|(entity, region)| self.can_view_entity(entity, region.as_deref(), ctx))
            .map(|(entity, _)| entity)
            .collect()
    }
}
