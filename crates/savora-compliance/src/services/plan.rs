//! Audit plan service: plan CRUD and scheduler expansion.
//!
//! Expansion turns an active plan into concrete audits over a bounded
//! horizon. It fails fast, creating nothing, when the recurrence yields no
//! dates or the scope resolves to no entities — an active plan that can't
//! generate work is a configuration error, not a silent no-op.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::{info, instrument};

use savora_core::{EntityId, EntityRef, PlanId, UserId, UserRole};

use crate::error::{ComplianceError, Result};
use crate::ports::{EntityDirectory, IdentityDirectory};
use crate::services::audit::{AuditService, AuditStore, NewAudit};
use crate::types::{
    AssignmentStrategy, Audit, AuditPlan, PlanScope, PlanStatus, Recurrence,
};

/// How far forward an expansion run generates audits, in days.
pub const EXPANSION_HORIZON_DAYS: u64 = 30;

/// Input for creating a plan.
#[derive(Debug, Clone)]
pub struct NewPlan {
    /// Display name.
    pub name: String,
    /// Kind of entity the plan audits.
    pub entity_type: savora_core::EntityType,
    /// Template the generated audits use.
    pub template_id: savora_core::TemplateId,
    /// When audits are generated.
    pub recurrence: Recurrence,
    /// Which entities are covered.
    pub scope: PlanScope,
    /// How auditors are assigned.
    pub assignment: AssignmentStrategy,
}

/// Input for updating a draft plan. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    /// New name.
    pub name: Option<String>,
    /// New recurrence.
    pub recurrence: Option<Recurrence>,
    /// New scope.
    pub scope: Option<PlanScope>,
    /// New assignment strategy.
    pub assignment: Option<AssignmentStrategy>,
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for plan storage backends.
#[async_trait::async_trait]
pub trait PlanStore: Send + Sync {
    /// Get a plan by ID.
    async fn get(&self, id: PlanId) -> Result<Option<AuditPlan>>;

    /// Persist a new plan.
    async fn create(&self, plan: AuditPlan) -> Result<AuditPlan>;

    /// Replace a plan.
    async fn update(&self, plan: AuditPlan) -> Result<Option<AuditPlan>>;

    /// Delete a plan. Returns whether anything was removed.
    async fn delete(&self, id: PlanId) -> Result<bool>;

    /// List plans, optionally by status, name order.
    async fn list(&self, status: Option<PlanStatus>) -> Result<Vec<AuditPlan>>;
}

/// In-memory plan store for testing.
#[derive(Debug, Default)]
pub struct InMemoryPlanStore {
    plans: Arc<RwLock<HashMap<PlanId, AuditPlan>>>,
}

impl InMemoryPlanStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn get(&self, id: PlanId) -> Result<Option<AuditPlan>> {
        Ok(self.plans.read().await.get(&id).cloned())
    }

    async fn create(&self, plan: AuditPlan) -> Result<AuditPlan> {
        self.plans.write().await.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn update(&self, plan: AuditPlan) -> Result<Option<AuditPlan>> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.id) {
            plans.insert(plan.id, plan.clone());
            Ok(Some(plan))
        } else {
            Ok(None)
        }
    }

    async fn delete(&self, id: PlanId) -> Result<bool> {
        Ok(self.plans.write().await.remove(&id).is_some())
    }

    async fn list(&self, status: Option<PlanStatus>) -> Result<Vec<AuditPlan>> {
        let plans = self.plans.read().await;
        let mut results: Vec<_> = plans
            .values()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }
}

// ============================================================================
// Expansion helpers
// ============================================================================

/// Dates the recurrence generates within `[today, today + horizon]`.
///
/// A one-time date in the past or outside the horizon yields nothing.
#[must_use]
pub fn expansion_dates(recurrence: &Recurrence, today: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut day = today;
    let end = today + Days::new(EXPANSION_HORIZON_DAYS);
    while day <= end {
        if recurrence.matches(day) {
            dates.push(day);
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    dates
}

/// Round-robin roster: auditors in assignment order, advanced per audit.
///
/// Ordered once per expansion run by (ascending open audit count, then
/// name) and then cycled without re-sorting, so distribution within one
/// run is deterministic.
struct Roster {
    auditors: Vec<UserId>,
    next: usize,
}

impl Roster {
    fn advance(&mut self) -> UserId {
        let id = self.auditors[self.next];
        self.next = (self.next + 1) % self.auditors.len();
        id
    }
}

// ============================================================================
// Service
// ============================================================================

/// Service for audit plans and scheduler expansion.
pub struct PlanService {
    store: Arc<dyn PlanStore>,
    audit_store: Arc<dyn AuditStore>,
    entities: Arc<dyn EntityDirectory>,
    identity: Arc<dyn IdentityDirectory>,
}

impl PlanService {
    /// Create a new plan service.
    pub fn new(
        store: Arc<dyn PlanStore>,
        audit_store: Arc<dyn AuditStore>,
        entities: Arc<dyn EntityDirectory>,
        identity: Arc<dyn IdentityDirectory>,
    ) -> Self {
        Self {
            store,
            audit_store,
            entities,
            identity,
        }
    }

    /// Create a plan in draft status.
    pub async fn create_plan(&self, input: NewPlan) -> Result<AuditPlan> {
        let now = Utc::now();
        let plan = AuditPlan {
            id: PlanId::new(),
            name: input.name,
            entity_type: input.entity_type,
            template_id: input.template_id,
            recurrence: input.recurrence,
            scope: input.scope,
            assignment: input.assignment,
            status: PlanStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        self.store.create(plan).await
    }

    /// Get a plan by ID.
    pub async fn get_plan(&self, id: PlanId) -> Result<AuditPlan> {
        self.store
            .get(id)
            .await?
            .ok_or(ComplianceError::PlanNotFound(id))
    }

    /// List plans, optionally filtered by status.
    pub async fn list_plans(&self, status: Option<PlanStatus>) -> Result<Vec<AuditPlan>> {
        self.store.list(status).await
    }

    /// Update a plan. Only draft plans may be edited.
    pub async fn update_plan(&self, id: PlanId, input: UpdatePlan) -> Result<AuditPlan> {
        let mut plan = self.get_plan(id).await?;
        if !plan.status.can_edit() {
            return Err(ComplianceError::PlanNotDraft(id));
        }
        if let Some(name) = input.name {
            plan.name = name;
        }
        if let Some(recurrence) = input.recurrence {
            plan.recurrence = recurrence;
        }
        if let Some(scope) = input.scope {
            plan.scope = scope;
        }
        if let Some(assignment) = input.assignment {
            plan.assignment = assignment;
        }
        plan.updated_at = Utc::now();
        self.store
            .update(plan)
            .await?
            .ok_or(ComplianceError::PlanNotFound(id))
    }

    /// Delete a plan. Only draft plans may be deleted.
    pub async fn delete_plan(&self, id: PlanId) -> Result<bool> {
        let plan = self.get_plan(id).await?;
        if !plan.status.can_edit() {
            return Err(ComplianceError::PlanNotDraft(id));
        }
        self.store.delete(id).await
    }

    /// Activate a draft or paused plan.
    pub async fn activate_plan(&self, id: PlanId) -> Result<AuditPlan> {
        self.transition(id, &[PlanStatus::Draft, PlanStatus::Paused], PlanStatus::Active)
            .await
    }

    /// Pause an active plan.
    pub async fn pause_plan(&self, id: PlanId) -> Result<AuditPlan> {
        self.transition(id, &[PlanStatus::Active], PlanStatus::Paused)
            .await
    }

    /// Mark a plan completed.
    pub async fn complete_plan(&self, id: PlanId) -> Result<AuditPlan> {
        self.transition(
            id,
            &[PlanStatus::Active, PlanStatus::Paused],
            PlanStatus::Completed,
        )
        .await
    }

    async fn transition(
        &self,
        id: PlanId,
        allowed_from: &[PlanStatus],
        to: PlanStatus,
    ) -> Result<AuditPlan> {
        let mut plan = self.get_plan(id).await?;
        if !allowed_from.contains(&plan.status) {
            return Err(ComplianceError::InvalidTransition {
                from: plan.status.to_string(),
                to: to.to_string(),
            });
        }
        plan.status = to;
        plan.updated_at = Utc::now();
        self.store
            .update(plan)
            .await?
            .ok_or(ComplianceError::PlanNotFound(id))
    }

    /// Expand an active plan into concrete audits over the horizon.
    ///
    /// All validation happens before the first audit is created: either the
    /// whole expansion is generated, or nothing is.
    #[instrument(skip(self), fields(plan_id = %plan_id))]
    pub async fn expand_plan(&self, plan_id: PlanId, today: NaiveDate) -> Result<Vec<Audit>> {
        let plan = self.get_plan(plan_id).await?;
        if !plan.status.can_expand() {
            return Err(ComplianceError::PlanNotActive(plan_id));
        }

        let dates = expansion_dates(&plan.recurrence, today);
        if dates.is_empty() {
            return Err(ComplianceError::PlanProducesNoAudits);
        }

        let entity_ids = match &plan.scope {
            PlanScope::AllActive => self.entities.list_active(plan.entity_type).await?,
            PlanScope::Entities(ids) => ids.clone(),
        };
        if entity_ids.is_empty() {
            return Err(ComplianceError::PlanScopeEmpty);
        }

        let mut roster = match plan.assignment {
            AssignmentStrategy::AutoRoundRobin => Some(self.build_roster().await?),
            AssignmentStrategy::AssignSpecific(auditor) => {
                // Validate the fixed auditor up front.
                self.identity
                    .get_user(auditor)
                    .await?
                    .filter(|u| u.active)
                    .ok_or(ComplianceError::UserNotFound(auditor))?;
                None
            }
            AssignmentStrategy::Manual => None,
        };

        let audit_service = AuditService::new(self.audit_store.clone());
        let mut created = Vec::with_capacity(dates.len() * entity_ids.len());
        for date in &dates {
            for entity_id in &entity_ids {
                let auditor_id = match plan.assignment {
                    AssignmentStrategy::AssignSpecific(auditor) => Some(auditor),
                    AssignmentStrategy::AutoRoundRobin => {
                        roster.as_mut().map(Roster::advance)
                    }
                    AssignmentStrategy::Manual => None,
                };
                let audit = audit_service
                    .create_audit(NewAudit {
                        plan_id: Some(plan.id),
                        template_id: plan.template_id,
                        entity: EntityRef::new(plan.entity_type, *entity_id),
                        auditor_id,
                        scheduled_date: *date,
                    })
                    .await?;
                created.push(audit);
            }
        }

        info!(
            plan = %plan.name,
            dates = dates.len(),
            entities = entity_ids.len(),
            audits = created.len(),
            "plan expanded"
        );
        Ok(created)
    }

    /// Build the round-robin roster for one expansion run.
    async fn build_roster(&self) -> Result<Roster> {
        let auditors = self.identity.users_by_role(UserRole::Auditor).await?;
        if auditors.is_empty() {
            return Err(ComplianceError::NoAuditorsAvailable);
        }
        let mut with_load = Vec::with_capacity(auditors.len());
        for auditor in auditors {
            let open = self.audit_store.count_open_for_auditor(auditor.id).await?;
            with_load.push((open, auditor.name, auditor.id));
        }
        with_load.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(Roster {
            auditors: with_load.into_iter().map(|(_, _, id)| id).collect(),
            next: 0,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
