//! CAPA lifecycle service: assignee-side work on corrective actions.
//!
//! Evidence, notes, and sub-tasks accumulate while the CAPA is workable;
//! submission for verification is gated on every sub-task being completed
//! and at least one evidence item existing somewhere on the record. The
//! verifier side (approve/reject) lives in the verification service.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::info;

use savora_core::{AuditId, CapaId, EntityId, EntityRef, EntityType, SubTaskId, UserId};

use crate::activity::{Actor, ActivityStore, CapaAction, CapaActivity, CapaActivityInput};
use crate::error::{ComplianceError, Result};
use crate::services::ListOptions;
use crate::types::{Capa, CapaStatus, SubTask, SubTaskStatus, CAPA_CODE_PREFIX};

/// Filter options for listing CAPAs.
#[derive(Debug, Clone, Default)]
pub struct CapaFilter {
    /// Filter to these statuses; empty means all.
    pub statuses: Vec<CapaStatus>,
    /// Filter by entity type.
    pub entity_type: Option<EntityType>,
    /// Filter by entity id.
    pub entity_id: Option<EntityId>,
    /// Filter by originating audit.
    pub audit_id: Option<AuditId>,
    /// Filter by assignee.
    pub assigned_to: Option<UserId>,
    /// Only CAPAs due strictly before this date.
    pub due_before: Option<NaiveDate>,
}

/// Input for adding a sub-task.
#[derive(Debug, Clone)]
pub struct NewSubTask {
    /// Who the sub-task is delegated to.
    pub assigned_to: UserId,
    /// What needs doing.
    pub description: String,
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for CAPA storage backends.
#[async_trait::async_trait]
pub trait CapaStore: Send + Sync {
    /// Get a CAPA by ID.
    async fn get(&self, id: CapaId) -> Result<Option<Capa>>;

    /// Persist a new CAPA.
    async fn create(&self, capa: Capa) -> Result<Capa>;

    /// Replace a CAPA if its current status still matches `expected`.
    ///
    /// Sub-tasks are embedded, so every mutation is a whole-record
    /// replace-on-write behind this guard.
    async fn update_guarded(&self, capa: Capa, expected: CapaStatus) -> Result<bool>;

    /// List CAPAs with filtering and pagination, due date order.
    async fn list(&self, filter: &CapaFilter, options: &ListOptions) -> Result<Vec<Capa>>;

    /// Count CAPAs with filtering.
    async fn count(&self, filter: &CapaFilter) -> Result<i64>;

    /// All CAPAs generated from one audit.
    async fn list_by_audit(&self, audit_id: AuditId) -> Result<Vec<Capa>>;

    /// All CAPAs for one entity created at or after `from`.
    async fn list_for_entity(
        &self,
        entity: &EntityRef,
        from: Option<chrono::DateTime<Utc>>,
    ) -> Result<Vec<Capa>>;

    /// Next free sequence number for the `CPA-<year>-` code prefix.
    async fn next_code_number(&self, year: i32) -> Result<u32>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

/// In-memory CAPA store for testing.
#[derive(Debug, Default)]
pub struct InMemoryCapaStore {
    capas: Arc<RwLock<HashMap<CapaId, Capa>>>,
}

impl InMemoryCapaStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filter(capa: &Capa, filter: &CapaFilter) -> bool {
    (filter.statuses.is_empty() || filter.statuses.contains(&capa.status))
        && filter
            .entity_type
            .is_none_or(|t| capa.entity.entity_type == t)
        && filter.entity_id.is_none_or(|id| capa.entity.entity_id == id)
        && filter.audit_id.is_none_or(|a| capa.audit_id == a)
        && filter.assigned_to.is_none_or(|u| capa.assigned_to == u)
        && filter.due_before.is_none_or(|d| capa.due_date < d)
}

#[async_trait::async_trait]
impl CapaStore for InMemoryCapaStore {
    async fn get(&self, id: CapaId) -> Result<Option<Capa>> {
        Ok(self.capas.read().await.get(&id).cloned())
    }

    async fn create(&self, capa: Capa) -> Result<Capa> {
        self.capas.write().await.insert(capa.id, capa.clone());
        Ok(capa)
    }

    async fn update_guarded(&self, capa: Capa, expected: CapaStatus) -> Result<bool> {
        let mut capas = self.capas.write().await;
        match capas.get(&capa.id) {
            Some(current) if current.status == expected => {
                capas.insert(capa.id, capa);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, filter: &CapaFilter, options: &ListOptions) -> Result<Vec<Capa>> {
        let capas = self.capas.read().await;
        let mut results: Vec<_> = capas
            .values()
            .filter(|c| matches_filter(c, filter))
            .cloned()
            .collect();
        results.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.code.cmp(&b.code)));
        Ok(results
            .into_iter()
            .skip(options.offset.max(0) as usize)
            .take(options.limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, filter: &CapaFilter) -> Result<i64> {
        let capas = self.capas.read().await;
        Ok(capas.values().filter(|c| matches_filter(c, filter)).count() as i64)
    }

    async fn list_by_audit(&self, audit_id: AuditId) -> Result<Vec<Capa>> {
        let capas = self.capas.read().await;
        let mut results: Vec<_> = capas
            .values()
            .filter(|c| c.audit_id == audit_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(results)
    }

    async fn list_for_entity(
        &self,
        entity: &EntityRef,
        from: Option<chrono::DateTime<Utc>>,
    ) -> Result<Vec<Capa>> {
        let capas = self.capas.read().await;
        let mut results: Vec<_> = capas
            .values()
            .filter(|c| c.entity == *entity)
            .filter(|c| from.is_none_or(|f| c.created_at >= f))
            .cloned()
            .collect();
        results.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(results)
    }

    async fn next_code_number(&self, year: i32) -> Result<u32> {
        let capas = self.capas.read().await;
        let prefix = format!("{CAPA_CODE_PREFIX}-{year}-");
        let highest = capas
            .values()
            .filter_map(|c| c.code.strip_prefix(&prefix))
            .filter_map(|seq| seq.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Service for assignee-side CAPA operations.
pub struct CapaService {
    capas: Arc<dyn CapaStore>,
    activity: Arc<dyn ActivityStore>,
}

impl CapaService {
    /// Create a new CAPA service.
    pub fn new(capas: Arc<dyn CapaStore>, activity: Arc<dyn ActivityStore>) -> Self {
        Self { capas, activity }
    }

    /// Get a CAPA by ID.
    pub async fn get_capa(&self, id: CapaId) -> Result<Capa> {
        self.capas
            .get(id)
            .await?
            .ok_or(ComplianceError::CapaNotFound(id))
    }

    /// List CAPAs with filtering and pagination.
    pub async fn list_capas(
        &self,
        filter: &CapaFilter,
        options: &ListOptions,
    ) -> Result<Vec<Capa>> {
        self.capas.list(filter, options).await
    }

    /// Activity log for one CAPA, oldest first.
    pub async fn activity_log(&self, id: CapaId) -> Result<Vec<CapaActivity>> {
        self.get_capa(id).await?;
        self.activity.list_for_capa(id).await
    }

    /// Pick up an open CAPA.
    pub async fn start_capa(&self, id: CapaId, actor: UserId) -> Result<Capa> {
        let mut capa = self.get_capa(id).await?;
        if capa.status != CapaStatus::Open {
            return Err(ComplianceError::InvalidTransition {
                from: capa.status.to_string(),
                to: CapaStatus::InProgress.to_string(),
            });
        }
        let expected = capa.status;
        capa.status = CapaStatus::InProgress;
        capa.updated_at = Utc::now();
        let capa = self.commit(capa, expected).await?;
        self.log(
            capa.id,
            Actor::User(actor),
            CapaAction::StatusChanged,
            "open -> in_progress".to_string(),
        )
        .await?;
        Ok(capa)
    }

    /// Attach an evidence reference to the CAPA.
    pub async fn add_evidence(&self, id: CapaId, actor: UserId, url: String) -> Result<Capa> {
        let mut capa = self.workable(id).await?;
        let expected = capa.status;
        capa.evidence_urls.push(url.clone());
        capa.updated_at = Utc::now();
        let capa = self.commit(capa, expected).await?;
        self.log(capa.id, Actor::User(actor), CapaAction::EvidenceAdded, url)
            .await?;
        Ok(capa)
    }

    /// Append to the CAPA's working notes.
    pub async fn add_note(&self, id: CapaId, actor: UserId, note: String) -> Result<Capa> {
        let mut capa = self.workable(id).await?;
        let expected = capa.status;
        capa.notes = Some(match capa.notes.take() {
            Some(existing) => format!("{existing}\n{note}"),
            None => note.clone(),
        });
        capa.updated_at = Utc::now();
        let capa = self.commit(capa, expected).await?;
        self.log(capa.id, Actor::User(actor), CapaAction::NoteAdded, note)
            .await?;
        Ok(capa)
    }

    /// Submit the CAPA for verification.
    ///
    /// Requires every sub-task completed and at least one evidence item
    /// across the CAPA and its sub-tasks. A submission out of `rejected`
    /// is logged as a resubmission.
    pub async fn submit_for_verification(&self, id: CapaId, actor: UserId) -> Result<Capa> {
        let mut capa = self.get_capa(id).await?;
        if !capa.status.can_submit() {
            return Err(ComplianceError::InvalidTransition {
                from: capa.status.to_string(),
                to: CapaStatus::PendingVerification.to_string(),
            });
        }
        let open = capa.open_sub_tasks();
        if open > 0 {
            return Err(ComplianceError::SubTasksIncomplete { open });
        }
        if capa.total_evidence_count() == 0 {
            return Err(ComplianceError::EvidenceRequired);
        }
        let action = if capa.status == CapaStatus::Rejected {
            CapaAction::Resubmitted
        } else {
            CapaAction::Submitted
        };
        let expected = capa.status;
        capa.status = CapaStatus::PendingVerification;
        capa.updated_at = Utc::now();
        let capa = self.commit(capa, expected).await?;
        self.log(capa.id, Actor::User(actor), action, String::new())
            .await?;
        info!(code = %capa.code, ?action, "capa submitted for verification");
        Ok(capa)
    }

    /// Add a sub-task to the CAPA.
    pub async fn add_sub_task(
        &self,
        id: CapaId,
        actor: UserId,
        input: NewSubTask,
    ) -> Result<Capa> {
        let mut capa = self.workable(id).await?;
        let expected = capa.status;
        let sub_task = SubTask {
            id: SubTaskId::new(),
            assigned_to: input.assigned_to,
            description: input.description.clone(),
            status: SubTaskStatus::Pending,
            evidence_urls: Vec::new(),
            completed_at: None,
        };
        capa.sub_tasks.push(sub_task);
        capa.updated_at = Utc::now();
        let capa = self.commit(capa, expected).await?;
        self.log(
            capa.id,
            Actor::User(actor),
            CapaAction::SubtaskAdded,
            input.description,
        )
        .await?;
        Ok(capa)
    }

    /// Begin a pending sub-task.
    pub async fn start_sub_task(
        &self,
        id: CapaId,
        sub_task_id: SubTaskId,
        actor: UserId,
    ) -> Result<Capa> {
        let mut capa = self.workable(id).await?;
        let expected = capa.status;
        {
            let task = find_sub_task(&mut capa, sub_task_id)?;
            if task.status == SubTaskStatus::Completed {
                return Err(ComplianceError::SubTaskAlreadyCompleted(sub_task_id));
            }
            task.status = SubTaskStatus::InProgress;
        }
        capa.updated_at = Utc::now();
        let capa = self.commit(capa, expected).await?;
        self.log(
            capa.id,
            Actor::User(actor),
            CapaAction::SubtaskStarted,
            sub_task_id.to_string(),
        )
        .await?;
        Ok(capa)
    }

    /// Complete a sub-task. `completed_at` is set exactly once.
    pub async fn complete_sub_task(
        &self,
        id: CapaId,
        sub_task_id: SubTaskId,
        actor: UserId,
    ) -> Result<Capa> {
        let mut capa = self.workable(id).await?;
        let expected = capa.status;
        {
            let task = find_sub_task(&mut capa, sub_task_id)?;
            if task.status == SubTaskStatus::Completed {
                return Err(ComplianceError::SubTaskAlreadyCompleted(sub_task_id));
            }
            task.status = SubTaskStatus::Completed;
            task.completed_at = Some(Utc::now());
        }
        capa.updated_at = Utc::now();
        let capa = self.commit(capa, expected).await?;
        self.log(
            capa.id,
            Actor::User(actor),
            CapaAction::SubtaskCompleted,
            sub_task_id.to_string(),
        )
        .await?;
        Ok(capa)
    }

    /// Attach evidence to a sub-task.
    pub async fn add_sub_task_evidence(
        &self,
        id: CapaId,
        sub_task_id: SubTaskId,
        actor: UserId,
        url: String,
    ) -> Result<Capa> {
        let mut capa = self.workable(id).await?;
        let expected = capa.status;
        {
            let task = find_sub_task(&mut capa, sub_task_id)?;
            task.evidence_urls.push(url.clone());
        }
        capa.updated_at = Utc::now();
        let capa = self.commit(capa, expected).await?;
        self.log(capa.id, Actor::User(actor), CapaAction::EvidenceAdded, url)
            .await?;
        Ok(capa)
    }

    /// Delete a sub-task. Only pending sub-tasks may be deleted.
    pub async fn delete_sub_task(
        &self,
        id: CapaId,
        sub_task_id: SubTaskId,
        actor: UserId,
    ) -> Result<Capa> {
        let mut capa = self.workable(id).await?;
        let expected = capa.status;
        let position = capa
            .sub_tasks
            .iter()
            .position(|t| t.id == sub_task_id)
            .ok_or(ComplianceError::SubTaskNotFound(sub_task_id))?;
        if capa.sub_tasks[position].status != SubTaskStatus::Pending {
            return Err(ComplianceError::SubTaskNotDeletable(sub_task_id));
        }
        capa.sub_tasks.remove(position);
        capa.updated_at = Utc::now();
        let capa = self.commit(capa, expected).await?;
        self.log(
            capa.id,
            Actor::User(actor),
            CapaAction::SubtaskDeleted,
            sub_task_id.to_string(),
        )
        .await?;
        Ok(capa)
    }

    async fn workable(&self, id: CapaId) -> Result<Capa> {
        let capa = self.get_capa(id).await?;
        if !capa.status.can_work() {
            return Err(ComplianceError::InvalidTransition {
                from: capa.status.to_string(),
                to: CapaStatus::InProgress.to_string(),
            });
        }
        Ok(capa)
    }

    async fn commit(&self, capa: Capa, expected: CapaStatus) -> Result<Capa> {
        if self.capas.update_guarded(capa.clone(), expected).await? {
            Ok(capa)
        } else {
            Err(ComplianceError::ConcurrentUpdate(capa.code))
        }
    }

    async fn log(
        &self,
        capa_id: CapaId,
        actor: Actor,
        action: CapaAction,
        details: String,
    ) -> Result<()> {
        self.activity
            .append(CapaActivityInput {
                capa_id,
                actor,
                action,
                details,
            })
            .await?;
        Ok(())
    }
}

fn find_sub_task(capa: &mut Capa, sub_task_id: SubTaskId) -> Result<&mut SubTask> {
    capa.sub_tasks
        .iter_mut()
        .find(|t| t.id == sub_task_id)
        .ok_or(ComplianceError::SubTaskNotFound(sub_task_id))
}

// ============================================================================
// Tests
// ============================================================================
