//! Audit lifecycle service.
//!
//! Owns the `scheduled → in_progress → submitted` half of the audit state
//! machine plus cancellation. `pending_verification` entry belongs to the
//! auto-approval sweep, and `approved`/`rejected` belong to the
//! verification authority.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::info;

use savora_core::{AuditId, EntityId, EntityRef, EntityType, PlanId, TemplateId, UserId};

use crate::error::{ComplianceError, Result};
use crate::services::ListOptions;
use crate::types::{format_code, Audit, AuditResult, AuditStatus, AUDIT_CODE_PREFIX};

/// Filter options for listing audits.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Filter by status.
    pub status: Option<AuditStatus>,
    /// Filter by entity type.
    pub entity_type: Option<EntityType>,
    /// Filter by entity id.
    pub entity_id: Option<EntityId>,
    /// Filter by generating plan.
    pub plan_id: Option<PlanId>,
    /// Filter by assigned auditor.
    pub auditor_id: Option<UserId>,
    /// Only audits scheduled strictly before this date.
    pub scheduled_before: Option<NaiveDate>,
}

/// Input for creating an audit.
#[derive(Debug, Clone)]
pub struct NewAudit {
    /// Generating plan, if any.
    pub plan_id: Option<PlanId>,
    /// Checklist template.
    pub template_id: TemplateId,
    /// The audited entity.
    pub entity: EntityRef,
    /// Assigned auditor, if already known.
    pub auditor_id: Option<UserId>,
    /// Scheduled date.
    pub scheduled_date: NaiveDate,
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for audit storage backends.
#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    /// Get an audit by ID.
    async fn get(&self, id: AuditId) -> Result<Option<Audit>>;

    /// Persist a new audit.
    async fn create(&self, audit: Audit) -> Result<Audit>;

    /// Replace an audit if its current status still matches `expected`.
    ///
    /// Returns `false` when the guard fails, so racing transitions lose
    /// cleanly instead of clobbering a concurrent commit.
    async fn update_guarded(&self, audit: Audit, expected: AuditStatus) -> Result<bool>;

    /// List audits with filtering and pagination.
    async fn list(&self, filter: &AuditFilter, options: &ListOptions) -> Result<Vec<Audit>>;

    /// Count audits with filtering.
    async fn count(&self, filter: &AuditFilter) -> Result<i64>;

    /// Number of not-yet-completed audits assigned to an auditor.
    ///
    /// Workload input for round-robin assignment: scheduled, in-progress,
    /// and overdue audits all count.
    async fn count_open_for_auditor(&self, auditor_id: UserId) -> Result<i64>;

    /// Approved audits for one entity completed at or after `from`,
    /// newest first.
    async fn list_approved_in_window(
        &self,
        entity: &EntityRef,
        from: DateTime<Utc>,
    ) -> Result<Vec<Audit>>;

    /// Next free sequence number for the `AUD-<year>-` code prefix:
    /// highest existing number, plus one.
    async fn next_code_number(&self, year: i32) -> Result<u32>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

/// In-memory audit store for testing.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    audits: Arc<RwLock<HashMap<AuditId, Audit>>>,
}

impl InMemoryAuditStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filter(audit: &Audit, filter: &AuditFilter) -> bool {
    filter.status.is_none_or(|s| audit.status == s)
        && filter
            .entity_type
            .is_none_or(|t| audit.entity.entity_type == t)
        && filter.entity_id.is_none_or(|id| audit.entity.entity_id == id)
        && filter.plan_id.is_none_or(|p| audit.plan_id == Some(p))
        && filter
            .auditor_id
            .is_none_or(|a| audit.auditor_id == Some(a))
        && filter
            .scheduled_before
            .is_none_or(|d| audit.scheduled_date < d)
}

#[async_trait::async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn get(&self, id: AuditId) -> Result<Option<Audit>> {
        Ok(self.audits.read().await.get(&id).cloned())
    }

    async fn create(&self, audit: Audit) -> Result<Audit> {
        self.audits.write().await.insert(audit.id, audit.clone());
        Ok(audit)
    }

    async fn update_guarded(&self, audit: Audit, expected: AuditStatus) -> Result<bool> {
        let mut audits = self.audits.write().await;
        match audits.get(&audit.id) {
            Some(current) if current.status == expected => {
                audits.insert(audit.id, audit);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, filter: &AuditFilter, options: &ListOptions) -> Result<Vec<Audit>> {
        let audits = self.audits.read().await;
        let mut results: Vec<_> = audits
            .values()
            .filter(|a| matches_filter(a, filter))
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            a.scheduled_date
                .cmp(&b.scheduled_date)
                .then_with(|| a.code.cmp(&b.code))
        });
        Ok(results
            .into_iter()
            .skip(options.offset.max(0) as usize)
            .take(options.limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, filter: &AuditFilter) -> Result<i64> {
        let audits = self.audits.read().await;
        Ok(audits.values().filter(|a| matches_filter(a, filter)).count() as i64)
    }

    async fn count_open_for_auditor(&self, auditor_id: UserId) -> Result<i64> {
        let audits = self.audits.read().await;
        Ok(audits
            .values()
            .filter(|a| a.auditor_id == Some(auditor_id))
            .filter(|a| {
                matches!(
                    a.status,
                    AuditStatus::Scheduled | AuditStatus::InProgress | AuditStatus::Overdue
                )
            })
            .count() as i64)
    }

    async fn list_approved_in_window(
        &self,
        entity: &EntityRef,
        from: DateTime<Utc>,
    ) -> Result<Vec<Audit>> {
        let audits = self.audits.read().await;
        let mut results: Vec<_> = audits
            .values()
            .filter(|a| a.entity == *entity && a.status == AuditStatus::Approved)
            .filter(|a| a.completed_at.is_some_and(|c| c >= from))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(results)
    }

    async fn next_code_number(&self, year: i32) -> Result<u32> {
        let audits = self.audits.read().await;
        let prefix = format!("{AUDIT_CODE_PREFIX}-{year}-");
        let highest = audits
            .values()
            .filter_map(|a| a.code.strip_prefix(&prefix))
            .filter_map(|seq| seq.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Service for audit lifecycle operations.
pub struct AuditService {
    store: Arc<dyn AuditStore>,
}

impl AuditService {
    /// Create a new audit service.
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Create a single audit, allocating its `AUD-` code.
    pub async fn create_audit(&self, input: NewAudit) -> Result<Audit> {
        let now = Utc::now();
        let year = now.year();
        let seq = self.store.next_code_number(year).await?;
        let audit = Audit {
            id: AuditId::new(),
            code: format_code(AUDIT_CODE_PREFIX, year, seq),
            plan_id: input.plan_id,
            template_id: input.template_id,
            entity: input.entity,
            auditor_id: input.auditor_id,
            scheduled_date: input.scheduled_date,
            started_at: None,
            completed_at: None,
            status: AuditStatus::Scheduled,
            submission: None,
            score: None,
            pass_fail: None,
            created_at: now,
            updated_at: now,
        };
        let audit = self.store.create(audit).await?;
        info!(code = %audit.code, entity = %audit.entity, "audit created");
        Ok(audit)
    }

    /// Get an audit by ID.
    pub async fn get_audit(&self, id: AuditId) -> Result<Audit> {
        self.store
            .get(id)
            .await?
            .ok_or(ComplianceError::AuditNotFound(id))
    }

    /// List audits with filtering and pagination.
    pub async fn list_audits(
        &self,
        filter: &AuditFilter,
        options: &ListOptions,
    ) -> Result<Vec<Audit>> {
        self.store.list(filter, options).await
    }

    /// Count audits with filtering.
    pub async fn count_audits(&self, filter: &AuditFilter) -> Result<i64> {
        self.store.count(filter).await
    }

    /// Begin conducting an audit. Allowed from `scheduled` and `overdue`.
    pub async fn start_audit(&self, id: AuditId, auditor_id: UserId) -> Result<Audit> {
        let mut audit = self.get_audit(id).await?;
        if !audit.status.can_start() {
            return Err(ComplianceError::InvalidTransition {
                from: audit.status.to_string(),
                to: AuditStatus::InProgress.to_string(),
            });
        }
        let expected = audit.status;
        audit.status = AuditStatus::InProgress;
        audit.started_at = Some(Utc::now());
        if audit.auditor_id.is_none() {
            audit.auditor_id = Some(auditor_id);
        }
        audit.updated_at = Utc::now();
        self.commit(audit, expected).await
    }

    /// Finalize an audit after its checklist outcome has been recorded.
    pub async fn submit_audit(&self, id: AuditId) -> Result<Audit> {
        let mut audit = self.get_audit(id).await?;
        if !audit.status.can_submit() {
            return Err(ComplianceError::InvalidTransition {
                from: audit.status.to_string(),
                to: AuditStatus::Submitted.to_string(),
            });
        }
        if audit.submission.is_none() {
            return Err(ComplianceError::ChecklistNotRecorded(id));
        }
        let expected = audit.status;
        audit.status = AuditStatus::Submitted;
        audit.completed_at = Some(Utc::now());
        audit.updated_at = Utc::now();
        let audit = self.commit(audit, expected).await?;
        info!(code = %audit.code, "audit submitted");
        Ok(audit)
    }

    /// Cancel an audit. Allowed from any pre-approval state.
    pub async fn cancel_audit(&self, id: AuditId) -> Result<Audit> {
        let mut audit = self.get_audit(id).await?;
        if !audit.status.can_cancel() {
            return Err(ComplianceError::InvalidTransition {
                from: audit.status.to_string(),
                to: AuditStatus::Cancelled.to_string(),
            });
        }
        let expected = audit.status;
        audit.status = AuditStatus::Cancelled;
        audit.updated_at = Utc::now();
        self.commit(audit, expected).await
    }

    async fn commit(&self, audit: Audit, expected: AuditStatus) -> Result<Audit> {
        if self.store.update_guarded(audit.clone(), expected).await? {
            Ok(audit)
        } else {
            Err(ComplianceError::ConcurrentUpdate(audit.code))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use savora_core::EntityType;

    fn service() -> (AuditService, Arc<InMemoryAuditStore>) {
        let store = Arc::new(InMemoryAuditStore::new());
        (AuditService::new(store.clone()), store)
    }

    fn new_audit() -> NewAudit {
        NewAudit {
            plan_id: None,
            template_id: TemplateId::new(),
            entity: EntityRef::new(EntityType::Branch, EntityId::new()),
            auditor_id: None,
            scheduled_date: Utc::now().date_naive(),
        }
    }

    #[tokio::test]
    async fn test_codes_are_monotonic_within_year() {
        let (service, _) = service();
        let year = Utc::now().year();
        let first = service.create_audit(new_audit()).await.unwrap();
        let second = service.create_audit(new_audit()).await.unwrap();
        assert_eq!(first.code, format!("AUD-{year}-00001"));
        assert_eq!(second.code, format!("AUD-{year}-00002"));
    }

    #[tokio::test]
    async fn test_start_then_submit_requires_checklist() {
        let (service, store) = service();
        let audit = service.create_audit(new_audit()).await.unwrap();
        let auditor = UserId::new();

        let started = service.start_audit(audit.id, auditor).await.unwrap();
        assert_eq!(started.status, AuditStatus::InProgress);
        assert_eq!(started.auditor_id, Some(auditor));
        assert!(started.started_at.is_some());

        // No checklist outcome recorded yet.
        let err = service.submit_audit(audit.id).await.unwrap_err();
        assert!(matches!(err, ComplianceError::ChecklistNotRecorded(_)));

        // Record an outcome directly, then submission succeeds.
        let mut current = store.get(audit.id).await.unwrap().unwrap();
        current.submission = Some(AuditResult {
            score: 91.5,
            passed: true,
        });
        assert!(store
            .update_guarded(current, AuditStatus::InProgress)
            .await
            .unwrap());
        let submitted = service.submit_audit(audit.id).await.unwrap();
        assert_eq!(submitted.status, AuditStatus::Submitted);
        assert!(submitted.completed_at.is_some());
        // Public score stays unset until approval.
        assert!(submitted.score.is_none());
        assert!(submitted.pass_fail.is_none());
    }

    #[tokio::test]
    async fn test_cannot_start_twice() {
        let (service, _) = service();
        let audit = service.create_audit(new_audit()).await.unwrap();
        service.start_audit(audit.id, UserId::new()).await.unwrap();
        let err = service.start_audit(audit.id, UserId::new()).await.unwrap_err();
        assert!(matches!(err, ComplianceError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_cancel_blocked_after_approval() {
        let (service, store) = service();
        let audit = service.create_audit(new_audit()).await.unwrap();
        let mut approved = store.get(audit.id).await.unwrap().unwrap();
        approved.status = AuditStatus::Approved;
        store
            .update_guarded(approved, AuditStatus::Scheduled)
            .await
            .unwrap();

        let err = service.cancel_audit(audit.id).await.unwrap_err();
        assert!(matches!(err, ComplianceError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_guard_detects_concurrent_update() {
        let (_, store) = service();
        let service = AuditService::new(store.clone());
        let audit = service.create_audit(new_audit()).await.unwrap();

        let mut stale = store.get(audit.id).await.unwrap().unwrap();
        stale.status = AuditStatus::Cancelled;
        // Another writer got there first.
        assert!(!store
            .update_guarded(stale, AuditStatus::InProgress)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_open_audit_count_for_auditor() {
        let (service, store) = service();
        let auditor = UserId::new();
        let mut input = new_audit();
        input.auditor_id = Some(auditor);
        service.create_audit(input.clone()).await.unwrap();
        let done = service.create_audit(input).await.unwrap();

        let mut cancelled = store.get(done.id).await.unwrap().unwrap();
        cancelled.status = AuditStatus::Cancelled;
        store
            .update_guarded(cancelled, AuditStatus::Scheduled)
            .await
            .unwrap();

        assert_eq!(store.count_open_for_auditor(auditor).await.unwrap(), 1);
    }
}
