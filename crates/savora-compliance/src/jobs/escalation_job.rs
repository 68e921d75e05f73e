//! Escalation sweep for overdue CAPAs.
//!
//! Polls for open and in-progress CAPAs whose due date passed more than the
//! threshold ago, promotes them to `escalated`, logs a system activity with
//! the overdue magnitude, and notifies the managers responsible for the
//! entity's area. The status guard makes the sweep idempotent: an already
//! escalated CAPA is never picked up again.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use savora_core::{EntityType, UserId, UserRole};

use crate::activity::{Actor, ActivityStore, CapaAction, CapaActivityInput};
use crate::ports::{EntityDirectory, IdentityDirectory, NotificationKind, Notifier};
use crate::services::capa::{CapaFilter, CapaStore};
use crate::services::ListOptions;
use crate::types::{Capa, CapaStatus};

/// Default polling interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3600;

/// Default batch size for processing.
pub const DEFAULT_BATCH_SIZE: i64 = 50;

/// Days past due before a CAPA is escalated.
pub const ESCALATION_THRESHOLD_DAYS: i64 = 3;

/// Errors from the escalation sweep.
#[derive(Debug, thiserror::Error)]
pub enum EscalationJobError {
    /// Record store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Processing failure for one CAPA.
    #[error("Processing error: {0}")]
    Processing(String),
}

/// Statistics from one escalation poll cycle.
#[derive(Debug, Clone, Default)]
pub struct EscalationStats {
    /// Overdue CAPAs examined.
    pub scanned: usize,
    /// CAPAs promoted to escalated.
    pub escalated: usize,
    /// Notifications delivered to managers.
    pub notified: usize,
    /// Failed operations.
    pub failed: usize,
}

impl EscalationStats {
    /// Merge stats from another instance.
    pub fn merge(&mut self, other: &EscalationStats) {
        self.scanned += other.scanned;
        self.escalated += other.escalated;
        self.notified += other.notified;
        self.failed += other.failed;
    }
}

/// Job that escalates overdue CAPAs.
pub struct EscalationJob {
    capas: Arc<dyn CapaStore>,
    activity: Arc<dyn ActivityStore>,
    identity: Arc<dyn IdentityDirectory>,
    entities: Arc<dyn EntityDirectory>,
    notifier: Notifier,
    batch_size: i64,
    threshold_days: i64,
}

impl EscalationJob {
    /// Create a new escalation job.
    pub fn new(
        capas: Arc<dyn CapaStore>,
        activity: Arc<dyn ActivityStore>,
        identity: Arc<dyn IdentityDirectory>,
        entities: Arc<dyn EntityDirectory>,
        notifier: Notifier,
    ) -> Self {
        Self {
            capas,
            activity,
            identity,
            entities,
            notifier,
            batch_size: DEFAULT_BATCH_SIZE,
            threshold_days: ESCALATION_THRESHOLD_DAYS,
        }
    }

    /// Create with custom batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Create with custom escalation threshold in days.
    #[must_use]
    pub fn with_threshold_days(mut self, threshold_days: i64) -> Self {
        self.threshold_days = threshold_days.max(1);
        self
    }

    /// Run a single poll cycle.
    #[instrument(skip(self))]
    pub async fn poll(&self) -> Result<EscalationStats, EscalationJobError> {
        let today = Utc::now().date_naive();
        let mut stats = EscalationStats::default();

        let filter = CapaFilter {
            statuses: vec![CapaStatus::Open, CapaStatus::InProgress],
            due_before: Some(today),
            ..Default::default()
        };
        let options = ListOptions {
            limit: self.batch_size,
            offset: 0,
        };
        let overdue = self
            .capas
            .list(&filter, &options)
            .await
            .map_err(|e| EscalationJobError::Store(e.to_string()))?;

        for capa in overdue {
            let days = capa.days_past_due(today);
            if days < self.threshold_days {
                continue;
            }
            stats.scanned += 1;
            match self.escalate(&capa, days).await {
                Ok(notified) => {
                    stats.escalated += 1;
                    stats.notified += notified;
                }
                Err(e) => {
                    warn!(code = %capa.code, error = %e, "failed to escalate capa");
                    stats.failed += 1;
                }
            }
        }

        if stats.scanned > 0 {
            info!(
                scanned = stats.scanned,
                escalated = stats.escalated,
                notified = stats.notified,
                failed = stats.failed,
                "completed escalation poll cycle"
            );
        } else {
            debug!("no capas past the escalation threshold");
        }
        Ok(stats)
    }

    /// Escalate one CAPA, returning how many managers were notified.
    async fn escalate(&self, capa: &Capa, days: i64) -> Result<usize, EscalationJobError> {
        if !capa.status.can_escalate() {
            return Err(EscalationJobError::Processing(format!(
                "capa {} is not escalatable from {}",
                capa.code, capa.status
            )));
        }
        let expected = capa.status;
        let mut updated = capa.clone();
        updated.status = CapaStatus::Escalated;
        updated.updated_at = Utc::now();
        let committed = self
            .capas
            .update_guarded(updated, expected)
            .await
            .map_err(|e| EscalationJobError::Store(e.to_string()))?;
        if !committed {
            return Err(EscalationJobError::Processing(format!(
                "capa {} changed under the sweep",
                capa.code
            )));
        }

        self.activity
            .append(CapaActivityInput {
                capa_id: capa.id,
                actor: Actor::System,
                action: CapaAction::AutoEscalated,
                details: format!("overdue by {days} days"),
            })
            .await
            .map_err(|e| EscalationJobError::Store(e.to_string()))?;

        let targets = self
            .notification_targets(capa)
            .await
            .map_err(|e| EscalationJobError::Store(e.to_string()))?;
        if targets.is_empty() {
            warn!(code = %capa.code, entity = %capa.entity, "no managers to notify for escalation");
        }
        let count = targets.len();
        for target in targets {
            self.notifier
                .send(
                    target,
                    NotificationKind::CapaEscalated,
                    &format!("CAPA {} escalated", capa.code),
                    &format!(
                        "{} priority corrective action for {} is overdue by {days} days",
                        capa.priority, capa.entity
                    ),
                    Some(&format!("/capas/{}", capa.id)),
                )
                .await;
        }
        info!(code = %capa.code, days, "capa escalated");
        Ok(count)
    }

    /// Who hears about an escalation: regional managers covering the
    /// entity's region for branches and kitchens, every audit manager for
    /// suppliers (which have no region).
    async fn notification_targets(&self, capa: &Capa) -> crate::error::Result<Vec<UserId>> {
        if capa.entity.entity_type == EntityType::Supplier {
            let managers = self.identity.users_by_role(UserRole::AuditManager).await?;
            return Ok(managers.into_iter().map(|m| m.id).collect());
        }
        let region = self
            .entities
            .get(&capa.entity)
            .await?
            .and_then(|info| info.region);
        let Some(region) = region else {
            return Ok(Vec::new());
        };
        let mut targets = Vec::new();
        for manager in self
            .identity
            .users_by_role(UserRole::RegionalManager)
            .await?
        {
            if self
                .identity
                .region_assignments(manager.id)
                .await?
                .contains(&region)
            {
                targets.push(manager.id);
            }
        }
        Ok(targets)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::InMemoryActivityStore;
    use crate::ports::{
        EntityInfo, InMemoryEntityDirectory, InMemoryIdentityDirectory, InMemoryNotificationSink,
        User,
    };
    use crate::services::capa::InMemoryCapaStore;
    use crate::types::Severity;
    use chrono::Duration;
    use savora_core::{AuditId, CapaId, EntityId, EntityRef, FindingId};

    struct Fixture {
        job: EscalationJob,
        capas: Arc<InMemoryCapaStore>,
        activity: Arc<InMemoryActivityStore>,
        identity: Arc<InMemoryIdentityDirectory>,
        entities: Arc<InMemoryEntityDirectory>,
        sink: Arc<InMemoryNotificationSink>,
    }

    fn fixture() -> Fixture {
        let capas = Arc::new(InMemoryCapaStore::new());
        let activity = Arc::new(InMemoryActivityStore::new());
        let identity = Arc::new(InMemoryIdentityDirectory::new());
        let entities = Arc::new(InMemoryEntityDirectory::new());
        let sink = Arc::new(InMemoryNotificationSink::new());
        Fixture {
            job: EscalationJob::new(
                capas.clone(),
                activity.clone(),
                identity.clone(),
                entities.clone(),
                Notifier::new(sink.clone()),
            ),
            capas,
            activity,
            identity,
            entities,
            sink,
        }
    }

    fn overdue_capa(entity: EntityRef, status: CapaStatus, days_overdue: i64) -> Capa {
        let now = Utc::now();
        Capa {
            id: CapaId::new(),
            code: format!("CPA-2025-{:05}", days_overdue),
            finding_id: FindingId::new(),
            audit_id: AuditId::new(),
            entity,
            description: "fix".into(),
            assigned_to: UserId::new(),
            due_date: now.date_naive() - Duration::days(days_overdue),
            status,
            priority: Severity::High,
            evidence_urls: vec![],
            notes: None,
            sub_tasks: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    async fn regional_manager(f: &Fixture, region: &str) -> UserId {
        let manager = User {
            id: UserId::new(),
            name: format!("rm-{region}"),
            role: UserRole::RegionalManager,
            active: true,
            created_at: Utc::now(),
        };
        let id = manager.id;
        f.identity.add_user(manager).await;
        f.identity.assign_region(id, region).await;
        id
    }

    fn branch_in(region: &str) -> (EntityRef, EntityInfo) {
        let id = EntityId::new();
        let entity = EntityRef::new(EntityType::Branch, id);
        let info = EntityInfo {
            id,
            entity_type: EntityType::Branch,
            name: "branch".into(),
            active: true,
            region: Some(region.to_string()),
            manager_id: Some(UserId::new()),
        };
        (entity, info)
    }

    #[tokio::test]
    async fn test_escalates_past_threshold_only() {
        let f = fixture();
        let (entity, info) = branch_in("north");
        f.entities.add_entity(info).await;
        regional_manager(&f, "north").await;

        let old = f
            .capas
            .create(overdue_capa(entity, CapaStatus::Open, 5))
            .await
            .unwrap();
        let fresh = f
            .capas
            .create(overdue_capa(entity, CapaStatus::Open, 1))
            .await
            .unwrap();

        let stats = f.job.poll().await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.escalated, 1);
        assert_eq!(stats.failed, 0);

        assert_eq!(
            f.capas.get(old.id).await.unwrap().unwrap().status,
            CapaStatus::Escalated
        );
        assert_eq!(
            f.capas.get(fresh.id).await.unwrap().unwrap().status,
            CapaStatus::Open
        );

        // System activity with the overdue magnitude.
        let log = f.activity.list_for_capa(old.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].actor, Actor::System);
        assert_eq!(log[0].action, CapaAction::AutoEscalated);
        assert_eq!(log[0].details, "overdue by 5 days");
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let f = fixture();
        let (entity, info) = branch_in("north");
        f.entities.add_entity(info).await;
        regional_manager(&f, "north").await;
        f.capas
            .create(overdue_capa(entity, CapaStatus::InProgress, 10))
            .await
            .unwrap();

        let first = f.job.poll().await.unwrap();
        assert_eq!(first.escalated, 1);

        let second = f.job.poll().await.unwrap();
        assert_eq!(second.scanned, 0);
        assert_eq!(second.escalated, 0);
        // Exactly one activity entry total.
        assert_eq!(f.activity.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_notifies_matching_regional_managers_only() {
        let f = fixture();
        let (entity, info) = branch_in("north");
        f.entities.add_entity(info).await;
        let north = regional_manager(&f, "north").await;
        regional_manager(&f, "south").await;

        f.capas
            .create(overdue_capa(entity, CapaStatus::Open, 4))
            .await
            .unwrap();
        let stats = f.job.poll().await.unwrap();
        assert_eq!(stats.notified, 1);

        let sent = f.sink.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, north);
        assert_eq!(sent[0].kind, NotificationKind::CapaEscalated);
        assert!(sent[0].message.contains("overdue by 4 days"));
    }

    #[tokio::test]
    async fn test_supplier_escalation_notifies_audit_managers() {
        let f = fixture();
        let manager = User {
            id: UserId::new(),
            name: "am".into(),
            role: UserRole::AuditManager,
            active: true,
            created_at: Utc::now(),
        };
        let manager_id = manager.id;
        f.identity.add_user(manager).await;

        let entity = EntityRef::new(EntityType::Supplier, EntityId::new());
        f.capas
            .create(overdue_capa(entity, CapaStatus::Open, 7))
            .await
            .unwrap();

        let stats = f.job.poll().await.unwrap();
        assert_eq!(stats.escalated, 1);
        let sent = f.sink.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, manager_id);
    }

    #[tokio::test]
    async fn test_escalation_proceeds_without_targets() {
        let f = fixture();
        // Branch with no region and no regional managers anywhere.
        let id = EntityId::new();
        let entity = EntityRef::new(EntityType::Branch, id);
        f.entities
            .add_entity(EntityInfo {
                id,
                entity_type: EntityType::Branch,
                name: "branch".into(),
                active: true,
                region: None,
                manager_id: None,
            })
            .await;
        let capa = f
            .capas
            .create(overdue_capa(entity, CapaStatus::Open, 6))
            .await
            .unwrap();

        let stats = f.job.poll().await.unwrap();
        // The transition still happens; only the notification is skipped.
        assert_eq!(stats.escalated, 1);
        assert_eq!(stats.notified, 0);
        assert_eq!(
            f.capas.get(capa.id).await.unwrap().unwrap().status,
            CapaStatus::Escalated
        );
    }
}
