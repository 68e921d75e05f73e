//! Health score engine: a weighted 0-100 composite per entity.
//!
//! A pure function of history, recomputed on demand rather than
//! continuously. Components and weights vary by entity type; every raw
//! component is clamped to [0, 100] before weighting and the composite is
//! rounded to one decimal place. One current snapshot per entity,
//! overwritten in place.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{info, instrument};

use savora_core::{EntityRef, EntityType};

use crate::activity::ActivityStore;
use crate::error::Result;
use crate::ports::EntityDirectory;
use crate::services::audit::AuditStore;
use crate::services::capa::CapaStore;
use crate::types::{Capa, HealthScoreRecord, ScoreComponent};

/// Trailing window of approved audits feeding audit-performance components.
pub const AUDIT_WINDOW_DAYS: i64 = 90;
/// Trailing window for the repeat-findings component.
pub const FINDING_WINDOW_DAYS: i64 = 60;

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for health score snapshot storage.
#[async_trait::async_trait]
pub trait HealthScoreStore: Send + Sync {
    /// Write the current snapshot, replacing any prior record.
    async fn upsert(&self, record: HealthScoreRecord) -> Result<HealthScoreRecord>;

    /// The current snapshot for one entity, if any.
    async fn get(&self, entity: &EntityRef) -> Result<Option<HealthScoreRecord>>;
}

/// In-memory health score store for testing.
#[derive(Debug, Default)]
pub struct InMemoryHealthScoreStore {
    records: Arc<RwLock<HashMap<EntityRef, HealthScoreRecord>>>,
}

impl InMemoryHealthScoreStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl HealthScoreStore for InMemoryHealthScoreStore {
    async fn upsert(&self, record: HealthScoreRecord) -> Result<HealthScoreRecord> {
        self.records
            .write()
            .await
            .insert(record.entity, record.clone());
        Ok(record)
    }

    async fn get(&self, entity: &EntityRef) -> Result<Option<HealthScoreRecord>> {
        Ok(self.records.read().await.get(entity).cloned())
    }
}

// ============================================================================
// Composition
// ============================================================================

/// Clamp raw components, weight them, and round the composite.
#[must_use]
pub fn compose(raw_components: Vec<(&'static str, f64, f64)>) -> (f64, Vec<ScoreComponent>) {
    let components: Vec<ScoreComponent> = raw_components
        .into_iter()
        .map(|(name, raw, weight)| {
            let clamped = raw.clamp(0.0, 100.0);
            ScoreComponent {
                name: name.to_string(),
                raw: clamped,
                weight,
                weighted: clamped * weight,
            }
        })
        .collect();
    let total: f64 = components.iter().map(|c| c.weighted).sum();
    ((total * 10.0).round() / 10.0, components)
}

// ============================================================================
// Service
// ============================================================================

/// Weighted per-entity health scoring engine.
pub struct ScoringService {
    audits: Arc<dyn AuditStore>,
    capas: Arc<dyn CapaStore>,
    activity: Arc<dyn ActivityStore>,
    entities: Arc<dyn EntityDirectory>,
    scores: Arc<dyn HealthScoreStore>,
}

impl ScoringService {
    /// Create a new scoring service.
    pub fn new(
        audits: Arc<dyn AuditStore>,
        capas: Arc<dyn CapaStore>,
        activity: Arc<dyn ActivityStore>,
        entities: Arc<dyn EntityDirectory>,
        scores: Arc<dyn HealthScoreStore>,
    ) -> Self {
        Self {
            audits,
            capas,
            activity,
            entities,
            scores,
        }
    }

    /// The stored score snapshot, computing one if none exists yet.
    pub async fn get_health_score(&self, entity: &EntityRef) -> Result<HealthScoreRecord> {
        if let Some(record) = self.scores.get(entity).await? {
            return Ok(record);
        }
        self.recalculate(entity).await
    }

    /// Recompute and persist the score for one entity.
    #[instrument(skip(self), fields(entity = %entity))]
    pub async fn recalculate(&self, entity: &EntityRef) -> Result<HealthScoreRecord> {
        let now = Utc::now();
        let window_start = now - Duration::days(AUDIT_WINDOW_DAYS);
        let audits = self.audits.list_approved_in_window(entity, window_start).await?;
        let audit_scores: Vec<f64> = audits.iter().filter_map(|a| a.score).collect();
        let all_capas = self.capas.list_for_entity(entity, None).await?;

        let raw = match entity.entity_type {
            EntityType::Branch => {
                let findings_60d = self
                    .capas
                    .list_for_entity(entity, Some(now - Duration::days(FINDING_WINDOW_DAYS)))
                    .await?
                    .len();
                vec![
                    ("audit_performance", mean_or(&audit_scores, 100.0), 0.40),
                    ("capa_completion", self.capa_completion(&all_capas).await?, 0.25),
                    (
                        "repeat_findings",
                        100.0 - (10.0 * findings_60d as f64).min(50.0),
                        0.15,
                    ),
                    // Placeholder until incident data is wired in.
                    ("incident_rate", 100.0, 0.10),
                    ("verification_pass", self.verification_pass(&all_capas).await?, 0.10),
                ]
            }
            EntityType::Bck => {
                let latest = audits.first().and_then(|a| a.score).unwrap_or(0.0);
                let suppliers = self.entities.suppliers_for_bck(entity.entity_id).await?;
                let quality: Vec<f64> = suppliers
                    .iter()
                    .filter_map(|s| s.quality_score)
                    .collect();
                vec![
                    ("haccp_compliance", latest, 0.50),
                    ("production_audit_perf", mean_or(&audit_scores, 100.0), 0.25),
                    ("supplier_quality", mean_or(&quality, 100.0), 0.15),
                    ("capa_completion", self.capa_completion(&all_capas).await?, 0.10),
                ]
            }
            EntityType::Supplier => {
                let profile = self.entities.supplier_profile(entity.entity_id).await?;
                let certified = profile
                    .as_ref()
                    .is_some_and(|p| !p.certifications.is_empty());
                vec![
                    ("audit_performance", mean_or(&audit_scores, 100.0), 0.40),
                    (
                        "product_quality",
                        (100.0 - 10.0 * all_capas.len() as f64).max(0.0),
                        0.30,
                    ),
                    ("compliance", if certified { 100.0 } else { 75.0 }, 0.20),
                    // Placeholder until delivery data is wired in.
                    ("delivery_perf", 100.0, 0.10),
                ]
            }
        };

        let (score, components) = compose(raw);
        let record = self
            .scores
            .upsert(HealthScoreRecord {
                entity: *entity,
                score,
                components,
                calculated_at: now,
            })
            .await?;
        info!(entity = %entity, score, "health score recalculated");
        Ok(record)
    }

    /// Percentage of closed CAPAs whose closing activity landed on or
    /// before the due date, read from the activity log. A closed CAPA with
    /// no closing entry counts as on time. 100 when none are closed.
    async fn capa_completion(&self, capas: &[Capa]) -> Result<f64> {
        let closed: Vec<&Capa> = capas.iter().filter(|c| c.status.is_resolved()).collect();
        if closed.is_empty() {
            return Ok(100.0);
        }
        let mut on_time = 0usize;
        for capa in &closed {
            let log = self.activity.list_for_capa(capa.id).await?;
            let closing = log.iter().find(|e| e.action.is_closing());
            match closing {
                Some(entry) if entry.created_at.date_naive() > capa.due_date => {}
                _ => on_time += 1,
            }
        }
        Ok(on_time as f64 / closed.len() as f64 * 100.0)
    }

    /// Percentage of closed CAPAs that were never rejected.
    async fn verification_pass(&self, capas: &[Capa]) -> Result<f64> {
        let closed: Vec<&Capa> = capas.iter().filter(|c| c.status.is_resolved()).collect();
        if closed.is_empty() {
            return Ok(100.0);
        }
        let mut clean = 0usize;
        for capa in &closed {
            let log = self.activity.list_for_capa(capa.id).await?;
            if !log
                .iter()
                .any(|e| e.action == crate::activity::CapaAction::Rejected)
            {
                clean += 1;
            }
        }
        Ok(clean as f64 / closed.len() as f64 * 100.0)
    }

}

fn mean_or(values: &[f64], default: f64) -> f64 {
    if values.is_empty() {
        default
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Actor, CapaAction, CapaActivityInput, InMemoryActivityStore};
    use crate::ports::{InMemoryEntityDirectory, SupplierProfile};
    use crate::services::audit::InMemoryAuditStore;
    use crate::services::capa::InMemoryCapaStore;
    use crate::types::{
        Audit, AuditStatus, Capa, CapaStatus, Severity, SubTask,
    };
    use savora_core::{AuditId, CapaId, EntityId, FindingId, TemplateId, UserId};

    fn approved_audit(entity: EntityRef, score: f64, days_ago: i64) -> Audit {
        let now = Utc::now();
        Audit {
            id: AuditId::new(),
            code: format!("AUD-2025-{:05}", (score as u32) % 100_000),
            plan_id: None,
            template_id: TemplateId::new(),
            entity,
            auditor_id: Some(UserId::new()),
            scheduled_date: now.date_naive(),
            started_at: Some(now),
            completed_at: Some(now - Duration::days(days_ago)),
            status: AuditStatus::Approved,
            submission: None,
            score: Some(score),
            pass_fail: Some(score >= 80.0),
            created_at: now,
            updated_at: now,
        }
    }

    fn capa(entity: EntityRef, status: CapaStatus, due_days_ago: i64) -> Capa {
        let now = Utc::now();
        Capa {
            id: CapaId::new(),
            code: format!("CPA-2025-{:05}", now.timestamp_subsec_micros() % 100_000),
            finding_id: FindingId::new(),
            audit_id: AuditId::new(),
            entity,
            description: "fix".into(),
            assigned_to: UserId::new(),
            due_date: now.date_naive() - Duration::days(due_days_ago),
            status,
            priority: Severity::Medium,
            evidence_urls: vec![],
            notes: None,
            sub_tasks: Vec::<SubTask>::new(),
            created_at: now,
            updated_at: now,
        }
    }

    struct Fixture {
        service: ScoringService,
        audits: Arc<InMemoryAuditStore>,
        capas: Arc<InMemoryCapaStore>,
        activity: Arc<InMemoryActivityStore>,
        entities: Arc<InMemoryEntityDirectory>,
        scores: Arc<InMemoryHealthScoreStore>,
    }

    fn fixture() -> Fixture {
        let audits = Arc::new(InMemoryAuditStore::new());
        let capas = Arc::new(InMemoryCapaStore::new());
        let activity = Arc::new(InMemoryActivityStore::new());
        let entities = Arc::new(InMemoryEntityDirectory::new());
        let scores = Arc::new(InMemoryHealthScoreStore::new());
        Fixture {
            service: ScoringService::new(
                audits.clone(),
                capas.clone(),
                activity.clone(),
                entities.clone(),
                scores.clone(),
            ),
            audits,
            capas,
            activity,
            entities,
            scores,
        }
    }

    fn component<'a>(record: &'a HealthScoreRecord, name: &str) -> &'a ScoreComponent {
        record
            .components
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("missing component {name}"))
    }

    #[test]
    fn test_compose_clamps_and_rounds() {
        let (score, components) = compose(vec![
            ("a", 150.0, 0.5),
            ("b", -20.0, 0.3),
            ("c", 33.333, 0.2),
        ]);
        assert_eq!(components[0].raw, 100.0);
        assert_eq!(components[1].raw, 0.0);
        // 100*0.5 + 0*0.3 + 33.333*0.2 = 56.6666 -> 56.7
        assert_eq!(score, 56.7);
    }

    #[tokio::test]
    async fn test_branch_with_no_history_scores_clean() {
        let f = fixture();
        let entity = EntityRef::new(EntityType::Branch, EntityId::new());
        let record = f.service.recalculate(&entity).await.unwrap();
        // Everything defaults favorable with no data.
        assert_eq!(record.score, 100.0);
        assert_eq!(record.components.len(), 5);
        assert_eq!(component(&record, "incident_rate").raw, 100.0);
    }

    #[tokio::test]
    async fn test_branch_audit_performance_is_windowed_mean() {
        let f = fixture();
        let entity = EntityRef::new(EntityType::Branch, EntityId::new());
        f.audits.create(approved_audit(entity, 90.0, 5)).await.unwrap();
        f.audits.create(approved_audit(entity, 70.0, 10)).await.unwrap();
        // Outside the 90-day window; must not count.
        f.audits.create(approved_audit(entity, 10.0, 120)).await.unwrap();

        let record = f.service.recalculate(&entity).await.unwrap();
        assert_eq!(component(&record, "audit_performance").raw, 80.0);
    }

    #[tokio::test]
    async fn test_repeat_findings_penalty_is_capped() {
        let f = fixture();
        let entity = EntityRef::new(EntityType::Branch, EntityId::new());
        // Seven recent CAPAs (one per finding): 10 x 7 = 70, capped at 50.
        for _ in 0..7 {
            f.capas.create(capa(entity, CapaStatus::Open, 0)).await.unwrap();
        }
        let record = f.service.recalculate(&entity).await.unwrap();
        assert_eq!(component(&record, "repeat_findings").raw, 50.0);
    }

    #[tokio::test]
    async fn test_capa_completion_reads_closing_activity() {
        let f = fixture();
        let entity = EntityRef::new(EntityType::Branch, EntityId::new());

        // Closed late: due 5 days ago, approved now.
        let late = f.capas.create(capa(entity, CapaStatus::Closed, 5)).await.unwrap();
        f.activity
            .append(CapaActivityInput {
                capa_id: late.id,
                actor: Actor::System,
                action: CapaAction::AutoApproved,
                details: String::new(),
            })
            .await
            .unwrap();

        // Closed with no closing entry: leniently counted on time.
        f.capas.create(capa(entity, CapaStatus::Approved, 5)).await.unwrap();

        let record = f.service.recalculate(&entity).await.unwrap();
        assert_eq!(component(&record, "capa_completion").raw, 50.0);
    }

    #[tokio::test]
    async fn test_verification_pass_counts_never_rejected() {
        let f = fixture();
        let entity = EntityRef::new(EntityType::Branch, EntityId::new());

        let clean = f.capas.create(capa(entity, CapaStatus::Closed, 0)).await.unwrap();
        f.activity
            .append(CapaActivityInput {
                capa_id: clean.id,
                actor: Actor::User(UserId::new()),
                action: CapaAction::Approved,
                details: String::new(),
            })
            .await
            .unwrap();

        let reworked = f.capas.create(capa(entity, CapaStatus::Closed, 0)).await.unwrap();
        for action in [CapaAction::Rejected, CapaAction::Approved] {
            f.activity
                .append(CapaActivityInput {
                    capa_id: reworked.id,
                    actor: Actor::User(UserId::new()),
                    action,
                    details: String::new(),
                })
                .await
                .unwrap();
        }

        let record = f.service.recalculate(&entity).await.unwrap();
        assert_eq!(component(&record, "verification_pass").raw, 50.0);
    }

    #[tokio::test]
    async fn test_bck_haccp_uses_latest_audit_and_zero_default() {
        let f = fixture();
        let entity = EntityRef::new(EntityType::Bck, EntityId::new());

        // No approved audits: haccp_compliance is 0, not 100.
        let record = f.service.recalculate(&entity).await.unwrap();
        assert_eq!(component(&record, "haccp_compliance").raw, 0.0);

        f.audits.create(approved_audit(entity, 60.0, 20)).await.unwrap();
        f.audits.create(approved_audit(entity, 95.0, 2)).await.unwrap();
        let record = f.service.recalculate(&entity).await.unwrap();
        // Most recently completed audit wins, mean feeds the other component.
        assert_eq!(component(&record, "haccp_compliance").raw, 95.0);
        assert_eq!(component(&record, "production_audit_perf").raw, 77.5);
    }

    #[tokio::test]
    async fn test_bck_supplier_quality_is_mean_of_destinations() {
        let f = fixture();
        let bck_id = EntityId::new();
        let entity = EntityRef::new(EntityType::Bck, bck_id);
        f.entities
            .add_supplier(SupplierProfile {
                id: EntityId::new(),
                name: "Fresh Farms".into(),
                quality_score: Some(90.0),
                certifications: vec![],
                destination_bcks: vec![bck_id],
            })
            .await;
        f.entities
            .add_supplier(SupplierProfile {
                id: EntityId::new(),
                name: "Other Co".into(),
                quality_score: Some(70.0),
                certifications: vec![],
                destination_bcks: vec![bck_id],
            })
            .await;

        let record = f.service.recalculate(&entity).await.unwrap();
        assert_eq!(component(&record, "supplier_quality").raw, 80.0);
    }

    #[tokio::test]
    async fn test_supplier_components() {
        let f = fixture();
        let supplier_id = EntityId::new();
        let entity = EntityRef::new(EntityType::Supplier, supplier_id);
        f.entities
            .add_supplier(SupplierProfile {
                id: supplier_id,
                name: "Fresh Farms".into(),
                quality_score: Some(90.0),
                certifications: vec!["ISO22000".into()],
                destination_bcks: vec![],
            })
            .await;
        for _ in 0..3 {
            f.capas.create(capa(entity, CapaStatus::Open, 0)).await.unwrap();
        }

        let record = f.service.recalculate(&entity).await.unwrap();
        assert_eq!(component(&record, "product_quality").raw, 70.0);
        assert_eq!(component(&record, "compliance").raw, 100.0);
        assert_eq!(component(&record, "delivery_perf").raw, 100.0);
    }

    #[tokio::test]
    async fn test_uncertified_supplier_scores_75_compliance() {
        let f = fixture();
        let entity = EntityRef::new(EntityType::Supplier, EntityId::new());
        // No profile on file at all: treated as uncertified.
        let record = f.service.recalculate(&entity).await.unwrap();
        assert_eq!(component(&record, "compliance").raw, 75.0);
    }

    #[tokio::test]
    async fn test_recalculation_overwrites_snapshot() {
        let f = fixture();
        let entity = EntityRef::new(EntityType::Branch, EntityId::new());
        let first = f.service.recalculate(&entity).await.unwrap();
        assert_eq!(first.score, 100.0);

        for _ in 0..7 {
            f.capas.create(capa(entity, CapaStatus::Open, 0)).await.unwrap();
        }
        let second = f.service.recalculate(&entity).await.unwrap();
        assert!(second.score < first.score);

        let stored = f.scores.get(&entity).await.unwrap().unwrap();
        assert_eq!(stored.score, second.score);
    }
}
