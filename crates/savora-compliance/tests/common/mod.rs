//! Common test utilities for savora-compliance integration tests.
//!
//! All tests run against the in-memory store and port implementations for
//! isolation and speed; no external services are involved.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use savora_compliance::activity::InMemoryActivityStore;
use savora_compliance::ports::{
    EntityInfo, InMemoryEntityDirectory, InMemoryEvidenceStore, InMemoryIdentityDirectory,
    InMemoryNotificationSink, InMemoryTemplateCatalog, Notifier, ScoringConfig, SupplierProfile,
    Template, TemplateItem, TemplateSection, User,
};
use savora_compliance::services::audit::{AuditService, InMemoryAuditStore};
use savora_compliance::services::capa::{CapaService, InMemoryCapaStore};
use savora_compliance::services::finding::{FindingService, InMemoryFindingStore};
use savora_compliance::services::plan::{InMemoryPlanStore, PlanService};
use savora_compliance::services::scoring::{InMemoryHealthScoreStore, ScoringService};
use savora_compliance::services::VerificationService;
use savora_core::{EntityId, EntityRef, EntityType, TemplateId, UserId, UserRole};

/// All the in-memory stores for one isolated test run.
#[derive(Clone)]
pub struct TestStores {
    pub audits: Arc<InMemoryAuditStore>,
    pub capas: Arc<InMemoryCapaStore>,
    pub findings: Arc<InMemoryFindingStore>,
    pub plans: Arc<InMemoryPlanStore>,
    pub activity: Arc<InMemoryActivityStore>,
    pub scores: Arc<InMemoryHealthScoreStore>,
}

/// Port implementations backing one test run.
#[derive(Clone)]
pub struct TestPorts {
    pub identity: Arc<InMemoryIdentityDirectory>,
    pub entities: Arc<InMemoryEntityDirectory>,
    pub templates: Arc<InMemoryTemplateCatalog>,
    pub sink: Arc<InMemoryNotificationSink>,
    pub evidence: Arc<InMemoryEvidenceStore>,
}

/// Full engine wiring over in-memory backends.
pub struct TestContext {
    pub stores: TestStores,
    pub ports: TestPorts,
    pub audits: AuditService,
    pub plans: PlanService,
    pub findings: FindingService,
    pub capas: CapaService,
    pub verification: VerificationService,
    pub scoring: Arc<ScoringService>,
}

impl TestContext {
    /// Wire up a fresh, fully isolated engine.
    pub fn new() -> Self {
        let stores = TestStores {
            audits: Arc::new(InMemoryAuditStore::new()),
            capas: Arc::new(InMemoryCapaStore::new()),
            findings: Arc::new(InMemoryFindingStore::new()),
            plans: Arc::new(InMemoryPlanStore::new()),
            activity: Arc::new(InMemoryActivityStore::new()),
            scores: Arc::new(InMemoryHealthScoreStore::new()),
        };
        let ports = TestPorts {
            identity: Arc::new(InMemoryIdentityDirectory::new()),
            entities: Arc::new(InMemoryEntityDirectory::new()),
            templates: Arc::new(InMemoryTemplateCatalog::new()),
            sink: Arc::new(InMemoryNotificationSink::new()),
            evidence: Arc::new(InMemoryEvidenceStore::new()),
        };
        let notifier = Notifier::new(ports.sink.clone());
        let scoring = Arc::new(ScoringService::new(
            stores.audits.clone(),
            stores.capas.clone(),
            stores.activity.clone(),
            ports.entities.clone(),
            stores.scores.clone(),
        ));
        Self {
            audits: AuditService::new(stores.audits.clone()),
            plans: PlanService::new(
                stores.plans.clone(),
                stores.audits.clone(),
                ports.entities.clone(),
                ports.identity.clone(),
            ),
            findings: FindingService::new(
                stores.findings.clone(),
                stores.capas.clone(),
                stores.audits.clone(),
                ports.templates.clone(),
                ports.identity.clone(),
                ports.entities.clone(),
                stores.activity.clone(),
                notifier.clone(),
            ),
            capas: CapaService::new(stores.capas.clone(), stores.activity.clone()),
            verification: VerificationService::new(
                stores.audits.clone(),
                stores.capas.clone(),
                stores.findings.clone(),
                stores.activity.clone(),
                ports.identity.clone(),
                notifier,
                scoring.clone(),
            ),
            scoring,
            stores,
            ports,
        }
    }

    /// Register an active user with the given role.
    pub async fn seed_user(&self, name: &str, role: UserRole) -> UserId {
        let user = User {
            id: UserId::new(),
            name: name.to_string(),
            role,
            active: true,
            created_at: Utc::now(),
        };
        let id = user.id;
        self.ports.identity.add_user(user).await;
        id
    }

    /// Register an active branch with a manager, returning its reference.
    pub async fn seed_branch(&self, region: &str, manager_id: UserId) -> EntityRef {
        let id = EntityId::new();
        self.ports
            .entities
            .add_entity(EntityInfo {
                id,
                entity_type: EntityType::Branch,
                name: format!("branch-{region}"),
                active: true,
                region: Some(region.to_string()),
                manager_id: Some(manager_id),
            })
            .await;
        EntityRef::new(EntityType::Branch, id)
    }

    /// Register an active central kitchen, returning its reference.
    pub async fn seed_bck(&self, region: &str, manager_id: UserId) -> EntityRef {
        let id = EntityId::new();
        self.ports
            .entities
            .add_entity(EntityInfo {
                id,
                entity_type: EntityType::Bck,
                name: format!("bck-{region}"),
                active: true,
                region: Some(region.to_string()),
                manager_id: Some(manager_id),
            })
            .await;
        EntityRef::new(EntityType::Bck, id)
    }

    /// Register a supplier profile, returning its reference.
    pub async fn seed_supplier(&self, name: &str, certifications: Vec<String>) -> EntityRef {
        let id = EntityId::new();
        self.ports
            .entities
            .add_supplier(SupplierProfile {
                id,
                name: name.to_string(),
                quality_score: Some(90.0),
                certifications,
                destination_bcks: vec![],
            })
            .await;
        EntityRef::new(EntityType::Supplier, id)
    }

    /// Register the standard two-section hygiene template.
    ///
    /// `fridge-temp` (critical, 10 pts) and `freezer-temp` (10 pts) in the
    /// triple-weighted cold chain section, `floors` (5 pts) in cleanliness.
    /// Pass threshold 80 with the critical-fail rule on.
    pub async fn seed_template(&self) -> TemplateId {
        let id = TemplateId::new();
        self.ports
            .templates
            .add_template(Template {
                id,
                name: "Daily hygiene".into(),
                sections: vec![
                    TemplateSection {
                        name: "Cold chain".into(),
                        weight: 3.0,
                        items: vec![
                            TemplateItem {
                                id: "fridge-temp".into(),
                                points: 10.0,
                                critical: true,
                                category: "temperature".into(),
                            },
                            TemplateItem {
                                id: "freezer-temp".into(),
                                points: 10.0,
                                critical: false,
                                category: "temperature".into(),
                            },
                        ],
                    },
                    TemplateSection {
                        name: "Cleanliness".into(),
                        weight: 1.0,
                        items: vec![TemplateItem {
                            id: "floors".into(),
                            points: 5.0,
                            critical: false,
                            category: "hygiene".into(),
                        }],
                    },
                ],
                scoring: ScoringConfig {
                    pass_threshold: 80.0,
                    critical_fail: true,
                },
            })
            .await;
        id
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
