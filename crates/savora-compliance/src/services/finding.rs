//! Checklist recording: scoring responses, raising findings, generating
//! CAPAs.
//!
//! Scoring is failure-driven: every item starts earned and failed items
//! subtract their points from their section; sections combine by weight.
//! Each failed item raises exactly one finding, and each finding gets
//! exactly one CAPA with a severity-derived due date.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use savora_core::{AuditId, CapaId, EntityType, FindingId, UserId, UserRole};

use crate::activity::{Actor, ActivityStore, CapaAction, CapaActivityInput};
use crate::error::{ComplianceError, Result};
use crate::ports::{
    EntityDirectory, IdentityDirectory, NotificationKind, Notifier, Template, TemplateCatalog,
};
use crate::services::audit::AuditStore;
use crate::services::capa::CapaStore;
use crate::types::{
    format_code, Audit, AuditResult, AuditStatus, Capa, CapaStatus, Finding, FindingStatus,
    Severity, CAPA_CODE_PREFIX, FINDING_CODE_PREFIX,
};

/// One auditor answer to one checklist item.
#[derive(Debug, Clone)]
pub struct ChecklistResponse {
    /// The answered item.
    pub item_id: String,
    /// Whether the item passed.
    pub passed: bool,
    /// Auditor-chosen severity for a failure. Ignored for passes and for
    /// critical items, which always raise critical findings.
    pub severity: Option<Severity>,
    /// What was observed.
    pub note: Option<String>,
}

/// The result of recording a checklist: the scored outcome plus everything
/// it raised.
#[derive(Debug, Clone)]
pub struct ChecklistOutcome {
    /// Weighted score and pass/fail, now held on the audit.
    pub result: AuditResult,
    /// Findings raised, one per failed item.
    pub findings: Vec<Finding>,
    /// CAPAs generated, one per finding.
    pub capas: Vec<Capa>,
}

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for finding storage backends.
#[async_trait::async_trait]
pub trait FindingStore: Send + Sync {
    /// Get a finding by ID.
    async fn get(&self, id: FindingId) -> Result<Option<Finding>>;

    /// Persist a new finding.
    async fn create(&self, finding: Finding) -> Result<Finding>;

    /// Replace a finding.
    async fn update(&self, finding: Finding) -> Result<Option<Finding>>;

    /// All findings raised during one audit, code order.
    async fn list_by_audit(&self, audit_id: AuditId) -> Result<Vec<Finding>>;

    /// Next free sequence number for the `FND-<year>-` code prefix.
    async fn next_code_number(&self, year: i32) -> Result<u32>;
}

/// In-memory finding store for testing.
#[derive(Debug, Default)]
pub struct InMemoryFindingStore {
    findings: Arc<RwLock<HashMap<FindingId, Finding>>>,
}

impl InMemoryFindingStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl FindingStore for InMemoryFindingStore {
    async fn get(&self, id: FindingId) -> Result<Option<Finding>> {
        Ok(self.findings.read().await.get(&id).cloned())
    }

    async fn create(&self, finding: Finding) -> Result<Finding> {
        self.findings
            .write()
            .await
            .insert(finding.id, finding.clone());
        Ok(finding)
    }

    async fn update(&self, finding: Finding) -> Result<Option<Finding>> {
        let mut findings = self.findings.write().await;
        if findings.contains_key(&finding.id) {
            findings.insert(finding.id, finding.clone());
            Ok(Some(finding))
        } else {
            Ok(None)
        }
    }

    async fn list_by_audit(&self, audit_id: AuditId) -> Result<Vec<Finding>> {
        let findings = self.findings.read().await;
        let mut results: Vec<_> = findings
            .values()
            .filter(|f| f.audit_id == audit_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(results)
    }

    async fn next_code_number(&self, year: i32) -> Result<u32> {
        let findings = self.findings.read().await;
        let prefix = format!("{FINDING_CODE_PREFIX}-{year}-");
        let highest = findings
            .values()
            .filter_map(|f| f.code.strip_prefix(&prefix))
            .filter_map(|seq| seq.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// Weighted checklist score for a set of responses against a template.
///
/// Per section: earned = total points minus the points of failed items,
/// section percentage = earned / total * 100 (a section with no scored
/// items counts as 100). Sections combine by their weight share.
#[must_use]
pub fn score_responses(template: &Template, responses: &[ChecklistResponse]) -> AuditResult {
    let failed: std::collections::HashSet<&str> = responses
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.item_id.as_str())
        .collect();

    let total_weight: f64 = template.sections.iter().map(|s| s.weight).sum();
    let mut score = 0.0;
    let mut critical_failed = false;

    for section in &template.sections {
        let total_points: f64 = section.items.iter().map(|i| i.points).sum();
        let failed_points: f64 = section
            .items
            .iter()
            .filter(|i| failed.contains(i.id.as_str()))
            .map(|i| i.points)
            .sum();
        critical_failed |= section
            .items
            .iter()
            .any(|i| i.critical && failed.contains(i.id.as_str()));

        let pct = if total_points > 0.0 {
            (total_points - failed_points) / total_points * 100.0
        } else {
            100.0
        };
        if total_weight > 0.0 {
            score += pct * (section.weight / total_weight);
        }
    }
    if total_weight <= 0.0 {
        score = 100.0;
    }

    let passed = score >= template.scoring.pass_threshold
        && !(template.scoring.critical_fail && critical_failed);
    AuditResult { score, passed }
}

// ============================================================================
// Service
// ============================================================================

/// Service that turns checklist responses into findings and CAPAs.
pub struct FindingService {
    findings: Arc<dyn FindingStore>,
    capas: Arc<dyn CapaStore>,
    audits: Arc<dyn AuditStore>,
    templates: Arc<dyn TemplateCatalog>,
    identity: Arc<dyn IdentityDirectory>,
    entities: Arc<dyn EntityDirectory>,
    activity: Arc<dyn ActivityStore>,
    notifier: Notifier,
}

impl FindingService {
    /// Create a new finding service.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        findings: Arc<dyn FindingStore>,
        capas: Arc<dyn CapaStore>,
        audits: Arc<dyn AuditStore>,
        templates: Arc<dyn TemplateCatalog>,
        identity: Arc<dyn IdentityDirectory>,
        entities: Arc<dyn EntityDirectory>,
        activity: Arc<dyn ActivityStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            findings,
            capas,
            audits,
            templates,
            identity,
            entities,
            activity,
            notifier,
        }
    }

    /// Get a finding by ID.
    pub async fn get_finding(&self, id: FindingId) -> Result<Finding> {
        self.findings
            .get(id)
            .await?
            .ok_or(ComplianceError::FindingNotFound(id))
    }

    /// All findings raised during one audit.
    pub async fn findings_for_audit(&self, audit_id: AuditId) -> Result<Vec<Finding>> {
        self.findings.list_by_audit(audit_id).await
    }

    /// Record the checklist for an in-progress audit.
    ///
    /// Scores the responses, raises one finding per failed item, generates
    /// one CAPA per finding, and stores the outcome on the audit for later
    /// submission. The CAPA assignee is resolved before anything is
    /// written, so a directory gap fails the whole recording.
    #[instrument(skip(self, responses), fields(audit_id = %audit_id, responses = responses.len()))]
    pub async fn record_checklist_responses(
        &self,
        audit_id: AuditId,
        responses: &[ChecklistResponse],
        recorded_by: UserId,
    ) -> Result<ChecklistOutcome> {
        let audit = self
            .audits
            .get(audit_id)
            .await?
            .ok_or(ComplianceError::AuditNotFound(audit_id))?;
        if audit.status != AuditStatus::InProgress {
            return Err(ComplianceError::InvalidTransition {
                from: audit.status.to_string(),
                to: AuditStatus::Submitted.to_string(),
            });
        }
        let template = self
            .templates
            .get_template(audit.template_id)
            .await?
            .ok_or(ComplianceError::TemplateNotFound(audit.template_id))?;

        let result = score_responses(&template, responses);
        let assignee = self.resolve_assignee(&audit).await?;

        let now = Utc::now();
        let year = now.year();
        let mut findings = Vec::new();
        let mut capas = Vec::new();
        for response in responses.iter().filter(|r| !r.passed) {
            let Some((section, item)) = template.find_item(&response.item_id) else {
                warn!(item_id = %response.item_id, "response references unknown checklist item");
                continue;
            };
            let severity = if item.critical {
                Severity::Critical
            } else {
                response.severity.unwrap_or(Severity::Medium)
            };

            let finding_seq = self.findings.next_code_number(year).await?;
            let finding = self
                .findings
                .create(Finding {
                    id: FindingId::new(),
                    code: format_code(FINDING_CODE_PREFIX, year, finding_seq),
                    audit_id,
                    item_id: item.id.clone(),
                    section_name: section.name.clone(),
                    category: item.category.clone(),
                    severity,
                    status: FindingStatus::Open,
                    description: response.note.clone().unwrap_or_default(),
                    created_at: now,
                })
                .await?;

            let capa_seq = self.capas.next_code_number(year).await?;
            let capa = self
                .capas
                .create(Capa {
                    id: CapaId::new(),
                    code: format_code(CAPA_CODE_PREFIX, year, capa_seq),
                    finding_id: finding.id,
                    audit_id,
                    entity: audit.entity,
                    description: format!(
                        "Correct failed item {} ({})",
                        item.id, section.name
                    ),
                    assigned_to: assignee,
                    due_date: (now + Duration::days(severity.capa_due_days())).date_naive(),
                    status: CapaStatus::Open,
                    priority: severity,
                    evidence_urls: Vec::new(),
                    notes: None,
                    sub_tasks: Vec::new(),
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            self.activity
                .append(CapaActivityInput {
                    capa_id: capa.id,
                    actor: Actor::User(recorded_by),
                    action: CapaAction::Created,
                    details: format!("from finding {}", finding.code),
                })
                .await?;
            self.notifier
                .send(
                    assignee,
                    NotificationKind::CapaAssigned,
                    &format!("CAPA {} assigned", capa.code),
                    &format!(
                        "A {} priority corrective action is due by {}",
                        capa.priority, capa.due_date
                    ),
                    Some(&format!("/capas/{}", capa.id)),
                )
                .await;

            findings.push(finding);
            capas.push(capa);
        }

        // Findings and CAPAs are created strictly 1:1.
        debug_assert_eq!(findings.len(), capas.len());

        let mut updated = audit.clone();
        updated.submission = Some(result);
        updated.updated_at = now;
        if !self
            .audits
            .update_guarded(updated, AuditStatus::InProgress)
            .await?
        {
            return Err(ComplianceError::ConcurrentUpdate(audit.code));
        }

        info!(
            code = %audit.code,
            score = result.score,
            passed = result.passed,
            findings = findings.len(),
            "checklist recorded"
        );
        Ok(ChecklistOutcome {
            result,
            findings,
            capas,
        })
    }

    /// Resolve who works the CAPAs for this audit's entity.
    ///
    /// Branches and kitchens go to their directory manager; a missing
    /// manager falls back to the first active audit manager. Supplier
    /// findings always go to the first active audit manager.
    async fn resolve_assignee(&self, audit: &Audit) -> Result<UserId> {
        if audit.entity.entity_type != EntityType::Supplier {
            let info = self
                .entities
                .get(&audit.entity)
                .await?
                .ok_or(ComplianceError::EntityNotFound(audit.entity))?;
            if let Some(manager) = info.manager_id {
                return Ok(manager);
            }
            warn!(entity = %audit.entity, "entity has no manager; falling back to audit manager");
        }
        let managers = self.identity.users_by_role(UserRole::AuditManager).await?;
        managers
            .first()
            .map(|m| m.id)
            .ok_or(ComplianceError::NoAssigneeAvailable(audit.entity))
    }
}

// ============================================================================
// Tests
// ============================================================================
