//! Auto-approval sweep for low-risk CAPAs.
//!
//! Closes pending-verification CAPAs whose priority does not require a
//! human verifier, provided at least one evidence item exists, resolving
//! their findings. High and critical CAPAs are never touched. After the
//! closures, audits whose CAPAs no longer block readiness are advanced
//! from `submitted` to `pending_verification`, where a human takes over.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use savora_core::AuditId;

use crate::activity::{Actor, ActivityStore, CapaAction, CapaActivityInput};
use crate::services::audit::AuditStore;
use crate::services::capa::{CapaFilter, CapaStore};
use crate::services::finding::FindingStore;
use crate::services::ListOptions;
use crate::types::{AuditStatus, Capa, CapaStatus, FindingStatus};

/// Default polling interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3600;

/// Default batch size for processing.
pub const DEFAULT_BATCH_SIZE: i64 = 50;

/// Errors from the auto-approval sweep.
#[derive(Debug, thiserror::Error)]
pub enum AutoApprovalJobError {
    /// Record store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Processing failure for one record.
    #[error("Processing error: {0}")]
    Processing(String),
}

/// Statistics from one auto-approval poll cycle.
#[derive(Debug, Clone, Default)]
pub struct AutoApprovalStats {
    /// Pending-verification CAPAs examined.
    pub scanned: usize,
    /// CAPAs closed without human review.
    pub auto_approved: usize,
    /// Audits advanced to pending verification.
    pub audits_advanced: usize,
    /// Failed operations.
    pub failed: usize,
}

impl AutoApprovalStats {
    /// Merge stats from another instance.
    pub fn merge(&mut self, other: &AutoApprovalStats) {
        self.scanned += other.scanned;
        self.auto_approved += other.auto_approved;
        self.audits_advanced += other.audits_advanced;
        self.failed += other.failed;
    }
}

/// Job that auto-approves low-risk CAPAs and advances their audits.
pub struct AutoApprovalJob {
    capas: Arc<dyn CapaStore>,
    findings: Arc<dyn FindingStore>,
    audits: Arc<dyn AuditStore>,
    activity: Arc<dyn ActivityStore>,
    batch_size: i64,
}

impl AutoApprovalJob {
    /// Create a new auto-approval job.
    pub fn new(
        capas: Arc<dyn CapaStore>,
        findings: Arc<dyn FindingStore>,
        audits: Arc<dyn AuditStore>,
        activity: Arc<dyn ActivityStore>,
    ) -> Self {
        Self {
            capas,
            findings,
            audits,
            activity,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Create with custom batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run a single poll cycle.
    #[instrument(skip(self))]
    pub async fn poll(&self) -> Result<AutoApprovalStats, AutoApprovalJobError> {
        let mut stats = AutoApprovalStats::default();

        let filter = CapaFilter {
            statuses: vec![CapaStatus::PendingVerification],
            ..Default::default()
        };
        let options = ListOptions {
            limit: self.batch_size,
            offset: 0,
        };
        let pending = self
            .capas
            .list(&filter, &options)
            .await
            .map_err(|e| AutoApprovalJobError::Store(e.to_string()))?;

        let mut touched_audits: HashSet<AuditId> = HashSet::new();
        for capa in pending {
            if capa.priority.requires_human_verification() {
                continue;
            }
            stats.scanned += 1;
            if capa.total_evidence_count() == 0 {
                continue;
            }
            match self.auto_approve(&capa).await {
                Ok(()) => {
                    stats.auto_approved += 1;
                    touched_audits.insert(capa.audit_id);
                }
                Err(e) => {
                    warn!(code = %capa.code, error = %e, "failed to auto-approve capa");
                    stats.failed += 1;
                }
            }
        }

        for audit_id in touched_audits {
            match self.advance_audit(audit_id).await {
                Ok(true) => stats.audits_advanced += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(%audit_id, error = %e, "failed to advance audit");
                    stats.failed += 1;
                }
            }
        }

        if stats.scanned > 0 {
            info!(
                scanned = stats.scanned,
                auto_approved = stats.auto_approved,
                audits_advanced = stats.audits_advanced,
                failed = stats.failed,
                "completed auto-approval poll cycle"
            );
        } else {
            debug!("no capas eligible for auto-approval");
        }
        Ok(stats)
    }

    /// Close one CAPA without human review, resolving its finding.
    async fn auto_approve(&self, capa: &Capa) -> Result<(), AutoApprovalJobError> {
        let mut updated = capa.clone();
        updated.status = CapaStatus::Closed;
        updated.updated_at = Utc::now();
        let committed = self
            .capas
            .update_guarded(updated, CapaStatus::PendingVerification)
            .await
            .map_err(|e| AutoApprovalJobError::Store(e.to_string()))?;
        if !committed {
            return Err(AutoApprovalJobError::Processing(format!(
                "capa {} changed under the sweep",
                capa.code
            )));
        }

        self.activity
            .append(CapaActivityInput {
                capa_id: capa.id,
                actor: Actor::System,
                action: CapaAction::AutoApproved,
                details: format!("{} priority with evidence", capa.priority),
            })
            .await
            .map_err(|e| AutoApprovalJobError::Store(e.to_string()))?;

        if let Some(finding) = self
            .findings
            .get(capa.finding_id)
            .await
            .map_err(|e| AutoApprovalJobError::Store(e.to_string()))?
        {
            if finding.status != FindingStatus::Resolved {
                let mut resolved = finding;
                resolved.status = FindingStatus::Resolved;
                self.findings
                    .update(resolved)
                    .await
                    .map_err(|e| AutoApprovalJobError::Store(e.to_string()))?;
            }
        }
        info!(code = %capa.code, "capa auto-approved");
        Ok(())
    }

    /// Advance a submitted audit once no CAPA blocks readiness.
    async fn advance_audit(&self, audit_id: AuditId) -> Result<bool, AutoApprovalJobError> {
        let Some(audit) = self
            .audits
            .get(audit_id)
            .await
            .map_err(|e| AutoApprovalJobError::Store(e.to_string()))?
        else {
            return Err(AutoApprovalJobError::Processing(format!(
                "audit {audit_id} vanished"
            )));
        };
        if audit.status != AuditStatus::Submitted {
            return Ok(false);
        }
        let capas = self
            .capas
            .list_by_audit(audit_id)
            .await
            .map_err(|e| AutoApprovalJobError::Store(e.to_string()))?;
        if capas.iter().any(|c| c.status.blocks_audit_readiness()) {
            return Ok(false);
        }

        let mut updated = audit.clone();
        updated.status = AuditStatus::PendingVerification;
        updated.updated_at = Utc::now();
        let committed = self
            .audits
            .update_guarded(updated, AuditStatus::Submitted)
            .await
            .map_err(|e| AutoApprovalJobError::Store(e.to_string()))?;
        if committed {
            info!(code = %audit.code, "audit advanced to pending verification");
        }
        Ok(committed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::InMemoryActivityStore;
    use crate::services::audit::InMemoryAuditStore;
    use crate::services::capa::InMemoryCapaStore;
    use crate::services::finding::InMemoryFindingStore;
    use crate::types::{Audit, AuditResult, Capa, Finding, Severity};
    use chrono::Duration;
    use savora_core::{CapaId, EntityId, EntityRef, EntityType, FindingId, TemplateId, UserId};

    struct Fixture {
        job: AutoApprovalJob,
        capas: Arc<InMemoryCapaStore>,
        findings: Arc<InMemoryFindingStore>,
        audits: Arc<InMemoryAuditStore>,
        activity: Arc<InMemoryActivityStore>,
    }

    fn fixture() -> Fixture {
        let capas = Arc::new(InMemoryCapaStore::new());
        let findings = Arc::new(InMemoryFindingStore::new());
        let audits = Arc::new(InMemoryAuditStore::new());
        let activity = Arc::new(InMemoryActivityStore::new());
        Fixture {
            job: AutoApprovalJob::new(
                capas.clone(),
                findings.clone(),
                audits.clone(),
                activity.clone(),
            ),
            capas,
            findings,
            audits,
            activity,
        }
    }

    async fn seed_audit(f: &Fixture, status: AuditStatus) -> Audit {
        let now = Utc::now();
        f.audits
            .create(Audit {
                id: AuditId::new(),
                code: "AUD-2025-00001".into(),
                plan_id: None,
                template_id: TemplateId::new(),
                entity: EntityRef::new(EntityType::Branch, EntityId::new()),
                auditor_id: Some(UserId::new()),
                scheduled_date: now.date_naive(),
                started_at: Some(now),
                completed_at: Some(now),
                status,
                submission: Some(AuditResult {
                    score: 72.0,
                    passed: false,
                }),
                score: None,
                pass_fail: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }

    async fn seed_capa(
        f: &Fixture,
        audit: &Audit,
        priority: Severity,
        status: CapaStatus,
        evidence: usize,
    ) -> Capa {
        let now = Utc::now();
        let finding = f
            .findings
            .create(Finding {
                id: FindingId::new(),
                code: format!("FND-2025-{:05}", evidence + 1),
                audit_id: audit.id,
                item_id: "item".into(),
                section_name: "section".into(),
                category: "hygiene".into(),
                severity: priority,
                status: FindingStatus::Open,
                description: "bad".into(),
                created_at: now,
            })
            .await
            .unwrap();
        f.capas
            .create(Capa {
                id: CapaId::new(),
                code: format!("CPA-2025-{:05}", evidence + 1),
                finding_id: finding.id,
                audit_id: audit.id,
                entity: audit.entity,
                description: "fix".into(),
                assigned_to: UserId::new(),
                due_date: now.date_naive() + Duration::days(14),
                status,
                priority,
                evidence_urls: (0..evidence).map(|i| format!("evidence://{i}")).collect(),
                notes: None,
                sub_tasks: vec![],
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_auto_approves_low_priority_with_evidence() {
        let f = fixture();
        let audit = seed_audit(&f, AuditStatus::Submitted).await;
        let capa = seed_capa(&f, &audit, Severity::Low, CapaStatus::PendingVerification, 1).await;

        let stats = f.job.poll().await.unwrap();
        assert_eq!(stats.auto_approved, 1);
        assert_eq!(stats.audits_advanced, 1);

        let closed = f.capas.get(capa.id).await.unwrap().unwrap();
        assert_eq!(closed.status, CapaStatus::Closed);
        let finding = f.findings.get(capa.finding_id).await.unwrap().unwrap();
        assert_eq!(finding.status, FindingStatus::Resolved);

        let log = f.activity.list_for_capa(capa.id).await.unwrap();
        assert_eq!(log[0].actor, Actor::System);
        assert_eq!(log[0].action, CapaAction::AutoApproved);

        // Audit advanced: a human verifier takes over from here.
        let advanced = f.audits.get(audit.id).await.unwrap().unwrap();
        assert_eq!(advanced.status, AuditStatus::PendingVerification);
        assert!(advanced.score.is_none());
    }

    #[tokio::test]
    async fn test_never_touches_high_or_critical() {
        let f = fixture();
        let audit = seed_audit(&f, AuditStatus::Submitted).await;
        let high = seed_capa(&f, &audit, Severity::High, CapaStatus::PendingVerification, 2).await;
        let critical =
            seed_capa(&f, &audit, Severity::Critical, CapaStatus::PendingVerification, 2).await;

        let stats = f.job.poll().await.unwrap();
        assert_eq!(stats.scanned, 0);
        assert_eq!(stats.auto_approved, 0);

        for id in [high.id, critical.id] {
            assert_eq!(
                f.capas.get(id).await.unwrap().unwrap().status,
                CapaStatus::PendingVerification
            );
        }
    }

    #[tokio::test]
    async fn test_skips_capa_without_evidence() {
        let f = fixture();
        let audit = seed_audit(&f, AuditStatus::Submitted).await;
        let capa = seed_capa(&f, &audit, Severity::Medium, CapaStatus::PendingVerification, 0).await;

        let stats = f.job.poll().await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.auto_approved, 0);
        assert_eq!(
            f.capas.get(capa.id).await.unwrap().unwrap().status,
            CapaStatus::PendingVerification
        );
    }

    #[tokio::test]
    async fn test_audit_not_advanced_while_capa_blocks() {
        let f = fixture();
        let audit = seed_audit(&f, AuditStatus::Submitted).await;
        seed_capa(&f, &audit, Severity::Low, CapaStatus::PendingVerification, 1).await;
        // A second CAPA still being worked blocks readiness.
        seed_capa(&f, &audit, Severity::High, CapaStatus::InProgress, 0).await;

        let stats = f.job.poll().await.unwrap();
        assert_eq!(stats.auto_approved, 1);
        assert_eq!(stats.audits_advanced, 0);
        assert_eq!(
            f.audits.get(audit.id).await.unwrap().unwrap().status,
            AuditStatus::Submitted
        );
    }

    #[tokio::test]
    async fn test_pending_verification_capas_do_not_block_advance() {
        let f = fixture();
        let audit = seed_audit(&f, AuditStatus::Submitted).await;
        seed_capa(&f, &audit, Severity::Low, CapaStatus::PendingVerification, 1).await;
        // A high CAPA already submitted for human review does not block.
        seed_capa(&f, &audit, Severity::High, CapaStatus::PendingVerification, 1).await;

        let stats = f.job.poll().await.unwrap();
        assert_eq!(stats.auto_approved, 1);
        assert_eq!(stats.audits_advanced, 1);
    }

    #[tokio::test]
    async fn test_second_run_finds_nothing() {
        let f = fixture();
        let audit = seed_audit(&f, AuditStatus::Submitted).await;
        seed_capa(&f, &audit, Severity::Low, CapaStatus::PendingVerification, 1).await;

        f.job.poll().await.unwrap();
        let second = f.job.poll().await.unwrap();
        assert_eq!(second.scanned, 0);
        assert_eq!(second.auto_approved, 0);
        assert_eq!(second.audits_advanced, 0);
    }
}
