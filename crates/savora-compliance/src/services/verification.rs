//! Human verification gate: approving and rejecting CAPAs, approving and
//! flagging audits.
//!
//! Audit approval is the sole trigger for score recomputation, so the
//! scoring service hangs off this one. Flagging an audit never touches its
//! CAPAs.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use savora_core::{AuditId, CapaId, UserId, UserRole};

use crate::activity::{Actor, ActivityStore, CapaAction, CapaActivityInput};
use crate::error::{ComplianceError, Result};
use crate::ports::{IdentityDirectory, NotificationKind, Notifier};
use crate::services::audit::AuditStore;
use crate::services::capa::CapaStore;
use crate::services::finding::FindingStore;
use crate::services::scoring::ScoringService;
use crate::types::{Audit, AuditStatus, Capa, CapaStatus, FindingStatus};

/// Service for verifier-side operations.
pub struct VerificationService {
    audits: Arc<dyn AuditStore>,
    capas: Arc<dyn CapaStore>,
    findings: Arc<dyn FindingStore>,
    activity: Arc<dyn ActivityStore>,
    identity: Arc<dyn IdentityDirectory>,
    notifier: Notifier,
    scoring: Arc<ScoringService>,
}

impl VerificationService {
    /// Create a new verification service.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        audits: Arc<dyn AuditStore>,
        capas: Arc<dyn CapaStore>,
        findings: Arc<dyn FindingStore>,
        activity: Arc<dyn ActivityStore>,
        identity: Arc<dyn IdentityDirectory>,
        notifier: Notifier,
        scoring: Arc<ScoringService>,
    ) -> Self {
        Self {
            audits,
            capas,
            findings,
            activity,
            identity,
            notifier,
            scoring,
        }
    }

    /// Approve a CAPA: close it and resolve its finding.
    #[instrument(skip(self), fields(capa_id = %capa_id))]
    pub async fn approve_capa(&self, capa_id: CapaId, verifier: UserId) -> Result<Capa> {
        let mut capa = self.get_capa(capa_id).await?;
        if capa.status != CapaStatus::PendingVerification {
            return Err(ComplianceError::InvalidTransition {
                from: capa.status.to_string(),
                to: CapaStatus::Closed.to_string(),
            });
        }
        let expected = capa.status;
        capa.status = CapaStatus::Closed;
        capa.updated_at = Utc::now();
        let capa = self.commit_capa(capa, expected).await?;
        self.activity
            .append(CapaActivityInput {
                capa_id: capa.id,
                actor: Actor::User(verifier),
                action: CapaAction::Approved,
                details: String::new(),
            })
            .await?;
        self.resolve_finding(&capa).await?;
        info!(code = %capa.code, "capa approved");
        Ok(capa)
    }

    /// Reject a CAPA back to the assignee for rework.
    ///
    /// The reason is mandatory and recorded verbatim in the activity log.
    #[instrument(skip(self, reason), fields(capa_id = %capa_id))]
    pub async fn reject_capa(
        &self,
        capa_id: CapaId,
        verifier: UserId,
        reason: &str,
    ) -> Result<Capa> {
        if reason.trim().is_empty() {
            return Err(ComplianceError::RejectReasonRequired);
        }
        let mut capa = self.get_capa(capa_id).await?;
        if capa.status != CapaStatus::PendingVerification {
            return Err(ComplianceError::InvalidTransition {
                from: capa.status.to_string(),
                to: CapaStatus::Rejected.to_string(),
            });
        }
        let expected = capa.status;
        capa.status = CapaStatus::Rejected;
        capa.updated_at = Utc::now();
        let capa = self.commit_capa(capa, expected).await?;
        self.activity
            .append(CapaActivityInput {
                capa_id: capa.id,
                actor: Actor::User(verifier),
                action: CapaAction::Rejected,
                details: reason.to_string(),
            })
            .await?;
        self.notifier
            .send(
                capa.assigned_to,
                NotificationKind::CapaRejected,
                &format!("CAPA {} rejected", capa.code),
                &format!("Rework required: {reason}"),
                Some(&format!("/capas/{}", capa.id)),
            )
            .await;
        info!(code = %capa.code, "capa rejected");
        Ok(capa)
    }

    /// Approve an audit, publishing its score and recomputing the entity's
    /// health score.
    ///
    /// Every linked CAPA must be closed or approved; the error names the
    /// ones that are not.
    #[instrument(skip(self), fields(audit_id = %audit_id))]
    pub async fn approve_audit(&self, audit_id: AuditId) -> Result<Audit> {
        let mut audit = self.get_audit(audit_id).await?;
        if !audit.status.can_verify() {
            return Err(ComplianceError::InvalidTransition {
                from: audit.status.to_string(),
                to: AuditStatus::Approved.to_string(),
            });
        }
        let capas = self.capas.list_by_audit(audit_id).await?;
        let pending: Vec<String> = capas
            .iter()
            .filter(|c| !c.status.is_resolved())
            .map(|c| c.code.clone())
            .collect();
        if !pending.is_empty() {
            return Err(ComplianceError::CapasStillPending(pending));
        }
        let result = audit
            .submission
            .ok_or(ComplianceError::ChecklistNotRecorded(audit_id))?;

        let expected = audit.status;
        audit.status = AuditStatus::Approved;
        audit.score = Some(result.score);
        audit.pass_fail = Some(result.passed);
        audit.updated_at = Utc::now();
        let audit = self.commit_audit(audit, expected).await?;

        for finding in self.findings.list_by_audit(audit_id).await? {
            if finding.status != FindingStatus::Resolved {
                let mut resolved = finding;
                resolved.status = FindingStatus::Resolved;
                self.findings.update(resolved).await?;
            }
        }

        self.scoring.recalculate(&audit.entity).await?;
        info!(code = %audit.code, score = result.score, "audit approved");
        Ok(audit)
    }

    /// Flag an audit back with a reason; notifies all audit managers.
    ///
    /// CAPA state is left untouched.
    #[instrument(skip(self, reason), fields(audit_id = %audit_id))]
    pub async fn flag_audit(&self, audit_id: AuditId, reason: &str) -> Result<Audit> {
        if reason.trim().is_empty() {
            return Err(ComplianceError::RejectReasonRequired);
        }
        let mut audit = self.get_audit(audit_id).await?;
        if !audit.status.can_verify() {
            return Err(ComplianceError::InvalidTransition {
                from: audit.status.to_string(),
                to: AuditStatus::Rejected.to_string(),
            });
        }
        let expected = audit.status;
        audit.status = AuditStatus::Rejected;
        audit.updated_at = Utc::now();
        let audit = self.commit_audit(audit, expected).await?;

        for manager in self.identity.users_by_role(UserRole::AuditManager).await? {
            self.notifier
                .send(
                    manager.id,
                    NotificationKind::AuditFlagged,
                    &format!("Audit {} flagged", audit.code),
                    reason,
                    Some(&format!("/audits/{}", audit.id)),
                )
                .await;
        }
        info!(code = %audit.code, "audit flagged");
        Ok(audit)
    }

    async fn resolve_finding(&self, capa: &Capa) -> Result<()> {
        let finding = self
            .findings
            .get(capa.finding_id)
            .await?
            .ok_or(ComplianceError::FindingNotFound(capa.finding_id))?;
        if finding.status != FindingStatus::Resolved {
            let mut resolved = finding;
            resolved.status = FindingStatus::Resolved;
            self.findings.update(resolved).await?;
        }
        Ok(())
    }

    async fn get_capa(&self, id: CapaId) -> Result<Capa> {
        self.capas
            .get(id)
            .await?
            .ok_or(ComplianceError::CapaNotFound(id))
    }

    async fn get_audit(&self, id: AuditId) -> Result<Audit> {
        self.audits
            .get(id)
            .await?
            .ok_or(ComplianceError::AuditNotFound(id))
    }

    async fn commit_capa(&self, capa: Capa, expected: CapaStatus) -> Result<Capa> {
        if self.capas.update_guarded(capa.clone(), expected).await? {
            Ok(capa)
        } else {
            Err(ComplianceError::ConcurrentUpdate(capa.code))
        }
    }

    async fn commit_audit(&self, audit: Audit, expected: AuditStatus) -> Result<Audit> {
        if self.audits.update_guarded(audit.clone(), expected).await? {
            Ok(audit)
        } else {
            Err(ComplianceError::ConcurrentUpdate(audit.code))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
