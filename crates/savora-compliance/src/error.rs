//! Error types for the compliance engine.
//!
//! Guard failures carry the specific, user-displayable reason for the
//! refusal; not-found errors are distinct per record type so callers can
//! tell "can't do this yet" from "this doesn't exist".

use savora_core::{AuditId, CapaId, EntityRef, FindingId, PlanId, SubTaskId, UserId};
use thiserror::Error;

/// Errors that can occur in compliance workflow operations.
#[derive(Debug, Error)]
pub enum ComplianceError {
    /// The requested status transition is not allowed from the current state.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Submission blocked: sub-tasks are still open.
    #[error("Cannot submit for verification: {open} sub-task(s) are not completed")]
    SubTasksIncomplete { open: usize },

    /// Submission blocked: no evidence attached.
    #[error("Cannot submit for verification: at least one evidence item is required")]
    EvidenceRequired,

    /// Rejections must carry a reason for the assignee.
    #[error("A rejection reason is required")]
    RejectReasonRequired,

    /// An active plan resolved to zero entities.
    #[error("Plan scope resolves to no entities")]
    PlanScopeEmpty,

    /// An active plan generated zero dates within the expansion horizon.
    #[error("Plan recurrence produces no audit dates within the expansion horizon")]
    PlanProducesNoAudits,

    /// Plans can only be edited while in draft.
    #[error("Plan {0} is not in draft status")]
    PlanNotDraft(PlanId),

    /// Only active plans may be expanded.
    #[error("Plan {0} is not active")]
    PlanNotActive(PlanId),

    /// Sub-tasks can only be deleted while pending.
    #[error("Sub-task {0} can only be deleted while pending")]
    SubTaskNotDeletable(SubTaskId),

    /// Completed sub-tasks cannot transition again.
    #[error("Sub-task {0} is already completed")]
    SubTaskAlreadyCompleted(SubTaskId),

    /// Audit approval blocked by unresolved CAPAs.
    #[error("Audit cannot be approved: CAPA(s) still pending: {}", .0.join(", "))]
    CapasStillPending(Vec<String>),

    /// No checklist result has been recorded for the audit.
    #[error("Audit {0} has no recorded checklist result")]
    ChecklistNotRecorded(AuditId),

    /// Round-robin assignment found no active auditors.
    #[error("No active auditors available for round-robin assignment")]
    NoAuditorsAvailable,

    /// No eligible assignee could be resolved for generated CAPAs.
    #[error("No eligible assignee for {0} findings: no active audit manager on file")]
    NoAssigneeAvailable(EntityRef),

    /// Audit not found.
    #[error("Audit not found: {0}")]
    AuditNotFound(AuditId),

    /// Plan not found.
    #[error("Plan not found: {0}")]
    PlanNotFound(PlanId),

    /// Finding not found.
    #[error("Finding not found: {0}")]
    FindingNotFound(FindingId),

    /// CAPA not found.
    #[error("CAPA not found: {0}")]
    CapaNotFound(CapaId),

    /// Sub-task not found within its CAPA.
    #[error("Sub-task not found: {0}")]
    SubTaskNotFound(SubTaskId),

    /// User not found in the identity directory.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Entity not found in the entity directory.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityRef),

    /// Template not found in the catalog.
    #[error("Template not found: {0}")]
    TemplateNotFound(savora_core::TemplateId),

    /// A concurrent writer changed the record between read and commit.
    #[error("Concurrent update detected on {0}; re-read and retry")]
    ConcurrentUpdate(String),

    /// Record store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Notification delivery failure. Never propagated past the send
    /// helper; carried here so sinks have a typed error to return.
    #[error("Notification error: {0}")]
    Notification(String),
}

/// Convenience Result type for the compliance engine.
pub type Result<T> = std::result::Result<T, ComplianceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_errors_are_user_displayable() {
        let err = ComplianceError::SubTasksIncomplete { open: 2 };
        assert_eq!(
            err.to_string(),
            "Cannot submit for verification: 2 sub-task(s) are not completed"
        );

        let err = ComplianceError::EvidenceRequired;
        assert!(err.to_string().contains("at least one evidence item"));
    }

    #[test]
    fn test_capas_still_pending_lists_codes() {
        let err =
            ComplianceError::CapasStillPending(vec!["CPA-2025-00001".into(), "CPA-2025-00002".into()]);
        assert!(err.to_string().contains("CPA-2025-00001, CPA-2025-00002"));
    }
}
