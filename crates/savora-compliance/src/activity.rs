//! Append-only CAPA activity log.
//!
//! Every CAPA mutation appends one entry; entries are never updated or
//! deleted. The log is the sole source for historical "who/when"
//! reconstruction — on-time-closure and verification-pass scoring both read
//! it rather than any mutable field.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use savora_core::{ActivityId, CapaId, UserId};

use crate::error::Result;

/// Who performed an action: a user, or the engine's sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// A human user.
    User(UserId),
    /// Automated action (escalation or auto-approval sweep).
    System,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "{id}"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Action recorded on a CAPA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapaAction {
    /// CAPA was created from a finding.
    Created,
    /// Status changed by the assignee (open → in progress).
    StatusChanged,
    /// Evidence reference attached.
    EvidenceAdded,
    /// Working note added.
    NoteAdded,
    /// First submission for verification.
    Submitted,
    /// Submission after rework of a rejection.
    Resubmitted,
    /// Verifier approved the CAPA.
    Approved,
    /// Verifier rejected the CAPA.
    Rejected,
    /// Closed without human review by the auto-approval sweep.
    AutoApproved,
    /// Promoted to escalated by the escalation sweep.
    AutoEscalated,
    /// Sub-task added.
    SubtaskAdded,
    /// Sub-task started.
    SubtaskStarted,
    /// Sub-task completed.
    SubtaskCompleted,
    /// Sub-task deleted while pending.
    SubtaskDeleted,
}

impl std::fmt::Display for CapaAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::StatusChanged => "status_changed",
            Self::EvidenceAdded => "evidence_added",
            Self::NoteAdded => "note_added",
            Self::Submitted => "submitted",
            Self::Resubmitted => "resubmitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AutoApproved => "auto_approved",
            Self::AutoEscalated => "auto_escalated",
            Self::SubtaskAdded => "subtask_added",
            Self::SubtaskStarted => "subtask_started",
            Self::SubtaskCompleted => "subtask_completed",
            Self::SubtaskDeleted => "subtask_deleted",
        };
        write!(f, "{s}")
    }
}

impl CapaAction {
    /// Actions that mark a CAPA as closed, for on-time-closure scoring.
    #[must_use]
    pub fn is_closing(self) -> bool {
        matches!(self, Self::Approved | Self::AutoApproved)
    }
}

/// One append-only activity log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapaActivity {
    /// Unique identifier for the entry.
    pub id: ActivityId,
    /// The CAPA the entry belongs to.
    pub capa_id: CapaId,
    /// Who performed the action.
    pub actor: Actor,
    /// What happened.
    pub action: CapaAction,
    /// Free-text details (rejection reasons verbatim, overdue magnitude, ...).
    pub details: String,
    /// When the action happened.
    pub created_at: DateTime<Utc>,
}

/// Input for appending an activity entry.
#[derive(Debug, Clone)]
pub struct CapaActivityInput {
    /// The CAPA the entry belongs to.
    pub capa_id: CapaId,
    /// Who performed the action.
    pub actor: Actor,
    /// What happened.
    pub action: CapaAction,
    /// Free-text details.
    pub details: String,
}

/// Trait for activity log storage backends.
///
/// Deliberately has no update or delete: the log is append-only.
#[async_trait::async_trait]
pub trait ActivityStore: Send + Sync {
    /// Append an entry.
    async fn append(&self, input: CapaActivityInput) -> Result<CapaActivity>;

    /// All entries for one CAPA, oldest first.
    async fn list_for_capa(&self, capa_id: CapaId) -> Result<Vec<CapaActivity>>;
}

/// In-memory activity store for testing.
#[derive(Debug, Default)]
pub struct InMemoryActivityStore {
    entries: Arc<RwLock<Vec<CapaActivity>>>,
}

impl InMemoryActivityStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries across all CAPAs, insertion order. Test helper.
    pub async fn all(&self) -> Vec<CapaActivity> {
        self.entries.read().await.clone()
    }
}

#[async_trait::async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn append(&self, input: CapaActivityInput) -> Result<CapaActivity> {
        let entry = CapaActivity {
            id: ActivityId::new(),
            capa_id: input.capa_id,
            actor: input.actor,
            action: input.action,
            details: input.details,
            created_at: Utc::now(),
        };
        self.entries.write().await.push(entry.clone());
        Ok(entry)
    }

    async fn list_for_capa(&self, capa_id: CapaId) -> Result<Vec<CapaActivity>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.capa_id == capa_id)
            .cloned()
            .collect())
    }
}
