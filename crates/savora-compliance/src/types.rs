//! Domain records and status enums for the compliance workflow.
//!
//! Status enums carry their transition guards as methods so every service
//! checks the same rules; records are plain data mutated through the store
//! ports with a commit-time status re-check.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

use savora_core::{
    AuditId, CapaId, EntityId, EntityRef, EntityType, FindingId, PlanId, SubTaskId, TemplateId,
    UserId,
};

/// Human-facing code prefixes, persisted bit-exactly.
pub const AUDIT_CODE_PREFIX: &str = "AUD";
/// Finding code prefix.
pub const FINDING_CODE_PREFIX: &str = "FND";
/// CAPA code prefix.
pub const CAPA_CODE_PREFIX: &str = "CPA";

/// Format a human-facing record code: `<prefix>-<year>-<5 digits>`.
///
/// Numbering is "highest existing number with this year prefix, plus one",
/// allocated by the store; this only renders the format.
#[must_use]
pub fn format_code(prefix: &str, year: i32, seq: u32) -> String {
    format!("{prefix}-{year}-{seq:05}")
}

// ============================================================================
// Audit
// ============================================================================

/// Status of an individual audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Scheduled, waiting for the auditor to begin.
    Scheduled,
    /// The auditor is on site working the checklist.
    InProgress,
    /// Checklist finalized; CAPAs may still be open.
    Submitted,
    /// All CAPAs sufficiently resolved; waiting for a verifier.
    PendingVerification,
    /// Verified and scored. Terminal.
    Approved,
    /// Flagged by a verifier ("send back"). Terminal here; re-entry is an
    /// external re-scheduling action.
    Rejected,
    /// Scheduled date passed without the audit starting.
    Overdue,
    /// Explicitly cancelled. Terminal.
    Cancelled,
}

impl AuditStatus {
    /// Whether the audit can be started.
    #[must_use]
    pub fn can_start(self) -> bool {
        matches!(self, Self::Scheduled | Self::Overdue)
    }

    /// Whether the audit can be submitted.
    #[must_use]
    pub fn can_submit(self) -> bool {
        matches!(self, Self::InProgress)
    }

    /// Whether a verifier may act on the audit (approve or flag).
    #[must_use]
    pub fn can_verify(self) -> bool {
        matches!(self, Self::Submitted | Self::PendingVerification)
    }

    /// Whether the audit may still be cancelled (any pre-approval state).
    #[must_use]
    pub fn can_cancel(self) -> bool {
        !matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }

    /// Whether the audit is in a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::PendingVerification => "pending_verification",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// The outcome computed when checklist responses are finalized.
///
/// Held on the audit from submission onward; copied into the public
/// `score`/`pass_fail` fields only when the audit reaches `approved`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    /// Weighted checklist score, 0-100.
    pub score: f64,
    /// Pass/fail against the template's scoring config.
    pub passed: bool,
}

/// One scheduled compliance check of one entity against one template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    /// Unique identifier.
    pub id: AuditId,
    /// Human code, `AUD-<year>-<5 digits>`. Immutable once allocated.
    pub code: String,
    /// The plan that generated this audit, if any.
    pub plan_id: Option<PlanId>,
    /// Checklist template the audit is conducted against.
    pub template_id: TemplateId,
    /// The audited entity.
    pub entity: EntityRef,
    /// Assigned auditor; `None` until assigned.
    pub auditor_id: Option<UserId>,
    /// Date the audit is scheduled for.
    pub scheduled_date: NaiveDate,
    /// When the auditor started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the checklist was finalized.
    pub completed_at: Option<DateTime<Utc>>,
    /// Current lifecycle status.
    pub status: AuditStatus,
    /// Checklist outcome recorded at submission; source for `score` at approval.
    pub submission: Option<AuditResult>,
    /// Final score. Set only when the audit reaches `approved`.
    pub score: Option<f64>,
    /// Final pass/fail. Set only when the audit reaches `approved`.
    pub pass_fail: Option<bool>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Audit plans
// ============================================================================

/// How often a recurring plan generates audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

/// Recurrence pattern of an audit plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    /// A single audit on one date.
    OneTime {
        /// The scheduled date.
        date: NaiveDate,
    },
    /// A repeating schedule.
    Recurring {
        /// How often the pattern repeats.
        frequency: Frequency,
        /// Matching weekdays, for weekly frequency.
        #[serde(default)]
        days_of_week: Vec<Weekday>,
        /// Matching day of month, for monthly frequency.
        day_of_month: Option<u32>,
        /// First date the pattern applies.
        start_date: NaiveDate,
        /// Last date the pattern applies, inclusive.
        end_date: Option<NaiveDate>,
    },
}

impl Recurrence {
    /// Whether the pattern generates an audit on `date`.
    #[must_use]
    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Self::OneTime { date: d } => *d == date,
            Self::Recurring {
                frequency,
                days_of_week,
                day_of_month,
                start_date,
                end_date,
            } => {
                if date < *start_date {
                    return false;
                }
                if end_date.is_some_and(|end| date > end) {
                    return false;
                }
                match frequency {
                    Frequency::Daily => true,
                    Frequency::Weekly => days_of_week.contains(&date.weekday()),
                    Frequency::Monthly => *day_of_month == Some(date.day()),
                }
            }
        }
    }
}

/// Which entities a plan covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanScope {
    /// All currently-active entities of the plan's entity type.
    AllActive,
    /// An explicit list of entity ids.
    Entities(Vec<EntityId>),
}

/// How auditors are assigned to generated audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Cycle through active auditors ordered by (open audits, name).
    AutoRoundRobin,
    /// Always assign the same auditor.
    AssignSpecific(UserId),
    /// Leave unassigned for manual dispatch.
    Manual,
}

/// Status of an audit plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

impl PlanStatus {
    /// Only draft plans may be edited.
    #[must_use]
    pub fn can_edit(self) -> bool {
        matches!(self, Self::Draft)
    }

    /// Only active plans generate audits.
    #[must_use]
    pub fn can_expand(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// A recurrence template that generates audits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPlan {
    /// Unique identifier.
    pub id: PlanId,
    /// Display name.
    pub name: String,
    /// Kind of entity the plan audits.
    pub entity_type: EntityType,
    /// Template the generated audits use.
    pub template_id: TemplateId,
    /// When audits are generated.
    pub recurrence: Recurrence,
    /// Which entities are covered.
    pub scope: PlanScope,
    /// How auditors are assigned.
    pub assignment: AssignmentStrategy,
    /// Plan status.
    pub status: PlanStatus,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Findings
// ============================================================================

/// Severity of a finding; mirrored onto its CAPA as priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Days from CAPA creation to its due date.
    #[must_use]
    pub fn capa_due_days(self) -> i64 {
        match self {
            Self::Critical => 3,
            Self::High => 7,
            Self::Medium => 14,
            Self::Low => 30,
        }
    }

    /// Whether CAPAs of this priority require a human verifier.
    ///
    /// Low/medium CAPAs with evidence are auto-approved by the sweep; only
    /// high and critical priorities always go through a person.
    #[must_use]
    pub fn requires_human_verification(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Status of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

/// A recorded non-conformance tied to one checklist item of one audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Unique identifier.
    pub id: FindingId,
    /// Human code, `FND-<year>-<5 digits>`.
    pub code: String,
    /// The audit this finding was recorded during.
    pub audit_id: AuditId,
    /// The failing checklist item.
    pub item_id: String,
    /// Section the item belongs to.
    pub section_name: String,
    /// Item category from the template.
    pub category: String,
    /// Severity.
    pub severity: Severity,
    /// Status.
    pub status: FindingStatus,
    /// What was observed.
    pub description: String,
    /// When recorded.
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// CAPA
// ============================================================================

/// Status of a corrective action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapaStatus {
    /// Created, not yet picked up.
    Open,
    /// Being worked by the assignee.
    InProgress,
    /// Submitted for verification.
    PendingVerification,
    /// Verified. Terminal, equivalent to closed.
    Approved,
    /// Sent back for rework.
    Rejected,
    /// Overdue and promoted for management visibility.
    Escalated,
    /// Done. Terminal.
    Closed,
}

impl CapaStatus {
    /// Whether the assignee can still work the CAPA (evidence, notes,
    /// sub-tasks).
    #[must_use]
    pub fn can_work(self) -> bool {
        matches!(
            self,
            Self::Open | Self::InProgress | Self::Rejected | Self::Escalated
        )
    }

    /// Whether the CAPA may be submitted for verification.
    ///
    /// Rejected CAPAs resubmit after rework; escalated CAPAs still need to
    /// reach resolution, so submission is allowed from there too.
    #[must_use]
    pub fn can_submit(self) -> bool {
        matches!(
            self,
            Self::Open | Self::InProgress | Self::Rejected | Self::Escalated
        )
    }

    /// Whether the escalation sweep may act on the CAPA. The guard is what
    /// makes the sweep idempotent.
    #[must_use]
    pub fn can_escalate(self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }

    /// Whether the CAPA counts as resolved for audit approval.
    #[must_use]
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Closed | Self::Approved)
    }

    /// Whether the CAPA blocks its audit from advancing to verification.
    ///
    /// An audit is ready once every CAPA is closed, approved, or at least
    /// submitted for verification.
    #[must_use]
    pub fn blocks_audit_readiness(self) -> bool {
        !matches!(self, Self::Closed | Self::Approved | Self::PendingVerification)
    }
}

impl fmt::Display for CapaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::PendingVerification => "pending_verification",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Status of a CAPA sub-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for SubTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// A unit of delegated work within a CAPA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    /// Unique identifier within the CAPA.
    pub id: SubTaskId,
    /// Who the sub-task is delegated to.
    pub assigned_to: UserId,
    /// What needs doing.
    pub description: String,
    /// Status.
    pub status: SubTaskStatus,
    /// Evidence references attached at the sub-task level.
    pub evidence_urls: Vec<String>,
    /// Set exactly once, on entering `completed`. Never cleared.
    pub completed_at: Option<DateTime<Utc>>,
}

/// The corrective-and-preventive action for exactly one finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capa {
    /// Unique identifier.
    pub id: CapaId,
    /// Human code, `CPA-<year>-<5 digits>`.
    pub code: String,
    /// The finding this CAPA remediates (1:1).
    pub finding_id: FindingId,
    /// The audit the finding was recorded during.
    pub audit_id: AuditId,
    /// Denormalized from the audit so CAPAs query independently.
    pub entity: EntityRef,
    /// What must be corrected.
    pub description: String,
    /// Who is responsible.
    pub assigned_to: UserId,
    /// Due date derived from the finding's severity at creation.
    pub due_date: NaiveDate,
    /// Status.
    pub status: CapaStatus,
    /// Mirrors the finding's severity.
    pub priority: Severity,
    /// Opaque evidence references, in attachment order.
    pub evidence_urls: Vec<String>,
    /// Free-text working notes.
    pub notes: Option<String>,
    /// Embedded sub-tasks; mutated via whole-record replace-on-write.
    pub sub_tasks: Vec<SubTask>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
}

impl Capa {
    /// Total evidence across the CAPA and all its sub-tasks.
    #[must_use]
    pub fn total_evidence_count(&self) -> usize {
        self.evidence_urls.len()
            + self
                .sub_tasks
                .iter()
                .map(|t| t.evidence_urls.len())
                .sum::<usize>()
    }

    /// Number of sub-tasks not yet completed.
    #[must_use]
    pub fn open_sub_tasks(&self) -> usize {
        self.sub_tasks
            .iter()
            .filter(|t| t.status != SubTaskStatus::Completed)
            .count()
    }

    /// Whole days past due at `today`; zero or negative means not overdue.
    #[must_use]
    pub fn days_past_due(&self, today: NaiveDate) -> i64 {
        (today - self.due_date).num_days()
    }
}

// ============================================================================
// Health score
// ============================================================================

/// One named component of a health score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    /// Component name, e.g. `audit_performance`.
    pub name: String,
    /// Raw value, clamped to [0, 100] before weighting.
    pub raw: f64,
    /// Weight applied to the component.
    pub weight: f64,
    /// `raw * weight`.
    pub weighted: f64,
}

/// The current health score snapshot for one entity.
///
/// A derived, idempotently-recomputable projection: recomputation
/// overwrites in place; `calculated_at` is the only "as of" signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthScoreRecord {
    /// The scored entity.
    pub entity: EntityRef,
    /// Weighted composite, 0-100, rounded to one decimal place.
    pub score: f64,
    /// Named components with raw values and weights.
    pub components: Vec<ScoreComponent>,
    /// When the score was computed.
    pub calculated_at: DateTime<Utc>,
}
