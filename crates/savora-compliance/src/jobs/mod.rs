//! Background sweep jobs for the compliance workflow.
//!
//! Three periodic sweeps act on workflow state without user interaction:
//! - Escalation - promotes CAPAs overdue past the threshold and notifies
//!   the responsible managers
//! - Auto-approval - closes low-risk CAPAs with evidence and advances
//!   their audits toward verification
//! - Overdue audits - marks scheduled audits whose date has passed
//!
//! Each job exposes a `poll()` returning cycle statistics; the caller owns
//! the timer loop. One record failing is counted and skipped, never fatal
//! to the cycle.

pub mod auto_approval_job;
pub mod escalation_job;
pub mod overdue_audit_job;

pub use auto_approval_job::{AutoApprovalJob, AutoApprovalJobError, AutoApprovalStats};
pub use escalation_job::{EscalationJob, EscalationJobError, EscalationStats};
pub use overdue_audit_job::{OverdueAuditJob, OverdueAuditJobError, OverdueAuditStats};
