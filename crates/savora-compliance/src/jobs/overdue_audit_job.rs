//! Overdue sweep for scheduled audits.
//!
//! Marks scheduled audits whose date has passed as `overdue`. Audits
//! already in progress are left alone; `overdue` remains startable, so the
//! sweep only changes visibility, not what the auditor may do.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::services::audit::{AuditFilter, AuditStore};
use crate::services::ListOptions;
use crate::types::AuditStatus;

/// Default polling interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3600;

/// Default batch size for processing.
pub const DEFAULT_BATCH_SIZE: i64 = 100;

/// Errors from the overdue sweep.
#[derive(Debug, thiserror::Error)]
pub enum OverdueAuditJobError {
    /// Record store failure.
    #[error("Store error: {0}")]
    Store(String),
}

/// Statistics from one overdue poll cycle.
#[derive(Debug, Clone, Default)]
pub struct OverdueAuditStats {
    /// Scheduled audits past their date.
    pub scanned: usize,
    /// Audits marked overdue.
    pub marked_overdue: usize,
    /// Failed operations.
    pub failed: usize,
}

impl OverdueAuditStats {
    /// Merge stats from another instance.
    pub fn merge(&mut self, other: &OverdueAuditStats) {
        self.scanned += other.scanned;
        self.marked_overdue += other.marked_overdue;
        self.failed += other.failed;
    }
}

/// Job that marks past-date scheduled audits as overdue.
pub struct OverdueAuditJob {
    audits: Arc<dyn AuditStore>,
    batch_size: i64,
}

impl OverdueAuditJob {
    /// Create a new overdue audit job.
    pub fn new(audits: Arc<dyn AuditStore>) -> Self {
        Self {
            audits,
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
    pub async fn poll(&self) -> Result<OverdueAuditStats, OverdueAuditJobError> {
        let today = Utc::now().date_naive();
        let mut stats = OverdueAuditStats::default();

        let filter = AuditFilter {
            status: Some(AuditStatus::Scheduled),
            scheduled_before: Some(today),
            ..Default::default()
        };
        let options = ListOptions {
            limit: self.batch_size,
            offset: 0,
        };
        let past_due = self
            .audits
            .list(&filter, &options)
            .await
            .map_err(|e| OverdueAuditJobError::Store(e.to_string()))?;

        for audit in past_due {
            stats.scanned += 1;
            let mut updated = audit.clone();
            updated.status = AuditStatus::Overdue;
            updated.updated_at = Utc::now();
            match self
                .audits
                .update_guarded(updated, AuditStatus::Scheduled)
                .await
            {
                Ok(true) => stats.marked_overdue += 1,
                Ok(false) => {
                    // Started or cancelled since the list; nothing to do.
                    debug!(code = %audit.code, "audit changed under the sweep");
                }
                Err(e) => {
                    warn!(code = %audit.code, error = %e, "failed to mark audit overdue");
                    stats.failed += 1;
                }
            }
        }

        if stats.scanned > 0 {
            info!(
                scanned = stats.scanned,
                marked_overdue = stats.marked_overdue,
                failed = stats.failed,
                "completed overdue audit poll cycle"
            );
        } else {
            debug!("no scheduled audits past their date");
        }
        Ok(stats)
    }
}

// ============================================================================
// Tests
// ============================================================================
