//! PostgreSQL finding store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use savora_compliance::services::finding::FindingStore;
use savora_compliance::types::Finding;
use savora_compliance::Result;
use savora_core::{AuditId, FindingId};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::convert::{enum_from_text, enum_to_text};
use crate::error::DbError;

/// Finding store backed by the `findings` table.
#[derive(Debug, Clone)]
pub struct PgFindingStore {
    pool: PgPool,
}

impl PgFindingStore {
    /// Create a store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct FindingRow {
    id: Uuid,
    code: String,
    audit_id: Uuid,
    item_id: String,
    section_name: String,
    category: String,
    severity: String,
    status: String,
    description: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<FindingRow> for Finding {
    type Error = DbError;

    fn try_from(row: FindingRow) -> std::result::Result<Self, DbError> {
        Ok(Finding {
            id: row.id.into(),
            code: row.code,
            audit_id: row.audit_id.into(),
            item_id: row.item_id,
            section_name: row.section_name,
            category: row.category,
            severity: enum_from_text(&row.severity)?,
            status: enum_from_text(&row.status)?,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl FindingStore for PgFindingStore {
    async fn get(&self, id: FindingId) -> Result<Option<Finding>> {
        let row: Option<FindingRow> = sqlx::query_as("SELECT * FROM findings WHERE id = $1")
            .bind(id.into_inner())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::QueryFailed)?;
        Ok(row.map(TryInto::try_into).transpose()?)
    }

    async fn create(&self, finding: Finding) -> Result<Finding> {
        sqlx::query(
            r"
            INSERT INTO findings (
                id, code, audit_id, item_id, section_name, category,
                severity, status, description, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(finding.id.into_inner())
        .bind(&finding.code)
        .bind(finding.audit_id.into_inner())
        .bind(&finding.item_id)
        .bind(&finding.section_name)
        .bind(&finding.category)
        .bind(enum_to_text(&finding.severity)?)
        .bind(enum_to_text(&finding.status)?)
        .bind(&finding.description)
        .bind(finding.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(finding)
    }

    async fn update(&self, finding: Finding) -> Result<Option<Finding>> {
        let result = sqlx::query(
            "UPDATE findings SET severity = $2, status = $3, description = $4 WHERE id = $1",
        )
        .bind(finding.id.into_inner())
        .bind(enum_to_text(&finding.severity)?)
        .bind(enum_to_text(&finding.status)?)
        .bind(&finding.description)
        .execute(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok((result.rows_affected() == 1).then_some(finding))
    }

    async fn list_by_audit(&self, audit_id: AuditId) -> Result<Vec<Finding>> {
        let rows: Vec<FindingRow> =
            sqlx::query_as("SELECT * FROM findings WHERE audit_id = $1 ORDER BY code")
                .bind(audit_id.into_inner())
                .fetch_all(&self.pool)
                .await
                .map_err(DbError::QueryFailed)?;
        rows.into_iter()
            .map(|r| r.try_into().map_err(Into::into))
            .collect()
    }

    async fn next_code_number(&self, year: i32) -> Result<u32> {
        let prefix = format!("FND-{year}-%");
        let (max,): (Option<i32>,) = sqlx::query_as(
            "SELECT MAX(RIGHT(code, 5)::int) FROM findings WHERE code LIKE $1",
        )
        .bind(&prefix)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(u32::try_from(max.unwrap_or(0)).unwrap_or(0) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use savora_compliance::types::{FindingStatus, Severity};

    #[test]
    fn test_row_converts_to_domain_finding() {
        let row = FindingRow {
            id: Uuid::new_v4(),
            code: "FND-2026-00003".into(),
            audit_id: Uuid::new_v4(),
            item_id: "fridge-temp".into(),
            section_name: "Cold chain".into(),
            category: "temperature".into(),
            severity: "critical".into(),
            status: "resolved".into(),
            description: "walk-in fridge at 9C".into(),
            created_at: Utc::now(),
        };
        let finding: Finding = row.try_into().unwrap();
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.status, FindingStatus::Resolved);
    }
}
