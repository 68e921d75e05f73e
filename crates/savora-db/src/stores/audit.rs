//! PostgreSQL audit store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use savora_compliance::services::audit::{AuditFilter, AuditStore};
use savora_compliance::services::ListOptions;
use savora_compliance::types::{Audit, AuditResult, AuditStatus};
use savora_compliance::Result;
use savora_core::{AuditId, EntityRef, UserId};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::convert::{enum_from_text, enum_to_text, from_json, to_json};
use crate::error::DbError;

/// Audit store backed by the `audits` table.
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    /// Create a store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: Uuid,
    code: String,
    plan_id: Option<Uuid>,
    template_id: Uuid,
    entity_type: String,
    entity_id: Uuid,
    auditor_id: Option<Uuid>,
    scheduled_date: NaiveDate,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    status: String,
    submission: Option<serde_json::Value>,
    score: Option<f64>,
    pass_fail: Option<bool>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for Audit {
    type Error = DbError;

    fn try_from(row: AuditRow) -> std::result::Result<Self, DbError> {
        let submission: Option<AuditResult> = row.submission.map(from_json).transpose()?;
        Ok(Audit {
            id: row.id.into(),
            code: row.code,
            plan_id: row.plan_id.map(Into::into),
            template_id: row.template_id.into(),
            entity: EntityRef {
                entity_type: enum_from_text(&row.entity_type)?,
                entity_id: row.entity_id.into(),
            },
            auditor_id: row.auditor_id.map(Into::into),
            scheduled_date: row.scheduled_date,
            started_at: row.started_at,
            completed_at: row.completed_at,
            status: enum_from_text(&row.status)?,
            submission,
            score: row.score,
            pass_fail: row.pass_fail,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Append the filter's WHERE clauses, continuing from `param_idx`.
/// Returns the next free parameter index.
fn push_filter_clauses(query: &mut String, filter: &AuditFilter, mut param_idx: usize) -> usize {
    if filter.status.is_some() {
        query.push_str(&format!(" AND status = ${param_idx}"));
        param_idx += 1;
    }
    if filter.entity_type.is_some() {
        query.push_str(&format!(" AND entity_type = ${param_idx}"));
        param_idx += 1;
    }
    if filter.entity_id.is_some() {
        query.push_str(&format!(" AND entity_id = ${param_idx}"));
        param_idx += 1;
    }
    if filter.plan_id.is_some() {
        query.push_str(&format!(" AND plan_id = ${param_idx}"));
        param_idx += 1;
    }
    if filter.auditor_id.is_some() {
        query.push_str(&format!(" AND auditor_id = ${param_idx}"));
        param_idx += 1;
    }
    if filter.scheduled_before.is_some() {
        query.push_str(&format!(" AND scheduled_date < ${param_idx}"));
        param_idx += 1;
    }
    param_idx
}

/// Bind the filter's values in the same order the clauses were pushed.
fn bind_filter<'q, O>(
    mut q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    filter: &'q AuditFilter,
    status_text: Option<String>,
    entity_type_text: Option<String>,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    if let Some(status) = status_text {
        q = q.bind(status);
    }
    if let Some(entity_type) = entity_type_text {
        q = q.bind(entity_type);
    }
    if let Some(entity_id) = filter.entity_id {
        q = q.bind(entity_id.into_inner());
    }
    if let Some(plan_id) = filter.plan_id {
        q = q.bind(plan_id.into_inner());
    }
    if let Some(auditor_id) = filter.auditor_id {
        q = q.bind(auditor_id.into_inner());
    }
    if let Some(before) = filter.scheduled_before {
        q = q.bind(before);
    }
    q
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn get(&self, id: AuditId) -> Result<Option<Audit>> {
        let row: Option<AuditRow> = sqlx::query_as("SELECT * FROM audits WHERE id = $1")
            .bind(id.into_inner())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::QueryFailed)?;
        Ok(row.map(TryInto::try_into).transpose()?)
    }

    async fn create(&self, audit: Audit) -> Result<Audit> {
        sqlx::query(
            r"
            INSERT INTO audits (
                id, code, plan_id, template_id, entity_type, entity_id,
                auditor_id, scheduled_date, started_at, completed_at,
                status, submission, score, pass_fail, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ",
        )
        .bind(audit.id.into_inner())
        .bind(&audit.code)
        .bind(audit.plan_id.map(savora_core::PlanId::into_inner))
        .bind(audit.template_id.into_inner())
        .bind(enum_to_text(&audit.entity.entity_type)?)
        .bind(audit.entity.entity_id.into_inner())
        .bind(audit.auditor_id.map(UserId::into_inner))
        .bind(audit.scheduled_date)
        .bind(audit.started_at)
        .bind(audit.completed_at)
        .bind(enum_to_text(&audit.status)?)
        .bind(audit.submission.as_ref().map(to_json).transpose()?)
        .bind(audit.score)
        .bind(audit.pass_fail)
        .bind(audit.created_at)
        .bind(audit.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(audit)
    }

    async fn update_guarded(&self, audit: Audit, expected: AuditStatus) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE audits SET
                auditor_id = $3, scheduled_date = $4, started_at = $5,
                completed_at = $6, status = $7, submission = $8,
                score = $9, pass_fail = $10, updated_at = $11
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(audit.id.into_inner())
        .bind(enum_to_text(&expected)?)
        .bind(audit.auditor_id.map(UserId::into_inner))
        .bind(audit.scheduled_date)
        .bind(audit.started_at)
        .bind(audit.completed_at)
        .bind(enum_to_text(&audit.status)?)
        .bind(audit.submission.as_ref().map(to_json).transpose()?)
        .bind(audit.score)
        .bind(audit.pass_fail)
        .bind(audit.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, filter: &AuditFilter, options: &ListOptions) -> Result<Vec<Audit>> {
        let mut query = String::from("SELECT * FROM audits WHERE TRUE");
        let next = push_filter_clauses(&mut query, filter, 1);
        query.push_str(&format!(
            " ORDER BY scheduled_date, code LIMIT ${} OFFSET ${}",
            next,
            next + 1
        ));

        let status_text = filter.status.as_ref().map(enum_to_text).transpose()?;
        let entity_type_text = filter.entity_type.as_ref().map(enum_to_text).transpose()?;

        let q = sqlx::query_as::<_, AuditRow>(&query);
        let rows = bind_filter(q, filter, status_text, entity_type_text)
            .bind(options.limit.max(0))
            .bind(options.offset.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::QueryFailed)?;

        rows.into_iter()
            .map(|r| r.try_into().map_err(Into::into))
            .collect()
    }

    async fn count(&self, filter: &AuditFilter) -> Result<i64> {
        let mut query = String::from("SELECT COUNT(*) FROM audits WHERE TRUE");
        push_filter_clauses(&mut query, filter, 1);

        let status_text = filter.status.as_ref().map(enum_to_text).transpose()?;
        let entity_type_text = filter.entity_type.as_ref().map(enum_to_text).transpose()?;

        let q = sqlx::query_as::<_, (i64,)>(&query);
        let (count,) = bind_filter(q, filter, status_text, entity_type_text)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::QueryFailed)?;
        Ok(count)
    }

    async fn count_open_for_auditor(&self, auditor_id: UserId) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM audits
            WHERE auditor_id = $1
              AND status IN ('scheduled', 'in_progress', 'overdue')
            ",
        )
        .bind(auditor_id.into_inner())
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(count)
    }

    async fn list_approved_in_window(
        &self,
        entity: &EntityRef,
        from: DateTime<Utc>,
    ) -> Result<Vec<Audit>> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r"
            SELECT * FROM audits
            WHERE entity_type = $1 AND entity_id = $2
              AND status = 'approved'
              AND completed_at >= $3
            ORDER BY completed_at DESC
            ",
        )
        .bind(enum_to_text(&entity.entity_type)?)
        .bind(entity.entity_id.into_inner())
        .bind(from)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;

        rows.into_iter()
            .map(|r| r.try_into().map_err(Into::into))
            .collect()
    }

    async fn next_code_number(&self, year: i32) -> Result<u32> {
        let prefix = format!("AUD-{year}-%");
        let (max,): (Option<i32>,) = sqlx::query_as(
            "SELECT MAX(RIGHT(code, 5)::int) FROM audits WHERE code LIKE $1",
        )
        .bind(&prefix)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(u32::try_from(max.unwrap_or(0)).unwrap_or(0) + 1)
    }
}
