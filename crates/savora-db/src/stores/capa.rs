//! PostgreSQL CAPA store.
//!
//! Sub-tasks are embedded in the CAPA record; the whole list round-trips
//! through one JSONB column so replace-on-write stays a single statement
//! under the status guard.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use savora_compliance::services::capa::{CapaFilter, CapaStore};
use savora_compliance::services::ListOptions;
use savora_compliance::types::{Capa, CapaStatus, SubTask};
use savora_compliance::Result;
use savora_core::{CapaId, EntityRef, UserId};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::convert::{enum_from_text, enum_to_text, from_json, to_json};
use crate::error::DbError;

/// CAPA store backed by the `capas` table.
#[derive(Debug, Clone)]
pub struct PgCapaStore {
    pool: PgPool,
}

impl PgCapaStore {
    /// Create a store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct CapaRow {
    id: Uuid,
    code: String,
    finding_id: Uuid,
    audit_id: Uuid,
    entity_type: String,
    entity_id: Uuid,
    description: String,
    assigned_to: Uuid,
    due_date: NaiveDate,
    status: String,
    priority: String,
    evidence_urls: Vec<String>,
    notes: Option<String>,
    sub_tasks: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CapaRow> for Capa {
    type Error = DbError;

    fn try_from(row: CapaRow) -> std::result::Result<Self, DbError> {
        let sub_tasks: Vec<SubTask> = from_json(row.sub_tasks)?;
        Ok(Capa {
            id: row.id.into(),
            code: row.code,
            finding_id: row.finding_id.into(),
            audit_id: row.audit_id.into(),
            entity: EntityRef {
                entity_type: enum_from_text(&row.entity_type)?,
                entity_id: row.entity_id.into(),
            },
            description: row.description,
            assigned_to: row.assigned_to.into(),
            due_date: row.due_date,
            status: enum_from_text(&row.status)?,
            priority: enum_from_text(&row.priority)?,
            evidence_urls: row.evidence_urls,
            notes: row.notes,
            sub_tasks,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Append the filter's WHERE clauses, continuing from `param_idx`.
/// Returns the next free parameter index.
fn push_filter_clauses(query: &mut String, filter: &CapaFilter, mut param_idx: usize) -> usize {
    if !filter.statuses.is_empty() {
        query.push_str(&format!(" AND status = ANY(${param_idx})"));
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
    if filter.audit_id.is_some() {
        query.push_str(&format!(" AND audit_id = ${param_idx}"));
        param_idx += 1;
    }
    if filter.assigned_to.is_some() {
        query.push_str(&format!(" AND assigned_to = ${param_idx}"));
        param_idx += 1;
    }
    if filter.due_before.is_some() {
        query.push_str(&format!(" AND due_date < ${param_idx}"));
        param_idx += 1;
    }
    param_idx
}

fn bind_filter<'q, O>(
    mut q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    filter: &CapaFilter,
    status_texts: Option<Vec<String>>,
    entity_type_text: Option<String>,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    if let Some(statuses) = status_texts {
        q = q.bind(statuses);
    }
    if let Some(entity_type) = entity_type_text {
        q = q.bind(entity_type);
    }
    if let Some(entity_id) = filter.entity_id {
        q = q.bind(entity_id.into_inner());
    }
    if let Some(audit_id) = filter.audit_id {
        q = q.bind(audit_id.into_inner());
    }
    if let Some(assigned_to) = filter.assigned_to {
        q = q.bind(assigned_to.into_inner());
    }
    if let Some(before) = filter.due_before {
        q = q.bind(before);
    }
    q
}

fn status_texts(filter: &CapaFilter) -> Result<Option<Vec<String>>> {
    if filter.statuses.is_empty() {
        return Ok(None);
    }
    let texts = filter
        .statuses
        .iter()
        .map(enum_to_text)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some(texts))
}

#[async_trait]
impl CapaStore for PgCapaStore {
    async fn get(&self, id: CapaId) -> Result<Option<Capa>> {
        let row: Option<CapaRow> = sqlx::query_as("SELECT * FROM capas WHERE id = $1")
            .bind(id.into_inner())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::QueryFailed)?;
        Ok(row.map(TryInto::try_into).transpose()?)
    }

    async fn create(&self, capa: Capa) -> Result<Capa> {
        sqlx::query(
            r"
            INSERT INTO capas (
                id, code, finding_id, audit_id, entity_type, entity_id,
                description, assigned_to, due_date, status, priority,
                evidence_urls, notes, sub_tasks, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ",
        )
        .bind(capa.id.into_inner())
        .bind(&capa.code)
        .bind(capa.finding_id.into_inner())
        .bind(capa.audit_id.into_inner())
        .bind(enum_to_text(&capa.entity.entity_type)?)
        .bind(capa.entity.entity_id.into_inner())
        .bind(&capa.description)
        .bind(capa.assigned_to.into_inner())
        .bind(capa.due_date)
        .bind(enum_to_text(&capa.status)?)
        .bind(enum_to_text(&capa.priority)?)
        .bind(&capa.evidence_urls)
        .bind(&capa.notes)
        .bind(to_json(&capa.sub_tasks)?)
        .bind(capa.created_at)
        .bind(capa.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(capa)
    }

    async fn update_guarded(&self, capa: Capa, expected: CapaStatus) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE capas SET
                assigned_to = $3, due_date = $4, status = $5,
                evidence_urls = $6, notes = $7, sub_tasks = $8, updated_at = $9
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(capa.id.into_inner())
        .bind(enum_to_text(&expected)?)
        .bind(capa.assigned_to.into_inner())
        .bind(capa.due_date)
        .bind(enum_to_text(&capa.status)?)
        .bind(&capa.evidence_urls)
        .bind(&capa.notes)
        .bind(to_json(&capa.sub_tasks)?)
        .bind(capa.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, filter: &CapaFilter, options: &ListOptions) -> Result<Vec<Capa>> {
        let mut query = String::from("SELECT * FROM capas WHERE TRUE");
        let next = push_filter_clauses(&mut query, filter, 1);
        query.push_str(&format!(
            " ORDER BY due_date, code LIMIT ${} OFFSET ${}",
            next,
            next + 1
        ));

        let statuses = status_texts(filter)?;
        let entity_type_text = filter.entity_type.as_ref().map(enum_to_text).transpose()?;

        let q = sqlx::query_as::<_, CapaRow>(&query);
        let rows = bind_filter(q, filter, statuses, entity_type_text)
            .bind(options.limit.max(0))
            .bind(options.offset.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::QueryFailed)?;

        rows.into_iter()
            .map(|r| r.try_into().map_err(Into::into))
            .collect()
    }

    async fn count(&self, filter: &CapaFilter) -> Result<i64> {
        let mut query = String::from("SELECT COUNT(*) FROM capas WHERE TRUE");
        push_filter_clauses(&mut query, filter, 1);

        let statuses = status_texts(filter)?;
        let entity_type_text = filter.entity_type.as_ref().map(enum_to_text).transpose()?;

        let q = sqlx::query_as::<_, (i64,)>(&query);
        let (count,) = bind_filter(q, filter, statuses, entity_type_text)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::QueryFailed)?;
        Ok(count)
    }

    async fn list_by_audit(&self, audit_id: savora_core::AuditId) -> Result<Vec<Capa>> {
        let rows: Vec<CapaRow> =
            sqlx::query_as("SELECT * FROM capas WHERE audit_id = $1 ORDER BY code")
                .bind(audit_id.into_inner())
                .fetch_all(&self.pool)
                .await
                .map_err(DbError::QueryFailed)?;
        rows.into_iter()
            .map(|r| r.try_into().map_err(Into::into))
            .collect()
    }

    async fn list_for_entity(
        &self,
        entity: &EntityRef,
        from: Option<DateTime<Utc>>,
    ) -> Result<Vec<Capa>> {
        let mut query = String::from(
            "SELECT * FROM capas WHERE entity_type = $1 AND entity_id = $2",
        );
        if from.is_some() {
            query.push_str(" AND created_at >= $3");
        }
        query.push_str(" ORDER BY code");

        let mut q = sqlx::query_as::<_, CapaRow>(&query)
            .bind(enum_to_text(&entity.entity_type)?)
            .bind(entity.entity_id.into_inner());
        if let Some(from) = from {
            q = q.bind(from);
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::QueryFailed)?;
        rows.into_iter()
            .map(|r| r.try_into().map_err(Into::into))
            .collect()
    }

    async fn next_code_number(&self, year: i32) -> Result<u32> {
        let prefix = format!("CPA-{year}-%");
        let (max,): (Option<i32>,) = sqlx::query_as(
            "SELECT MAX(RIGHT(code, 5)::int) FROM capas WHERE code LIKE $1",
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
    use savora_compliance::types::{Severity, SubTaskStatus};
    use savora_core::SubTaskId;

    fn sample_row() -> CapaRow {
        let sub_tasks = vec![SubTask {
            id: SubTaskId::new(),
            assigned_to: UserId::new(),
            description: "replace door seal".into(),
            status: SubTaskStatus::Completed,
            evidence_urls: vec!["s3://evidence/seal.jpg".into()],
            completed_at: Some(Utc::now()),
        }];
        CapaRow {
            id: Uuid::new_v4(),
            code: "CPA-2026-00012".into(),
            finding_id: Uuid::new_v4(),
            audit_id: Uuid::new_v4(),
            entity_type: "supplier".into(),
            entity_id: Uuid::new_v4(),
            description: "cold chain broken on delivery".into(),
            assigned_to: Uuid::new_v4(),
            due_date: NaiveDate::from_ymd_opt(2026, 4, 10).unwrap(),
            status: "pending_verification".into(),
            priority: "high".into(),
            evidence_urls: vec!["s3://evidence/truck.jpg".into()],
            notes: None,
            sub_tasks: serde_json::to_value(sub_tasks).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_round_trips_embedded_sub_tasks() {
        let capa: Capa = sample_row().try_into().unwrap();
        assert_eq!(capa.status, CapaStatus::PendingVerification);
        assert_eq!(capa.priority, Severity::High);
        assert_eq!(capa.sub_tasks.len(), 1);
        assert_eq!(capa.sub_tasks[0].status, SubTaskStatus::Completed);
        // Evidence spans the CAPA and its sub-tasks.
        assert_eq!(capa.total_evidence_count(), 2);
    }

    #[test]
    fn test_malformed_sub_tasks_rejected() {
        let mut row = sample_row();
        row.sub_tasks = serde_json::json!({"not": "a list"});
        let err = Capa::try_from(row).unwrap_err();
        assert!(err.is_conversion_error());
    }

    #[test]
    fn test_status_list_filter_uses_any() {
        let filter = CapaFilter {
            statuses: vec![CapaStatus::Open, CapaStatus::InProgress],
            due_before: Some(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
            ..Default::default()
        };
        let mut query = String::from("SELECT * FROM capas WHERE TRUE");
        let next = push_filter_clauses(&mut query, &filter, 1);
        assert!(query.contains("status = ANY($1)"));
        assert!(query.ends_with("AND due_date < $2"));
        assert_eq!(next, 3);
    }
}
