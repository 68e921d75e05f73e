//! PostgreSQL audit plan store.
//!
//! Recurrence, scope, and assignment are stored whole as JSONB; nothing
//! queries inside them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use savora_compliance::services::plan::PlanStore;
use savora_compliance::types::{AuditPlan, PlanStatus};
use savora_compliance::Result;
use savora_core::PlanId;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::convert::{enum_from_text, enum_to_text, from_json, to_json};
use crate::error::DbError;

/// Plan store backed by the `audit_plans` table.
#[derive(Debug, Clone)]
pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    /// Create a store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct PlanRow {
    id: Uuid,
    name: String,
    entity_type: String,
    template_id: Uuid,
    recurrence: serde_json::Value,
    scope: serde_json::Value,
    assignment: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PlanRow> for AuditPlan {
    type Error = DbError;

    fn try_from(row: PlanRow) -> std::result::Result<Self, DbError> {
        Ok(AuditPlan {
            id: row.id.into(),
            name: row.name,
            entity_type: enum_from_text(&row.entity_type)?,
            template_id: row.template_id.into(),
            recurrence: from_json(row.recurrence)?,
            scope: from_json(row.scope)?,
            assignment: from_json(row.assignment)?,
            status: enum_from_text(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn get(&self, id: PlanId) -> Result<Option<AuditPlan>> {
        let row: Option<PlanRow> = sqlx::query_as("SELECT * FROM audit_plans WHERE id = $1")
            .bind(id.into_inner())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::QueryFailed)?;
        Ok(row.map(TryInto::try_into).transpose()?)
    }

    async fn create(&self, plan: AuditPlan) -> Result<AuditPlan> {
        sqlx::query(
            r"
            INSERT INTO audit_plans (
                id, name, entity_type, template_id, recurrence, scope,
                assignment, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(plan.id.into_inner())
        .bind(&plan.name)
        .bind(enum_to_text(&plan.entity_type)?)
        .bind(plan.template_id.into_inner())
        .bind(to_json(&plan.recurrence)?)
        .bind(to_json(&plan.scope)?)
        .bind(to_json(&plan.assignment)?)
        .bind(enum_to_text(&plan.status)?)
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(plan)
    }

    async fn update(&self, plan: AuditPlan) -> Result<Option<AuditPlan>> {
        let result = sqlx::query(
            r"
            UPDATE audit_plans SET
                name = $2, recurrence = $3, scope = $4, assignment = $5,
                status = $6, updated_at = $7
            WHERE id = $1
            ",
        )
        .bind(plan.id.into_inner())
        .bind(&plan.name)
        .bind(to_json(&plan.recurrence)?)
        .bind(to_json(&plan.scope)?)
        .bind(to_json(&plan.assignment)?)
        .bind(enum_to_text(&plan.status)?)
        .bind(plan.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok((result.rows_affected() == 1).then_some(plan))
    }

    async fn delete(&self, id: PlanId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM audit_plans WHERE id = $1")
            .bind(id.into_inner())
            .execute(&self.pool)
            .await
            .map_err(DbError::QueryFailed)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, status: Option<PlanStatus>) -> Result<Vec<AuditPlan>> {
        let rows: Vec<PlanRow> = match status {
            Some(status) => {
                sqlx::query_as("SELECT * FROM audit_plans WHERE status = $1 ORDER BY name")
                    .bind(enum_to_text(&status)?)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query_as("SELECT * FROM audit_plans ORDER BY name")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(DbError::QueryFailed)?;
        rows.into_iter()
            .map(|r| r.try_into().map_err(Into::into))
            .collect()
    }
}
