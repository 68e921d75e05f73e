//! PostgreSQL health score snapshot store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use savora_compliance::services::scoring::HealthScoreStore;
use savora_compliance::types::{HealthScoreRecord, ScoreComponent};
use savora_compliance::Result;
use savora_core::EntityRef;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::convert::{enum_from_text, enum_to_text, from_json, to_json};
use crate::error::DbError;

/// Health score store backed by the `health_scores` table, one row per
/// entity.
#[derive(Debug, Clone)]
pub struct PgHealthScoreStore {
    pool: PgPool,
}

impl PgHealthScoreStore {
    /// Create a store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct HealthScoreRow {
    entity_type: String,
    entity_id: Uuid,
    score: f64,
    components: serde_json::Value,
    calculated_at: DateTime<Utc>,
}

impl TryFrom<HealthScoreRow> for HealthScoreRecord {
    type Error = DbError;

    fn try_from(row: HealthScoreRow) -> std::result::Result<Self, DbError> {
        let components: Vec<ScoreComponent> = from_json(row.components)?;
        Ok(HealthScoreRecord {
            entity: EntityRef {
                entity_type: enum_from_text(&row.entity_type)?,
                entity_id: row.entity_id.into(),
            },
            score: row.score,
            components,
            calculated_at: row.calculated_at,
        })
    }
}

#[async_trait]
impl HealthScoreStore for PgHealthScoreStore {
    async fn upsert(&self, record: HealthScoreRecord) -> Result<HealthScoreRecord> {
        sqlx::query(
            r"
            INSERT INTO health_scores (entity_type, entity_id, score, components, calculated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                score = EXCLUDED.score,
                components = EXCLUDED.components,
                calculated_at = EXCLUDED.calculated_at
            ",
        )
        .bind(enum_to_text(&record.entity.entity_type)?)
        .bind(record.entity.entity_id.into_inner())
        .bind(record.score)
        .bind(to_json(&record.components)?)
        .bind(record.calculated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(record)
    }

    async fn get(&self, entity: &EntityRef) -> Result<Option<HealthScoreRecord>> {
        let row: Option<HealthScoreRow> = sqlx::query_as(
            "SELECT * FROM health_scores WHERE entity_type = $1 AND entity_id = $2",
        )
        .bind(enum_to_text(&entity.entity_type)?)
        .bind(entity.entity_id.into_inner())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(row.map(TryInto::try_into).transpose()?)
    }
}
