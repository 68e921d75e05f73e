//! PostgreSQL CAPA activity log store.
//!
//! The table is append-only. A NULL `actor_user_id` records a system
//! action (the escalation and auto-approval sweeps).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use savora_compliance::{ActivityStore, Actor, CapaActivity};
use savora_compliance::activity::CapaActivityInput;
use savora_compliance::Result;
use savora_core::{ActivityId, CapaId};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::convert::{enum_from_text, enum_to_text};
use crate::error::DbError;

/// Activity store backed by the `capa_activities` table.
#[derive(Debug, Clone)]
pub struct PgActivityStore {
    pool: PgPool,
}

impl PgActivityStore {
    /// Create a store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ActivityRow {
    id: Uuid,
    capa_id: Uuid,
    actor_user_id: Option<Uuid>,
    action: String,
    details: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for CapaActivity {
    type Error = DbError;

    fn try_from(row: ActivityRow) -> std::result::Result<Self, DbError> {
        Ok(CapaActivity {
            id: row.id.into(),
            capa_id: row.capa_id.into(),
            actor: match row.actor_user_id {
                Some(user_id) => Actor::User(user_id.into()),
                None => Actor::System,
            },
            action: enum_from_text(&row.action)?,
            details: row.details,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl ActivityStore for PgActivityStore {
    async fn append(&self, input: CapaActivityInput) -> Result<CapaActivity> {
        let entry = CapaActivity {
            id: ActivityId::new(),
            capa_id: input.capa_id,
            actor: input.actor,
            action: input.action,
            details: input.details,
            created_at: Utc::now(),
        };
        let actor_user_id = match entry.actor {
            Actor::User(user_id) => Some(user_id.into_inner()),
            Actor::System => None,
        };
        sqlx::query(
            r"
            INSERT INTO capa_activities (id, capa_id, actor_user_id, action, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(entry.id.into_inner())
        .bind(entry.capa_id.into_inner())
        .bind(actor_user_id)
        .bind(enum_to_text(&entry.action)?)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        Ok(entry)
    }

    async fn list_for_capa(&self, capa_id: CapaId) -> Result<Vec<CapaActivity>> {
        let rows: Vec<ActivityRow> = sqlx::query_as(
            "SELECT * FROM capa_activities WHERE capa_id = $1 ORDER BY created_at, id",
        )
        .bind(capa_id.into_inner())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::QueryFailed)?;
        rows.into_iter()
            .map(|r| r.try_into().map_err(Into::into))
            .collect()
    }
}
