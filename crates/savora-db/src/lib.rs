//! PostgreSQL persistence for the savora compliance engine.
//!
//! Implements the store traits from `savora-compliance` against a shared
//! connection pool:
//!
//! - [`PgAuditStore`], [`PgPlanStore`], [`PgFindingStore`], [`PgCapaStore`]
//! - [`PgActivityStore`] for the append-only CAPA activity log
//! - [`PgHealthScoreStore`] for per-entity score snapshots
//!
//! # Example
//!
//! ```rust,ignore
//! use savora_db::{run_migrations, DbPool, PgAuditStore};
//!
//! let pool = DbPool::connect("postgres://localhost/savora").await?;
//! run_migrations(&pool).await?;
//! let audits = PgAuditStore::new(pool.inner().clone());
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod stores;

mod convert;

pub use error::DbError;
pub use migrations::run_migrations;
pub use pool::DbPool;
pub use stores::{
    PgActivityStore, PgAuditStore, PgCapaStore, PgFindingStore, PgHealthScoreStore, PgPlanStore,
};
