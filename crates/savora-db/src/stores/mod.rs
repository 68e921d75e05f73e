//! PostgreSQL implementations of the compliance engine's store traits.
//!
//! Each store owns a clone of the shared pool and maps rows through a
//! private `FromRow` struct. Guarded updates compile to a single
//! `UPDATE ... WHERE id = $1 AND status = $2`, so the optimistic
//! concurrency check happens in the database.

pub mod activity;
pub mod audit;
pub mod capa;
pub mod finding;
pub mod health;
pub mod plan;

pub use activity::PgActivityStore;
pub use audit::PgAuditStore;
pub use capa::PgCapaStore;
pub use finding::PgFindingStore;
pub use health::PgHealthScoreStore;
pub use plan::PgPlanStore;
