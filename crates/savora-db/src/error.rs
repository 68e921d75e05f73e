//! Error types for the savora-db crate.
//!
//! Wraps `SQLx` errors with context and converts into the compliance
//! engine's error type at the store boundary.

use savora_compliance::ComplianceError;
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to establish or acquire a database connection.
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[source] sqlx::Error),

    /// A database migration failed to apply.
    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    /// A database query failed to execute.
    #[error("Query failed: {0}")]
    QueryFailed(#[source] sqlx::Error),

    /// A stored value could not be converted to its domain type.
    ///
    /// Indicates a row written by a different schema version, or a status
    /// string the current build does not know.
    #[error("Stored value conversion failed: {0}")]
    Conversion(String),
}

impl DbError {
    /// Check if this error indicates a connection problem.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DbError::ConnectionFailed(_))
    }

    /// Check if this error indicates a query problem.
    #[must_use]
    pub fn is_query_error(&self) -> bool {
        matches!(self, DbError::QueryFailed(_))
    }

    /// Check if this error indicates a row conversion problem.
    #[must_use]
    pub fn is_conversion_error(&self) -> bool {
        matches!(self, DbError::Conversion(_))
    }
}

/// Store traits speak [`ComplianceError`]; everything database-shaped
/// surfaces as its opaque store variant.
impl From<DbError> for ComplianceError {
    fn from(err: DbError) -> Self {
        ComplianceError::Store(err.to_string())
    }
}
