//! Database error types.

use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// None of the known migration directories exists.
    #[error("migration directory not found; tried {tried}")]
    MigrationDirNotFound { tried: String },

    /// A stored row could not be mapped to a domain record.
    #[error("corrupt {table} row {key}: {reason}")]
    CorruptRow {
        table: &'static str,
        key: String,
        reason: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    pub(crate) fn corrupt(table: &'static str, key: impl Into<String>, reason: impl ToString) -> Self {
        Self::CorruptRow {
            table,
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}
