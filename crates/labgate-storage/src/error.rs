use thiserror::Error;

/// Errors raised by the persistence layer.
///
/// A failed result write is logged by the caller and processing continues
/// with the next result; nothing here is retried automatically.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection or query execution failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration execution failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Entity not found in database
    #[error("Entity not found: {entity_type} with {field}={value}")]
    NotFound {
        entity_type: String,
        field: String,
        value: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Specialized result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
