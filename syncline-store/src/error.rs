//! Error types for the store adapter.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record addressed by key does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Class id or name is not registered.
    #[error("unknown class: {0}")]
    UnknownClass(String),

    /// A write was rejected by a uniqueness constraint.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A write was rejected by class metadata (wrong kind, incompatible
    /// relationship end, missing endpoint).
    #[error("schema violation: {0}")]
    SchemaViolation(String),
}
