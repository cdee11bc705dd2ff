//! Error types for the cache core.
//!
//! Reads of unknown identities are not errors: info managers return
//! sentinel values so callers can branch on presence. Errors here are for
//! operations that could not (or must not) happen.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Protocol violation: the operation is illegal for the entity's
    /// current state (modify a Deleted record, revert a non-Modified one,
    /// commit an unchanged record, ...). Never retried; the caller is
    /// expected not to construct this situation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A file could not be deleted because another process holds it open.
    /// Distinct from generic I/O failure so callers can retry later.
    #[error("file is locked: {0}")]
    FileLocked(PathBuf),

    /// A bulk caching walk was aborted via its cancellation check.
    /// Already-written nodes stay cached.
    #[error("operation cancelled")]
    Cancelled,

    /// Failure from the object store adapter.
    #[error("store error: {0}")]
    Store(#[from] syncline_store::StoreError),

    /// Failure from the metadata relations.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File system error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shorthand for raising an [`CacheError::InvalidState`].
pub(crate) fn invalid_state<T>(msg: impl Into<String>) -> CacheResult<T> {
    let msg = msg.into();
    tracing::warn!(target: "syncline_cache", "invalid state: {msg}");
    Err(CacheError::InvalidState(msg))
}
