//! Cache configuration.

use std::path::PathBuf;

/// Configuration for opening a [`crate::Cache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Database file path; `None` opens an in-memory database.
    pub db_path: Option<PathBuf>,
    /// Root directory for durable cached files.
    pub persistent_dir: PathBuf,
    /// Root directory for reclaimable cached files.
    pub temporary_dir: PathBuf,
    /// Root directory for externally managed files (referenced in place).
    pub external_dir: Option<PathBuf>,
}

impl CacheConfig {
    /// In-memory database with file roots under `base`.
    #[must_use]
    pub fn in_memory(base: &std::path::Path) -> Self {
        Self {
            db_path: None,
            persistent_dir: base.join("persistent"),
            temporary_dir: base.join("temporary"),
            external_dir: None,
        }
    }

    /// On-disk database and file roots under `base`.
    #[must_use]
    pub fn at(base: &std::path::Path) -> Self {
        Self {
            db_path: Some(base.join("cache.db")),
            persistent_dir: base.join("persistent"),
            temporary_dir: base.join("temporary"),
            external_dir: None,
        }
    }
}
