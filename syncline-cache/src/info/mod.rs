//! Per-entity-kind metadata records and their managers.
//!
//! Each cached object, relationship and file carries an Info record: its
//! identity as known to the remote service plus the shared change-tracking
//! fields. Info rows are typed structs decoded once at the SQL boundary;
//! reads of unknown identities return sentinels (`is_in_cache() == false`),
//! never errors, so callers can branch insert-vs-update on the result.

mod file;
mod object;
mod relationship;

pub use file::FileInfoManager;
pub use object::ObjectInfoManager;
pub use relationship::RelationshipInfoManager;

use chrono::{DateTime, Utc};
use serde_json::Value;
use syncline_types::{
    CachedInstanceKey, ChangeInfo, Completeness, FileLocation, InfoKey, InstanceKey, ObjectId,
};

/// Metadata record of a cached domain object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    /// Metadata row key; `None` for the not-in-cache sentinel.
    pub key: Option<InfoKey>,
    pub object_id: ObjectId,
    /// Data record key. After a local delete the data row is gone but the
    /// key keeps addressing the tombstone.
    pub instance: Option<InstanceKey>,
    pub change: ChangeInfo,
    pub cache_tag: Option<String>,
    pub cached_at: Option<DateTime<Utc>>,
    pub completeness: Option<Completeness>,
}

impl ObjectInfo {
    /// Sentinel for an identity the cache knows nothing about.
    #[must_use]
    pub fn not_cached(object_id: ObjectId) -> Self {
        Self {
            key: None,
            object_id,
            instance: None,
            change: ChangeInfo::default(),
            cache_tag: None,
            cached_at: None,
            completeness: None,
        }
    }

    #[must_use]
    pub fn is_in_cache(&self) -> bool {
        self.key.is_some()
    }

    /// True while the remote id is a local placeholder.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.object_id.is_local()
    }

    /// The info/data pair, when both sides exist.
    #[must_use]
    pub fn cached_key(&self) -> Option<CachedInstanceKey> {
        match (self.key, self.instance) {
            (Some(info), Some(instance)) => Some(CachedInstanceKey::new(info, instance)),
            _ => None,
        }
    }
}

/// Metadata record of a cached relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipInfo {
    pub key: Option<InfoKey>,
    pub object_id: ObjectId,
    pub instance: Option<InstanceKey>,
    pub change: ChangeInfo,
    pub source: Option<InstanceKey>,
    pub target: Option<InstanceKey>,
}

impl RelationshipInfo {
    #[must_use]
    pub fn not_cached(object_id: ObjectId) -> Self {
        Self {
            key: None,
            object_id,
            instance: None,
            change: ChangeInfo::default(),
            source: None,
            target: None,
        }
    }

    #[must_use]
    pub fn is_in_cache(&self) -> bool {
        self.key.is_some()
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.object_id.is_local()
    }
}

/// Metadata record of a cached file attachment, keyed by its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub key: Option<InfoKey>,
    pub owner: InstanceKey,
    pub change: ChangeInfo,
    pub location: Option<FileLocation>,
    pub relative_dir: Option<String>,
    pub file_name: Option<String>,
    pub cache_tag: Option<String>,
    pub cache_date: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub external_metadata: Option<Value>,
}

impl FileInfo {
    #[must_use]
    pub fn not_cached(owner: InstanceKey) -> Self {
        Self {
            key: None,
            owner,
            change: ChangeInfo::default(),
            location: None,
            relative_dir: None,
            file_name: None,
            cache_tag: None,
            cache_date: None,
            updated_at: None,
            external_metadata: None,
        }
    }

    #[must_use]
    pub fn is_in_cache(&self) -> bool {
        self.key.is_some()
    }

    /// True when a stored file path is recorded.
    #[must_use]
    pub fn has_file(&self) -> bool {
        self.relative_dir.is_some() && self.file_name.is_some()
    }
}
