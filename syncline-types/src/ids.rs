//! Identifier types for store records and cache metadata.
//!
//! All keys are small value types with structural equality and ordering so
//! they can live in indexed maps and SQL rows; none of them are pointers
//! into live graph state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a registered class (object or relationship class).
///
/// Stable across reopen: the store persists the class name → id mapping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClassId(i64);

impl ClassId {
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row identity of a typed data record in the store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InstanceId(i64);

impl InstanceId {
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed key of a data record: class plus row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InstanceKey {
    pub class: ClassId,
    pub id: InstanceId,
}

impl InstanceKey {
    #[must_use]
    pub const fn new(class: ClassId, id: InstanceId) -> Self {
        Self { class, id }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.id)
    }
}

/// Row identity of a metadata (Info) record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InfoKey(i64);

impl InfoKey {
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for InfoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The info/data pair addressing one cached entity.
///
/// The split lets a tombstoned metadata record outlive its deleted data
/// record: after a local delete, `instance` still names the removed row so
/// pending-change bookkeeping can address it until commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CachedInstanceKey {
    pub info: InfoKey,
    pub instance: InstanceKey,
}

impl CachedInstanceKey {
    #[must_use]
    pub const fn new(info: InfoKey, instance: InstanceKey) -> Self {
        Self { info, instance }
    }
}

/// Identity of a domain object as known to the remote service.
///
/// `remote_id` is a `LocalInstance-` placeholder for objects created
/// locally that the server has not assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub class: ClassId,
    pub remote_id: String,
}

impl ObjectId {
    #[must_use]
    pub fn new(class: ClassId, remote_id: impl Into<String>) -> Self {
        Self {
            class,
            remote_id: remote_id.into(),
        }
    }

    /// True while the remote id is a local placeholder.
    #[must_use]
    pub fn is_local(&self) -> bool {
        crate::is_local_id(&self.remote_id)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.remote_id)
    }
}
