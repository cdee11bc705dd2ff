//! Core type definitions for Syncline.
//!
//! This crate defines the store- and cache-agnostic types shared by the
//! object store adapter and the cache core:
//! - class, instance and metadata-record identifiers
//! - change-tracking state (`ChangeStatus`, `SyncStatus`, `ChangeInfo`)
//! - storage and hierarchy enums (`FileLocation`, `RelStrength`, ...)
//! - local placeholder remote-id helpers
//!
//! Domain payloads themselves are opaque JSON property bags and never
//! appear here.

mod change;
mod ids;
mod local_id;

pub use change::{ChangeInfo, ChangeStatus, SyncStatus};
pub use ids::{CachedInstanceKey, ClassId, InfoKey, InstanceId, InstanceKey, ObjectId};
pub use local_id::{is_local_id, new_local_id, LOCAL_ID_PREFIX};

use serde::{Deserialize, Serialize};

/// Where a cached file physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileLocation {
    /// Keep the file's current location, or Temporary if it has none.
    Auto,
    /// Survives cache resets and temporary-root teardown.
    Persistent,
    /// Reclaimable cache space.
    Temporary,
    /// Referenced in place; never moved or deleted by the cache.
    External,
}

/// Whether all of an object's properties are known locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Completeness {
    Full,
    Partial,
}

/// Durability class of a named root anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootPersistence {
    /// Durable: subgraphs reachable from the root are kept.
    Default,
    /// Ephemeral scratch space (e.g. query results), bulk-removable.
    Temporary,
}

/// Direction of a relationship step relative to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelDirection {
    Forward,
    Backward,
}

impl RelDirection {
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            RelDirection::Forward => RelDirection::Backward,
            RelDirection::Backward => RelDirection::Forward,
        }
    }
}

/// Lifetime contribution of a relationship class.
///
/// Holding and Embedding edges keep their target reachable; Weak edges are
/// lookup-only and never affect lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelStrength {
    Holding,
    Embedding,
    Weak,
}

impl RelStrength {
    /// True for edge strengths that keep the target alive.
    #[must_use]
    pub fn holds(self) -> bool {
        matches!(self, RelStrength::Holding | RelStrength::Embedding)
    }
}
