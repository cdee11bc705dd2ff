//! Offline cache core for Syncline.
//!
//! Stores a partial, possibly-stale mirror of remote domain objects,
//! their relationships and their files; tracks every local edit as a
//! pending change awaiting synchronization; and reconciles those changes
//! against server responses without losing concurrent local edits made
//! while a sync was in flight.
//!
//! # Architecture
//!
//! - [`Cache`] wires everything over one SQLite connection
//! - [`ChangeManager`] is the public surface for local edits and commits
//! - [`HierarchyManager`] derives instance lifetime from actual graph
//!   edges (no refcounts)
//! - [`InstanceCacheHelper`] merges fetched remote graphs, deciding full
//!   vs partial caching per node
//! - [`RootManager`] and [`CachedResponseManager`] anchor what must stay
//!   alive
//! - [`FileStorage`] places cached files with atomic replace and rollback

mod cache;
mod changes;
mod config;
mod error;
mod file_storage;
mod hierarchy;
mod info;
mod instance_cache;
mod internal;
mod responses;
mod roots;
mod select_path;

pub use cache::Cache;
pub use changes::{
    ChangeManager, EntityKind, FileRevision, InstanceRevision, PendingChange,
};
pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use file_storage::FileStorage;
pub use hierarchy::HierarchyManager;
pub use info::{
    FileInfo, FileInfoManager, ObjectInfo, ObjectInfoManager, RelationshipInfo,
    RelationshipInfoManager,
};
pub use instance_cache::{
    CachedInstances, FetchedInstance, FetchedRelationship, InstanceCacheHelper,
    PartialCachingState, UpdateCachingState,
};
pub use responses::CachedResponseManager;
pub use roots::RootManager;
pub use select_path::{SelectPathSpec, SelectPaths, SelectProps, SelectStep};
