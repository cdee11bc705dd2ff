//! Merging freshly fetched remote data into the cache.
//!
//! `cache_instances` walks a fetched instance graph depth-first. Every
//! node is cached before the relationships that reference it, so edge
//! creation never races ahead of its endpoints. The walk consults an
//! optional cancellation check once per node; aborting leaves already
//! written nodes in place; they are idempotently re-derivable from the
//! same source data on retry.

use crate::error::{CacheError, CacheResult};
use crate::hierarchy::HierarchyManager;
use crate::info::{ObjectInfoManager, RelationshipInfoManager};
use crate::select_path::SelectPaths;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use syncline_store::ObjectStore;
use syncline_types::{
    CachedInstanceKey, ClassId, Completeness, InstanceKey, ObjectId, RelDirection,
};
use tracing::debug;

/// One fetched instance with its related subtree, as decoded from a
/// server response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedInstance {
    pub object_id: ObjectId,
    pub properties: Value,
    pub cache_tag: Option<String>,
    pub relationships: Vec<FetchedRelationship>,
}

impl FetchedInstance {
    #[must_use]
    pub fn new(object_id: ObjectId, properties: Value) -> Self {
        Self {
            object_id,
            properties,
            cache_tag: None,
            relationships: Vec::new(),
        }
    }

    #[must_use]
    pub fn cache_tag(mut self, tag: impl Into<String>) -> Self {
        self.cache_tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn related(
        mut self,
        rel_object_id: ObjectId,
        direction: RelDirection,
        related: FetchedInstance,
    ) -> Self {
        self.relationships.push(FetchedRelationship {
            object_id: rel_object_id,
            direction,
            properties: Value::Object(Default::default()),
            related,
        });
        self
    }
}

/// A fetched relationship to a related instance.
///
/// `direction` is relative to the owning instance: `Forward` means the
/// owner is the relationship's source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedRelationship {
    pub object_id: ObjectId,
    pub direction: RelDirection,
    pub properties: Value,
    pub related: FetchedInstance,
}

/// Keys of everything one walk cached.
#[derive(Debug, Default)]
pub struct CachedInstances {
    by_object_id: HashMap<ObjectId, CachedInstanceKey>,
}

impl CachedInstances {
    #[must_use]
    pub fn get(&self, object_id: &ObjectId) -> Option<CachedInstanceKey> {
        self.by_object_id.get(object_id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_object_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_object_id.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = (&ObjectId, &CachedInstanceKey)> {
        self.by_object_id.iter()
    }
}

/// Partial-caching decisions for one fetch.
#[derive(Debug, Default)]
pub struct PartialCachingState {
    pub select_paths: SelectPaths,
    /// Instances whose fully-cached data was left untouched because the
    /// fetch did not provably cover their full property set.
    pub rejected: BTreeSet<ObjectId>,
}

impl PartialCachingState {
    #[must_use]
    pub fn new(select_paths: SelectPaths) -> Self {
        Self {
            select_paths,
            rejected: BTreeSet::new(),
        }
    }
}

/// Refresh-only bookkeeping: nodes that were not already cached.
#[derive(Debug, Default)]
pub struct UpdateCachingState {
    pub not_found: BTreeSet<ObjectId>,
}

/// Optional per-node cancellation check.
pub type CancelCheck<'a> = &'a dyn Fn() -> bool;

/// Merges fetched instance graphs into the cache.
#[derive(Clone)]
pub struct InstanceCacheHelper {
    store: Arc<ObjectStore>,
    objects: ObjectInfoManager,
    relationships: RelationshipInfoManager,
    hierarchy: HierarchyManager,
}

impl InstanceCacheHelper {
    pub(crate) fn new(
        store: Arc<ObjectStore>,
        objects: ObjectInfoManager,
        relationships: RelationshipInfoManager,
        hierarchy: HierarchyManager,
    ) -> Self {
        Self {
            store,
            objects,
            relationships,
            hierarchy,
        }
    }

    /// Caches every fetched instance and the relationships between them.
    ///
    /// With `update` set (refresh-only), nodes not already cached are
    /// recorded as not-found and their subtrees skipped. With `partial`
    /// set, each node is rejected, partially cached or fully cached based
    /// on select-path coverage of its arrival path.
    pub fn cache_instances(
        &self,
        fetched: &[FetchedInstance],
        out: &mut CachedInstances,
        mut partial: Option<&mut PartialCachingState>,
        mut update: Option<&mut UpdateCachingState>,
        cancel: Option<CancelCheck<'_>>,
    ) -> CacheResult<()> {
        let mut path = Vec::new();
        for instance in fetched {
            self.cache_node(
                instance,
                &mut path,
                out,
                partial.as_deref_mut(),
                update.as_deref_mut(),
                cancel,
            )?;
        }
        Ok(())
    }

    fn cache_node(
        &self,
        fetched: &FetchedInstance,
        path: &mut Vec<(ClassId, RelDirection, ClassId)>,
        out: &mut CachedInstances,
        mut partial: Option<&mut PartialCachingState>,
        mut update: Option<&mut UpdateCachingState>,
        cancel: Option<CancelCheck<'_>>,
    ) -> CacheResult<Option<InstanceKey>> {
        if let Some(cancel) = cancel {
            if cancel() {
                return Err(CacheError::Cancelled);
            }
        }

        let already_visited = out.get(&fetched.object_id);
        let key = if let Some(cached) = already_visited {
            // Cycles and duplicates: write once per walk.
            Some(cached.instance)
        } else {
            let mut info = self.objects.read_by_object_id(&fetched.object_id)?;

            let refreshing = update.is_some();
            if let Some(update) = update.as_deref_mut() {
                if !info.is_in_cache() {
                    // A refresh must never introduce new objects.
                    update.not_found.insert(fetched.object_id.clone());
                    return Ok(None);
                }
            }

            let decision = match partial.as_deref_mut() {
                // A refresh keeps the node's completeness; a plain fetch
                // is authoritative and caches fully.
                None if refreshing => {
                    Decision::Write(info.completeness.unwrap_or(Completeness::Full))
                }
                None => Decision::Write(Completeness::Full),
                Some(state) => {
                    let covers = state.select_paths.covers_fully(&self.store, path);
                    if covers {
                        Decision::Write(Completeness::Full)
                    } else if info.completeness == Some(Completeness::Full) {
                        // Never downgrade fully-cached data from a fetch
                        // that did not cover the full property set.
                        state.rejected.insert(fetched.object_id.clone());
                        Decision::Reject
                    } else {
                        Decision::Write(Completeness::Partial)
                    }
                }
            };

            let instance = match decision {
                Decision::Reject => info.instance.filter(|key| {
                    self.store.instance_exists(*key).unwrap_or(false)
                }),
                Decision::Write(completeness) => {
                    Some(self.write_node(&mut info, fetched, completeness)?)
                }
            };

            if let (Some(instance), Some(info_key)) = (instance, info.key) {
                out.by_object_id.insert(
                    fetched.object_id.clone(),
                    CachedInstanceKey::new(info_key, instance),
                );
            }
            instance
        };

        let Some(key) = key else {
            return Ok(None);
        };

        for rel in &fetched.relationships {
            path.push((
                rel.object_id.class,
                rel.direction,
                rel.related.object_id.class,
            ));
            let related = self.cache_node(
                &rel.related,
                path,
                out,
                partial.as_deref_mut(),
                update.as_deref_mut(),
                cancel,
            )?;
            path.pop();
            if let Some(related) = related {
                self.cache_relationship(rel, key, related)?;
            }
        }

        Ok(Some(key))
    }

    /// Writes or refreshes one node's data and info.
    fn write_node(
        &self,
        info: &mut crate::info::ObjectInfo,
        fetched: &FetchedInstance,
        completeness: Completeness,
    ) -> CacheResult<InstanceKey> {
        let instance = match info.instance {
            Some(key) if self.store.instance_exists(key)? => {
                self.store.update_instance(key, &fetched.properties)?;
                key
            }
            _ => self
                .store
                .insert_instance(fetched.object_id.class, &fetched.properties)?,
        };
        info.instance = Some(instance);
        info.cache_tag = fetched.cache_tag.clone();
        info.cached_at = Some(Utc::now());
        info.completeness = Some(completeness);
        self.objects.save(info)?;
        debug!(object = %fetched.object_id, ?completeness, "cached instance");
        Ok(instance)
    }

    /// Relates a fetched relationship to its already-processed endpoints.
    fn cache_relationship(
        &self,
        rel: &FetchedRelationship,
        owner: InstanceKey,
        related: InstanceKey,
    ) -> CacheResult<()> {
        let (source, target) = match rel.direction {
            RelDirection::Forward => (owner, related),
            RelDirection::Backward => (related, owner),
        };
        let key = self
            .hierarchy
            .relate_if_absent(source, target, rel.object_id.class)?;
        let mut info = self.relationships.read_by_instance(key)?;
        info.object_id = rel.object_id.clone();
        info.instance = Some(key);
        info.source = Some(source);
        info.target = Some(target);
        self.relationships.save(&mut info)?;
        Ok(())
    }
}

enum Decision {
    Reject,
    Write(Completeness),
}
