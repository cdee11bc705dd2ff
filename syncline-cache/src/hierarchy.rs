//! Generic graph operations over the object store.
//!
//! Lifetime is a derived property: a node is alive while a Holding or
//! Embedding parent edge (or an anchor relation row) points at it. There
//! is no refcount field to drift: `is_held_by_others` queries actual
//! edges on demand, and deletions are synchronous and idempotent so
//! callers observe them immediately.

use crate::error::{CacheError, CacheResult};
use crate::file_storage::FileStorage;
use crate::info::{FileInfoManager, ObjectInfoManager, RelationshipInfoManager};
use crate::responses;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};
use syncline_store::{ObjectStore, RelationshipRow, StoreError};
use syncline_types::{ClassId, InstanceKey, RelDirection};
use tracing::debug;

/// Graph operations: relate/unrelate, cardinality upsert, reachability
/// liveness, and two-phase cascading deletion.
#[derive(Clone)]
pub struct HierarchyManager {
    store: Arc<ObjectStore>,
    conn: Arc<Mutex<Connection>>,
    objects: ObjectInfoManager,
    relationships: RelationshipInfoManager,
    files: FileInfoManager,
    file_storage: FileStorage,
}

impl HierarchyManager {
    pub(crate) fn new(
        store: Arc<ObjectStore>,
        conn: Arc<Mutex<Connection>>,
        objects: ObjectInfoManager,
        relationships: RelationshipInfoManager,
        files: FileInfoManager,
        file_storage: FileStorage,
    ) -> Self {
        Self {
            store,
            conn,
            objects,
            relationships,
            files,
            file_storage,
        }
    }

    /// Creates a relationship instance; fails if the store rejects it.
    pub fn relate(
        &self,
        source: InstanceKey,
        target: InstanceKey,
        rel_class: ClassId,
    ) -> CacheResult<InstanceKey> {
        Ok(self
            .store
            .insert_relationship(rel_class, source, target, &serde_json::json!({}))?)
    }

    /// Creates the relationship unless the exact edge already exists.
    pub fn relate_if_absent(
        &self,
        source: InstanceKey,
        target: InstanceKey,
        rel_class: ClassId,
    ) -> CacheResult<InstanceKey> {
        if let Some(existing) = self.store.find_relationship(rel_class, source, target)? {
            return Ok(existing.key);
        }
        self.relate(source, target, rel_class)
    }

    /// Upsert semantics for at-most-one relationship ends: deletes any
    /// relationship already occupying such an end with a different
    /// partner, collecting partners that become unreachable.
    ///
    /// Returns the instances deleted by the cleanup.
    pub fn delete_for_cardinality_violating_relate(
        &self,
        source: InstanceKey,
        target: InstanceKey,
        rel_class: ClassId,
    ) -> CacheResult<Vec<InstanceKey>> {
        let def = self.store.class(rel_class)?;
        let syncline_store::ClassKind::Relationship {
            source: source_end,
            target: target_end,
            ..
        } = def.kind
        else {
            return Err(CacheError::Store(StoreError::SchemaViolation(format!(
                "{rel_class} is not a relationship class"
            ))));
        };

        let mut deleted = Vec::new();
        // An at-most-one target end: the source may point at one partner.
        if target_end.at_most_one {
            for row in self
                .store
                .relationships_of_class(source, rel_class, RelDirection::Forward)?
            {
                if row.target != target {
                    self.unrelate(row)?;
                    if self.try_cleanup(row.target)? {
                        deleted.push(row.target);
                    }
                }
            }
        }
        // An at-most-one source end: the target may be pointed at once.
        if source_end.at_most_one {
            for row in self
                .store
                .relationships_of_class(target, rel_class, RelDirection::Backward)?
            {
                if row.source != source {
                    self.unrelate(row)?;
                    if self.try_cleanup(row.source)? {
                        deleted.push(row.source);
                    }
                }
            }
        }
        Ok(deleted)
    }

    /// True iff at least one Holding/Embedding parent edge points at the
    /// node, or the node is an anchor (root/response/page) of the cache.
    pub fn is_held_by_others(&self, node: InstanceKey) -> CacheResult<bool> {
        if self.is_anchor(node)? {
            return Ok(true);
        }
        for row in self.store.relationships_of(node, Some(RelDirection::Backward))? {
            if self.store.relationship_strength(row.key.class)?.holds() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Deletes the node iff nothing holds it. Returns whether it was
    /// deleted.
    pub fn check_and_cleanup_hierarchy(&self, node: InstanceKey) -> CacheResult<bool> {
        self.try_cleanup(node)
    }

    fn try_cleanup(&self, node: InstanceKey) -> CacheResult<bool> {
        if !self.store.instance_exists(node)? {
            return Ok(false);
        }
        if self.is_held_by_others(node)? {
            return Ok(false);
        }
        self.delete_instance(node)?;
        Ok(true)
    }

    /// Removes a node and all of its metadata from the cache.
    ///
    /// Two-phase: the full removal set (data row, touching edges, object/
    /// relationship/file infos, the stored file) is computed up front, then
    /// deleted as one batch; former children that lost their last holder
    /// are collected recursively. Children still reachable via another
    /// Holding/Embedding path survive.
    pub fn delete_instance(&self, node: InstanceKey) -> CacheResult<()> {
        let removed = self.remove_data_and_metadata(node, true)?;
        self.cleanup_orphaned_children(&removed)?;
        Ok(())
    }

    /// Removes the node's data while keeping its object info as a
    /// tombstone for pending-delete bookkeeping.
    pub(crate) fn delete_instance_keeping_change(&self, node: InstanceKey) -> CacheResult<()> {
        let removed = self.remove_data_and_metadata(node, false)?;
        self.cleanup_orphaned_children(&removed)?;
        Ok(())
    }

    /// Phase one: compute and delete the removal batch. Returns the edges
    /// that were removed with the node.
    fn remove_data_and_metadata(
        &self,
        node: InstanceKey,
        remove_object_info: bool,
    ) -> CacheResult<Vec<RelationshipRow>> {
        // Pages referencing the node go stale the moment it disappears;
        // their membership edges vanish below, so invalidate first.
        responses::invalidate_pages_containing(&self.conn, node)?;

        let file = self.files.read_by_owner(node)?;
        let object = self.objects.read_by_instance(node)?;

        let removed = self.store.delete_instance(node)?;

        if let Some(key) = file.key {
            self.file_storage.remove_stored_file(&file)?;
            self.files.delete(key)?;
        }
        for row in &removed {
            self.relationships.delete_by_instance(row.key)?;
        }
        if remove_object_info {
            if let Some(key) = object.key {
                self.objects.delete(key)?;
            }
        }
        debug!(%node, edges = removed.len(), "removed instance from cache");
        Ok(removed)
    }

    /// Phase two: cascade-check every former child.
    fn cleanup_orphaned_children(&self, removed: &[RelationshipRow]) -> CacheResult<()> {
        for row in removed {
            if self.store.relationship_strength(row.key.class)?.holds() {
                self.try_cleanup(row.target)?;
            }
        }
        Ok(())
    }

    /// Deletes one edge row together with its metadata record.
    pub(crate) fn unrelate(&self, row: RelationshipRow) -> CacheResult<()> {
        self.store.delete_relationship(row.key)?;
        self.relationships.delete_by_instance(row.key)?;
        Ok(())
    }

    /// Deletes all `rel_class` edges leaving `parent`, then cascade-checks
    /// every former child.
    pub fn remove_all_children_from_parent(
        &self,
        parent: InstanceKey,
        rel_class: ClassId,
    ) -> CacheResult<()> {
        let rows = self
            .store
            .relationships_of_class(parent, rel_class, RelDirection::Forward)?;
        for row in &rows {
            self.unrelate(*row)?;
        }
        for row in &rows {
            self.try_cleanup(row.target)?;
        }
        Ok(())
    }

    /// Anchor relations make a node its own holder: named roots, response
    /// anchors and page anchors are alive while their rows exist.
    fn is_anchor(&self, node: InstanceKey) -> CacheResult<bool> {
        let conn = self.conn.lock().unwrap();
        let found: bool = conn.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM roots WHERE class_id = ?1 AND instance_id = ?2
                UNION ALL
                SELECT 1 FROM cached_responses WHERE class_id = ?1 AND instance_id = ?2
                UNION ALL
                SELECT 1 FROM response_pages WHERE class_id = ?1 AND instance_id = ?2
             )",
            params![node.class.as_raw(), node.id.as_raw()],
            |row| row.get(0),
        )?;
        Ok(found)
    }
}
