//! The change manager: public surface for local edits and for reconciling
//! server outcomes against possibly-diverged local state.
//!
//! Every local create/modify/delete is tracked on the entity's Info
//! record: a `ChangeStatus`, a change number from one global sequence
//! (causally grouping related changes), and a per-record revision counter
//! used for optimistic concurrency against in-flight sync snapshots.
//!
//! The sync-active flag is session state on this instance, not process
//! state: two caches in one process gate independently.

use crate::error::{invalid_state, CacheResult};
use crate::file_storage::FileStorage;
use crate::hierarchy::HierarchyManager;
use crate::info::{
    FileInfoManager, ObjectInfo, ObjectInfoManager, RelationshipInfo, RelationshipInfoManager,
};
use crate::internal::SEQ_CHANGE;
use crate::responses::CachedResponseManager;
use crate::roots::RootManager;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use syncline_store::ObjectStore;
use syncline_types::{
    new_local_id, CachedInstanceKey, ChangeStatus, ClassId, InfoKey, InstanceKey, ObjectId,
    FileLocation, SyncStatus,
};
use tracing::{debug, warn};

/// Which kind of entity a pending change or revision describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Object,
    Relationship,
    File,
}

/// One pending change, as listed for the sync engine.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub kind: EntityKind,
    /// The entity's data key; for files, the owner instance.
    pub key: InstanceKey,
    pub object_id: Option<ObjectId>,
    pub status: ChangeStatus,
    pub change_number: u64,
    pub sync_status: SyncStatus,
}

/// Point-in-time snapshot of one pending instance change, handed to the
/// sync engine and fed back into [`ChangeManager::commit_instance_revision`].
#[derive(Debug, Clone)]
pub struct InstanceRevision {
    pub kind: EntityKind,
    pub key: CachedInstanceKey,
    pub object_id: ObjectId,
    /// Server-resolved remote id; the sync engine sets this for creates.
    pub remote_id: String,
    pub status: ChangeStatus,
    pub change_number: u64,
    pub sync_status: SyncStatus,
    pub revision: u64,
    /// Created: all non-null properties. Modified: changed properties
    /// only, read-only properties stripped. Deleted: none.
    pub payload: Option<Value>,
    /// Relationship endpoints (relationships only).
    pub source: Option<InstanceKey>,
    pub target: Option<InstanceKey>,
}

impl InstanceRevision {
    pub fn set_remote_id(&mut self, remote_id: impl Into<String>) {
        self.remote_id = remote_id.into();
    }
}

/// Point-in-time snapshot of one pending file change.
#[derive(Debug, Clone)]
pub struct FileRevision {
    pub owner: InstanceKey,
    pub status: ChangeStatus,
    pub change_number: u64,
    pub sync_status: SyncStatus,
    pub revision: u64,
    pub file_path: Option<PathBuf>,
    pub file_name: Option<String>,
}

/// Public surface for local edits, diffs and commit reconciliation.
pub struct ChangeManager {
    store: Arc<ObjectStore>,
    conn: Arc<Mutex<Connection>>,
    objects: ObjectInfoManager,
    relationships: RelationshipInfoManager,
    files: FileInfoManager,
    hierarchy: HierarchyManager,
    roots: RootManager,
    responses: CachedResponseManager,
    file_storage: FileStorage,
    sync_active: Cell<bool>,
}

impl ChangeManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<ObjectStore>,
        conn: Arc<Mutex<Connection>>,
        objects: ObjectInfoManager,
        relationships: RelationshipInfoManager,
        files: FileInfoManager,
        hierarchy: HierarchyManager,
        roots: RootManager,
        responses: CachedResponseManager,
        file_storage: FileStorage,
    ) -> Self {
        Self {
            store,
            conn,
            objects,
            relationships,
            files,
            hierarchy,
            roots,
            responses,
            file_storage,
            sync_active: Cell::new(false),
        }
    }

    // ── Sync session gate ────────────────────────────────────────

    /// Marks a sync session active or inactive for this cache instance.
    pub fn set_sync_active(&self, active: bool) {
        self.sync_active.set(active);
    }

    #[must_use]
    pub fn is_sync_active(&self) -> bool {
        self.sync_active.get()
    }

    fn next_change_number(&self) -> CacheResult<u64> {
        Ok(self.store.next_sequence(SEQ_CHANGE)?)
    }

    // ── Objects ──────────────────────────────────────────────────

    /// Creates a brand-new local object with a placeholder remote id.
    pub fn create_object(
        &self,
        class: ClassId,
        properties: Value,
        sync_status: SyncStatus,
    ) -> CacheResult<CachedInstanceKey> {
        let def = self.store.class(class)?;
        if def.is_relationship() {
            return invalid_state(format!(
                "{} is a relationship class; use create_relationship",
                def.full_name()
            ));
        }
        let instance = self.store.insert_instance(class, &properties)?;
        let mut info = ObjectInfo::not_cached(ObjectId::new(class, new_local_id()));
        info.instance = Some(instance);
        info.change.status = ChangeStatus::Created;
        info.change.change_number = self.next_change_number()?;
        info.change.revision = 1;
        info.change.sync_status = sync_status;
        info.cached_at = Some(Utc::now());
        info.completeness = Some(syncline_types::Completeness::Full);
        let info_key = self.objects.save(&mut info)?;
        debug!(object = %info.object_id, "created local object");
        Ok(CachedInstanceKey::new(info_key, instance))
    }

    /// Applies a local edit, snapshotting the pre-edit data on the first
    /// modification of previously synced data.
    pub fn modify_object(&self, key: InstanceKey, properties: Value) -> CacheResult<()> {
        let mut info = self.objects.read_by_instance(key)?;
        if !info.is_in_cache() || !self.store.instance_exists(key)? {
            return invalid_state(format!("cannot modify {key}: not in cache"));
        }
        match info.change.status {
            ChangeStatus::Deleted => {
                return invalid_state(format!("cannot modify {key}: deleted"));
            }
            ChangeStatus::NoChange => {
                // First local edit of synced data: keep the pre-edit state
                // for diffs and revert.
                let current = self
                    .store
                    .read_instance(key)?
                    .unwrap_or_else(|| Value::Object(Map::new()));
                self.write_backup(info.key, &current)?;
                info.change.status = ChangeStatus::Modified;
                info.change.change_number = self.next_change_number()?;
            }
            // Created stays Created, Modified stays Modified; the change
            // number marks the episode, not each write.
            ChangeStatus::Created | ChangeStatus::Modified => {}
        }
        info.change.revision += 1;
        self.store.update_instance(key, &properties)?;
        self.objects.save(&mut info)?;
        Ok(())
    }

    /// Tombstones an object: the data record is removed from the graph
    /// while the Info survives so the pending delete can be synced.
    pub fn delete_object(&self, key: InstanceKey) -> CacheResult<()> {
        let mut info = self.objects.read_by_instance(key)?;
        if !info.is_in_cache() || !self.store.instance_exists(key)? {
            return invalid_state(format!("cannot delete {key}: not in cache"));
        }
        match info.change.status {
            ChangeStatus::Deleted => {
                return invalid_state(format!("cannot delete {key}: already deleted"));
            }
            status if self.is_sync_active() && status != ChangeStatus::NoChange => {
                return invalid_state(format!(
                    "cannot delete {key}: changed entity mid-sync"
                ));
            }
            // Deleting edited data starts a new causal step; a deleted
            // local creation keeps its number.
            ChangeStatus::NoChange | ChangeStatus::Modified => {
                info.change.change_number = self.next_change_number()?;
            }
            ChangeStatus::Created => {}
        }
        self.delete_backup(info.key)?;
        self.hierarchy.delete_instance_keeping_change(key)?;
        info.change.status = ChangeStatus::Deleted;
        info.change.revision += 1;
        self.objects.save(&mut info)?;
        debug!(object = %info.object_id, "tombstoned object");
        Ok(())
    }

    // ── Relationships ────────────────────────────────────────────

    /// Creates a local relationship between two cached instances,
    /// applying upsert semantics on at-most-one ends.
    pub fn create_relationship(
        &self,
        rel_class: ClassId,
        source: InstanceKey,
        target: InstanceKey,
        sync_status: SyncStatus,
    ) -> CacheResult<CachedInstanceKey> {
        if self.store.find_relationship(rel_class, source, target)?.is_some() {
            return invalid_state(format!(
                "relationship {rel_class} {source} -> {target} already exists"
            ));
        }
        self.hierarchy
            .delete_for_cardinality_violating_relate(source, target, rel_class)?;
        let instance = self.hierarchy.relate(source, target, rel_class)?;

        // A relationship created together with its endpoint joins the
        // endpoint's causal group instead of allocating a new number.
        let source_info = self.objects.read_by_instance(source)?;
        let target_info = self.objects.read_by_instance(target)?;
        let change_number = if source_info.change.status == ChangeStatus::Created {
            source_info.change.change_number
        } else if target_info.change.status == ChangeStatus::Created {
            target_info.change.change_number
        } else {
            self.next_change_number()?
        };

        let mut info = RelationshipInfo::not_cached(ObjectId::new(rel_class, new_local_id()));
        info.instance = Some(instance);
        info.source = Some(source);
        info.target = Some(target);
        info.change.status = ChangeStatus::Created;
        info.change.change_number = change_number;
        info.change.revision = 1;
        info.change.sync_status = sync_status;
        let info_key = self.relationships.save(&mut info)?;
        debug!(relationship = %info.object_id, "created local relationship");
        Ok(CachedInstanceKey::new(info_key, instance))
    }

    /// Tombstones a relationship, releasing a target that loses its last
    /// holder.
    pub fn delete_relationship(&self, key: InstanceKey) -> CacheResult<()> {
        let mut info = self.relationships.read_by_instance(key)?;
        if !info.is_in_cache() {
            return invalid_state(format!("cannot delete relationship {key}: not in cache"));
        }
        match info.change.status {
            ChangeStatus::Deleted => {
                return invalid_state(format!(
                    "cannot delete relationship {key}: already deleted"
                ));
            }
            status if self.is_sync_active() && status != ChangeStatus::NoChange => {
                return invalid_state(format!(
                    "cannot delete relationship {key}: changed entity mid-sync"
                ));
            }
            ChangeStatus::NoChange | ChangeStatus::Modified => {
                info.change.change_number = self.next_change_number()?;
            }
            ChangeStatus::Created => {}
        }
        let row = self.store.delete_relationship(key)?;
        info.change.status = ChangeStatus::Deleted;
        info.change.revision += 1;
        self.relationships.save(&mut info)?;
        if let Some(row) = row {
            if self.store.relationship_strength(key.class)?.holds() {
                self.hierarchy.check_and_cleanup_hierarchy(row.target)?;
            }
        }
        Ok(())
    }

    // ── Files ────────────────────────────────────────────────────

    /// Stages new file content for an object: the file is cached to the
    /// Persistent location and the attachment is marked Modified.
    pub fn modify_file(&self, owner: InstanceKey, source: &Path, copy: bool) -> CacheResult<()> {
        if !self.store.instance_exists(owner)? {
            return invalid_state(format!("cannot modify file of {owner}: not in cache"));
        }
        let mut info = self.files.read_by_owner(owner)?;
        if self.is_sync_active() && info.change.is_changed() {
            return invalid_state(format!(
                "cannot modify file of {owner}: changed file mid-sync"
            ));
        }
        self.file_storage
            .cache_file(&mut info, source, None, FileLocation::Persistent, copy)?;
        if info.change.status == ChangeStatus::NoChange {
            info.change.status = ChangeStatus::Modified;
            info.change.change_number = self.next_change_number()?;
        }
        info.change.revision += 1;
        self.files.save(&mut info)?;
        debug!(%owner, "staged file modification");
        Ok(())
    }

    /// Renames the staged copy of an already-modified file.
    pub fn modify_file_name(&self, owner: InstanceKey, new_name: &str) -> CacheResult<()> {
        let mut info = self.files.read_by_owner(owner)?;
        if !info.is_in_cache() || !info.has_file() {
            return invalid_state(format!("cannot rename file of {owner}: no cached file"));
        }
        if info.change.status != ChangeStatus::Modified {
            return invalid_state(format!(
                "cannot rename file of {owner}: file is not modified"
            ));
        }
        if self.is_sync_active() {
            return invalid_state(format!("cannot rename file of {owner}: sync active"));
        }
        self.file_storage.rename_stored_file(&mut info, new_name)?;
        info.change.revision += 1;
        self.files.save(&mut info)?;
        Ok(())
    }

    /// Relocates a cached file between storage classes.
    pub fn set_file_location(&self, owner: InstanceKey, location: FileLocation) -> CacheResult<()> {
        let mut info = self.files.read_by_owner(owner)?;
        if !info.is_in_cache() || !info.has_file() {
            return invalid_state(format!("cannot relocate file of {owner}: no cached file"));
        }
        if self.is_sync_active() && info.change.is_changed() {
            return invalid_state(format!(
                "cannot relocate file of {owner}: changed file mid-sync"
            ));
        }
        self.file_storage.set_location(&mut info, location)?;
        self.files.save(&mut info)?;
        Ok(())
    }

    // ── Change queries ───────────────────────────────────────────

    /// Change descriptor of an object; NoChange sentinel when unknown.
    pub fn object_change(&self, key: InstanceKey) -> CacheResult<syncline_types::ChangeInfo> {
        Ok(self.objects.read_by_instance(key)?.change)
    }

    /// Change descriptor of a relationship; NoChange sentinel when unknown.
    pub fn relationship_change(&self, key: InstanceKey) -> CacheResult<syncline_types::ChangeInfo> {
        Ok(self.relationships.read_by_instance(key)?.change)
    }

    /// Change descriptor of an object's file attachment.
    pub fn file_change(&self, owner: InstanceKey) -> CacheResult<syncline_types::ChangeInfo> {
        Ok(self.files.read_by_owner(owner)?.change)
    }

    pub fn has_changes(&self) -> CacheResult<bool> {
        Ok(!self.changes(false)?.is_empty())
    }

    /// All pending changes ordered by change number; with `only_ready`,
    /// limited to changes whose sync marker is [`SyncStatus::READY`].
    pub fn changes(&self, only_ready: bool) -> CacheResult<Vec<PendingChange>> {
        let mut list = Vec::new();
        for info in self.objects.changed()? {
            let Some(key) = info.instance else { continue };
            list.push(PendingChange {
                kind: EntityKind::Object,
                key,
                object_id: Some(info.object_id),
                status: info.change.status,
                change_number: info.change.change_number,
                sync_status: info.change.sync_status,
            });
        }
        for info in self.relationships.changed()? {
            let Some(key) = info.instance else { continue };
            list.push(PendingChange {
                kind: EntityKind::Relationship,
                key,
                object_id: Some(info.object_id),
                status: info.change.status,
                change_number: info.change.change_number,
                sync_status: info.change.sync_status,
            });
        }
        for info in self.files.changed()? {
            list.push(PendingChange {
                kind: EntityKind::File,
                key: info.owner,
                object_id: None,
                status: info.change.status,
                change_number: info.change.change_number,
                sync_status: info.change.sync_status,
            });
        }
        if only_ready {
            list.retain(|c| c.sync_status == SyncStatus::READY);
        }
        list.sort_by_key(|c| c.change_number);
        Ok(list)
    }

    /// Pending changes touching one instance (its own change, its file
    /// change, and changed relationships it terminates).
    pub fn changes_for(&self, key: InstanceKey) -> CacheResult<Vec<PendingChange>> {
        let mut list = Vec::new();
        let object = self.objects.read_by_instance(key)?;
        if object.change.is_changed() {
            list.push(PendingChange {
                kind: EntityKind::Object,
                key,
                object_id: Some(object.object_id),
                status: object.change.status,
                change_number: object.change.change_number,
                sync_status: object.change.sync_status,
            });
        }
        let relationship = self.relationships.read_by_instance(key)?;
        if relationship.change.is_changed() {
            list.push(PendingChange {
                kind: EntityKind::Relationship,
                key,
                object_id: Some(relationship.object_id),
                status: relationship.change.status,
                change_number: relationship.change.change_number,
                sync_status: relationship.change.sync_status,
            });
        }
        for info in self.relationships.changed_touching(key)? {
            if info.instance == Some(key) {
                continue;
            }
            list.push(PendingChange {
                kind: EntityKind::Relationship,
                key: info.instance.unwrap_or(key),
                object_id: Some(info.object_id),
                status: info.change.status,
                change_number: info.change.change_number,
                sync_status: info.change.sync_status,
            });
        }
        let file = self.files.read_by_owner(key)?;
        if file.change.is_changed() {
            list.push(PendingChange {
                kind: EntityKind::File,
                key,
                object_id: None,
                status: file.change.status,
                change_number: file.change.change_number,
                sync_status: file.change.sync_status,
            });
        }
        list.sort_by_key(|c| c.change_number);
        Ok(list)
    }

    /// Pending Created relationships terminating at an instance.
    pub fn created_relationships_of(
        &self,
        key: InstanceKey,
    ) -> CacheResult<Vec<RelationshipInfo>> {
        Ok(self
            .relationships
            .changed_touching(key)?
            .into_iter()
            .filter(|info| info.change.status == ChangeStatus::Created)
            .collect())
    }

    /// Adjusts the sync marker of an already-changed object or
    /// relationship.
    pub fn set_sync_status(&self, key: InstanceKey, status: SyncStatus) -> CacheResult<()> {
        if self.store.class(key.class)?.is_relationship() {
            let mut info = self.relationships.read_by_instance(key)?;
            if !info.change.is_changed() {
                return invalid_state(format!("relationship {key} has no pending change"));
            }
            info.change.sync_status = status;
            self.relationships.save(&mut info)?;
        } else {
            let mut info = self.objects.read_by_instance(key)?;
            if !info.is_in_cache() || !info.change.is_changed() {
                return invalid_state(format!("object {key} has no pending change"));
            }
            info.change.sync_status = status;
            self.objects.save(&mut info)?;
        }
        Ok(())
    }

    /// Adjusts the sync marker of a changed file attachment.
    pub fn set_file_sync_status(&self, owner: InstanceKey, status: SyncStatus) -> CacheResult<()> {
        let mut info = self.files.read_by_owner(owner)?;
        if !info.change.is_changed() {
            return invalid_state(format!("file of {owner} has no pending change"));
        }
        info.change.sync_status = status;
        self.files.save(&mut info)?;
        Ok(())
    }

    // ── Diffs, backups and revert ────────────────────────────────

    fn write_backup(&self, info_key: Option<InfoKey>, props: &Value) -> CacheResult<()> {
        let Some(info_key) = info_key else {
            return invalid_state("backup requires a saved info record");
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO object_backup (info_id, props) VALUES (?1, ?2)",
            params![info_key.as_raw(), serde_json::to_string(props)?],
        )?;
        Ok(())
    }

    fn read_backup(&self, info_key: Option<InfoKey>) -> CacheResult<Option<Value>> {
        let Some(info_key) = info_key else {
            return Ok(None);
        };
        let conn = self.conn.lock().unwrap();
        let text: Option<String> = conn
            .query_row(
                "SELECT props FROM object_backup WHERE info_id = ?1",
                params![info_key.as_raw()],
                |row| row.get(0),
            )
            .optional()?;
        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn delete_backup(&self, info_key: Option<InfoKey>) -> CacheResult<()> {
        if let Some(info_key) = info_key {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "DELETE FROM object_backup WHERE info_id = ?1",
                params![info_key.as_raw()],
            )?;
        }
        Ok(())
    }

    /// Properties changed since the pre-edit snapshot, read-only
    /// properties stripped. Only valid for Modified objects.
    pub fn read_modified_properties(&self, key: InstanceKey) -> CacheResult<Value> {
        let info = self.objects.read_by_instance(key)?;
        if !info.is_in_cache() || info.change.status != ChangeStatus::Modified {
            return invalid_state(format!("{key} has no modification to diff"));
        }
        let Some(backup) = self.read_backup(info.key)? else {
            return invalid_state(format!("{key} has no backup to diff against"));
        };
        let live = self
            .store
            .read_instance(key)?
            .unwrap_or_else(|| Value::Object(Map::new()));
        let read_only: Vec<String> = {
            let def = self.store.class(key.class)?;
            def.properties
                .iter()
                .filter(|p| p.read_only)
                .map(|p| p.name.clone())
                .collect()
        };
        Ok(diff_properties(&live, &backup, &read_only))
    }

    /// Restores the pre-edit snapshot of a Modified object and clears its
    /// change. Unconditionally refused while sync is active.
    pub fn revert_modified_object(&self, key: InstanceKey) -> CacheResult<()> {
        if self.is_sync_active() {
            return invalid_state(format!("cannot revert {key}: sync active"));
        }
        let mut info = self.objects.read_by_instance(key)?;
        if !info.is_in_cache() || info.change.status != ChangeStatus::Modified {
            return invalid_state(format!("cannot revert {key}: not modified"));
        }
        let Some(backup) = self.read_backup(info.key)? else {
            return invalid_state(format!("cannot revert {key}: no backup"));
        };
        self.store.update_instance(key, &backup)?;
        self.delete_backup(info.key)?;
        info.change.status = ChangeStatus::NoChange;
        info.change.change_number = 0;
        info.change.revision += 1;
        self.objects.save(&mut info)?;
        debug!(object = %info.object_id, "reverted modification");
        Ok(())
    }

    // ── Revisions for the sync engine ────────────────────────────

    /// Snapshot of an object or relationship change; `None` when nothing
    /// is pending.
    pub fn read_instance_revision(&self, key: InstanceKey) -> CacheResult<Option<InstanceRevision>> {
        if self.store.class(key.class)?.is_relationship() {
            let info = self.relationships.read_by_instance(key)?;
            if !info.is_in_cache() || !info.change.is_changed() {
                return Ok(None);
            }
            let (Some(info_key), Some(instance)) = (info.key, info.instance) else {
                return Ok(None);
            };
            return Ok(Some(InstanceRevision {
                kind: EntityKind::Relationship,
                key: CachedInstanceKey::new(info_key, instance),
                remote_id: info.object_id.remote_id.clone(),
                object_id: info.object_id,
                status: info.change.status,
                change_number: info.change.change_number,
                sync_status: info.change.sync_status,
                revision: info.change.revision,
                payload: None,
                source: info.source,
                target: info.target,
            }));
        }

        let info = self.objects.read_by_instance(key)?;
        if !info.is_in_cache() || !info.change.is_changed() {
            return Ok(None);
        }
        let (Some(info_key), Some(instance)) = (info.key, info.instance) else {
            return Ok(None);
        };
        let payload = match info.change.status {
            ChangeStatus::Created => {
                let props = self
                    .store
                    .read_instance(instance)?
                    .unwrap_or_else(|| Value::Object(Map::new()));
                Some(strip_nulls(&props))
            }
            ChangeStatus::Modified => Some(self.read_modified_properties(instance)?),
            _ => None,
        };
        Ok(Some(InstanceRevision {
            kind: EntityKind::Object,
            key: CachedInstanceKey::new(info_key, instance),
            remote_id: info.object_id.remote_id.clone(),
            object_id: info.object_id,
            status: info.change.status,
            change_number: info.change.change_number,
            sync_status: info.change.sync_status,
            revision: info.change.revision,
            payload,
            source: None,
            target: None,
        }))
    }

    /// Snapshot of a pending file change; `None` when nothing is pending.
    pub fn read_file_revision(&self, owner: InstanceKey) -> CacheResult<Option<FileRevision>> {
        let info = self.files.read_by_owner(owner)?;
        if !info.is_in_cache() || !info.change.is_changed() {
            return Ok(None);
        }
        Ok(Some(FileRevision {
            owner,
            status: info.change.status,
            change_number: info.change.change_number,
            sync_status: info.change.sync_status,
            revision: info.change.revision,
            file_path: self.file_storage.file_path(&info),
            file_name: info.file_name,
        }))
    }

    // ── Commit reconciliation ────────────────────────────────────

    /// Reconciles a server outcome against the entity's current state,
    /// comparing the snapshot revision with the live revision to detect
    /// local edits made while the sync was in flight.
    pub fn commit_instance_revision(&self, revision: &InstanceRevision) -> CacheResult<()> {
        match revision.kind {
            EntityKind::Object => self.commit_object_revision(revision),
            EntityKind::Relationship => self.commit_relationship_revision(revision),
            EntityKind::File => invalid_state("file revisions use commit_file_revision"),
        }
    }

    fn commit_object_revision(&self, revision: &InstanceRevision) -> CacheResult<()> {
        let mut info = self.objects.read_by_instance(revision.key.instance)?;
        if !info.is_in_cache() {
            return invalid_state(format!(
                "cannot commit {}: not in cache",
                revision.key.instance
            ));
        }
        if !info.change.is_changed() {
            return invalid_state(format!(
                "cannot commit {}: no pending change",
                revision.key.instance
            ));
        }
        if revision.status == ChangeStatus::Created {
            if revision.remote_id.is_empty() {
                return invalid_state("commit of a creation carries no remote id");
            }
            if syncline_types::is_local_id(&revision.remote_id) {
                return invalid_state("commit of a creation left the placeholder id unresolved");
            }
        }

        if info.change.revision == revision.revision {
            // No concurrent local edit since the snapshot was taken.
            match info.change.status {
                ChangeStatus::Created => {
                    self.adopt_remote_id(&mut info, &revision.remote_id)?;
                    self.responses
                        .remove_additional_instance_everywhere(revision.key.instance)?;
                    self.clear_change(&mut info)?;
                }
                ChangeStatus::Modified => {
                    self.delete_backup(info.key)?;
                    self.clear_change(&mut info)?;
                }
                ChangeStatus::Deleted => {
                    // The server confirmed the delete: drop the tombstone.
                    self.delete_backup(info.key)?;
                    if let Some(key) = info.key {
                        self.objects.delete(key)?;
                    }
                }
                ChangeStatus::NoChange => {}
            }
            debug!(object = %revision.object_id, "committed instance revision");
            return Ok(());
        }

        // The entity diverged while the sync was in flight.
        match info.change.status {
            ChangeStatus::Created | ChangeStatus::Modified => {
                // Merge: apply the server outcome onto the backup
                // baseline, never onto the newer live data. A missing
                // backup (Created at snapshot time) uses the snapshot's
                // own payload as baseline.
                let baseline = self
                    .read_backup(info.key)?
                    .unwrap_or_else(|| Value::Object(Map::new()));
                let merged = overlay_properties(&baseline, revision.payload.as_ref());
                self.write_backup(info.key, &merged)?;
                if revision.status == ChangeStatus::Created {
                    self.adopt_remote_id(&mut info, &revision.remote_id)?;
                    self.responses
                        .remove_additional_instance_everywhere(revision.key.instance)?;
                }
                info.change.status = ChangeStatus::Modified;
                self.objects.save(&mut info)?;
                debug!(object = %info.object_id, "merged committed revision under newer local edits");
            }
            ChangeStatus::Deleted => {
                // Deleted locally after the snapshot: bookkeeping only.
                // Adopt the server id so the delete is sent next sync.
                if revision.status == ChangeStatus::Created {
                    self.adopt_remote_id(&mut info, &revision.remote_id)?;
                    self.objects.save(&mut info)?;
                }
            }
            ChangeStatus::NoChange => {
                warn!(object = %info.object_id, "revision mismatch on unchanged entity");
                return invalid_state(format!(
                    "cannot commit {}: revision diverged on unchanged entity",
                    revision.key.instance
                ));
            }
        }
        Ok(())
    }

    fn commit_relationship_revision(&self, revision: &InstanceRevision) -> CacheResult<()> {
        let mut info = self.relationships.read_by_instance(revision.key.instance)?;
        if !info.is_in_cache() {
            return invalid_state(format!(
                "cannot commit relationship {}: not in cache",
                revision.key.instance
            ));
        }
        if !info.change.is_changed() {
            return invalid_state(format!(
                "cannot commit relationship {}: no pending change",
                revision.key.instance
            ));
        }
        if revision.status == ChangeStatus::Created && revision.remote_id.is_empty() {
            // The server refused to materialize the relationship: it has
            // no remote identity, so the local record is withdrawn.
            if let Some(row) = self.store.delete_relationship(revision.key.instance)? {
                if self.store.relationship_strength(row.key.class)?.holds() {
                    self.hierarchy.check_and_cleanup_hierarchy(row.target)?;
                }
            }
            if let Some(key) = info.key {
                self.relationships.delete(key)?;
            }
            return Ok(());
        }
        if revision.status == ChangeStatus::Created
            && syncline_types::is_local_id(&revision.remote_id)
        {
            return invalid_state("commit of a creation left the placeholder id unresolved");
        }

        if info.change.revision == revision.revision {
            match info.change.status {
                ChangeStatus::Created => {
                    info.object_id.remote_id = revision.remote_id.clone();
                    self.clear_relationship_change(&mut info)?;
                }
                ChangeStatus::Modified => {
                    self.clear_relationship_change(&mut info)?;
                }
                ChangeStatus::Deleted => {
                    if let Some(key) = info.key {
                        self.relationships.delete(key)?;
                    }
                }
                ChangeStatus::NoChange => {}
            }
            return Ok(());
        }

        match info.change.status {
            ChangeStatus::Deleted => {
                if revision.status == ChangeStatus::Created {
                    info.object_id.remote_id = revision.remote_id.clone();
                    self.relationships.save(&mut info)?;
                }
                Ok(())
            }
            _ => invalid_state(format!(
                "cannot commit relationship {}: revision diverged",
                revision.key.instance
            )),
        }
    }

    /// Applies a server-assigned remote id, re-parenting and dropping a
    /// stale duplicate if the id already names another cached instance.
    fn adopt_remote_id(&self, info: &mut ObjectInfo, remote_id: &str) -> CacheResult<()> {
        let new_id = ObjectId::new(info.object_id.class, remote_id);
        let existing = self.objects.read_by_object_id(&new_id)?;
        if let (Some(existing_key), Some(existing_instance)) = (existing.key, existing.instance) {
            if existing.key != info.key {
                if self.store.instance_exists(existing_instance)? {
                    if let Some(instance) = info.instance {
                        self.roots
                            .copy_root_relationships(existing_instance, instance)?;
                    }
                    self.hierarchy.delete_instance(existing_instance)?;
                }
                // The duplicate may already be tombstoned (data row gone);
                // its info must not shadow the adopted identity either way.
                self.objects.delete(existing_key)?;
                debug!(object = %new_id, "replaced stale duplicate during commit");
            }
        }
        info.object_id = new_id;
        Ok(())
    }

    fn clear_change(&self, info: &mut ObjectInfo) -> CacheResult<()> {
        info.change.status = ChangeStatus::NoChange;
        info.change.change_number = 0;
        self.objects.save(info)?;
        Ok(())
    }

    fn clear_relationship_change(&self, info: &mut RelationshipInfo) -> CacheResult<()> {
        info.change.status = ChangeStatus::NoChange;
        info.change.change_number = 0;
        self.relationships.save(info)?;
        Ok(())
    }

    /// Reconciles a server outcome for a file change. A confirmed upload
    /// demotes the synced copy to the Temporary location; it is a plain
    /// cache copy from then on.
    pub fn commit_file_revision(&self, revision: &FileRevision) -> CacheResult<()> {
        let mut info = self.files.read_by_owner(revision.owner)?;
        if !info.is_in_cache() || !info.change.is_changed() {
            return invalid_state(format!(
                "cannot commit file of {}: no pending change",
                revision.owner
            ));
        }
        if info.change.revision != revision.revision {
            // Re-staged while the upload was in flight: the newer content
            // stays pending.
            return Ok(());
        }
        self.file_storage
            .set_location(&mut info, FileLocation::Temporary)?;
        info.change.status = ChangeStatus::NoChange;
        info.change.change_number = 0;
        self.files.save(&mut info)?;
        debug!(owner = %revision.owner, "committed file revision");
        Ok(())
    }

    /// Purges Deleted records the server never knew about (their remote id
    /// is still a local placeholder); committed-then-deleted records stay
    /// queued for the next sync.
    pub fn commit_local_deletions(&self) -> CacheResult<()> {
        for info in self.objects.changed()? {
            if info.change.status == ChangeStatus::Deleted && info.is_local() {
                self.delete_backup(info.key)?;
                if let Some(key) = info.key {
                    self.objects.delete(key)?;
                }
            }
        }
        for info in self.relationships.changed()? {
            if info.change.status == ChangeStatus::Deleted && info.is_local() {
                if let Some(key) = info.key {
                    self.relationships.delete(key)?;
                }
            }
        }
        Ok(())
    }

    // ── Created instances in cached responses ────────────────────

    /// Attaches a locally created object to a cached listing without
    /// invalidating the listing's pages.
    pub fn add_created_instance_to_response(
        &self,
        response: &str,
        key: InstanceKey,
    ) -> CacheResult<()> {
        if self.store.class(key.class)?.is_relationship() {
            return invalid_state("only created objects can be added to responses");
        }
        let info = self.objects.read_by_instance(key)?;
        if !info.is_in_cache() || info.change.status != ChangeStatus::Created {
            return invalid_state(format!(
                "cannot add {key} to a response: not a pending creation"
            ));
        }
        self.responses.add_additional_instance(response, key)
    }

    /// Detaches a previously added created object from a listing.
    pub fn remove_created_instance_from_response(
        &self,
        response: &str,
        key: InstanceKey,
    ) -> CacheResult<()> {
        let info = self.objects.read_by_instance(key)?;
        if !info.is_in_cache() {
            return invalid_state(format!("{key} is not in cache"));
        }
        if !self.responses.remove_additional_instance(response, key)? {
            return invalid_state(format!("{key} was not added to response {response}"));
        }
        Ok(())
    }
}

/// Properties whose live value differs from the backup baseline, with
/// read-only properties stripped. Properties missing from the live data
/// but present in the baseline surface as nulls.
fn diff_properties(live: &Value, baseline: &Value, read_only: &[String]) -> Value {
    let empty = Map::new();
    let live = live.as_object().unwrap_or(&empty);
    let baseline = baseline.as_object().unwrap_or(&empty);
    let mut diff = Map::new();
    for (name, value) in live {
        if read_only.iter().any(|p| p == name) {
            continue;
        }
        if baseline.get(name) != Some(value) {
            diff.insert(name.clone(), value.clone());
        }
    }
    for name in baseline.keys() {
        if read_only.iter().any(|p| p == name) {
            continue;
        }
        if !live.contains_key(name) {
            diff.insert(name.clone(), Value::Null);
        }
    }
    Value::Object(diff)
}

/// Applies a payload's properties onto a baseline bag.
fn overlay_properties(baseline: &Value, payload: Option<&Value>) -> Value {
    let mut merged = baseline
        .as_object()
        .cloned()
        .unwrap_or_default();
    if let Some(Value::Object(payload)) = payload {
        for (name, value) in payload {
            merged.insert(name.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// Drops null-valued properties from a bag.
fn strip_nulls(props: &Value) -> Value {
    match props.as_object() {
        Some(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        None => props.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::{diff_properties, overlay_properties, strip_nulls};
    use serde_json::json;

    #[test]
    fn diff_reports_changed_properties_only() {
        let live = json!({"A": "1", "B": "2"});
        let baseline = json!({"A": "1", "B": "1"});
        assert_eq!(diff_properties(&live, &baseline, &[]), json!({"B": "2"}));
    }

    #[test]
    fn diff_reports_removed_properties_as_null() {
        let live = json!({"A": "1"});
        let baseline = json!({"A": "1", "B": "1"});
        assert_eq!(diff_properties(&live, &baseline, &[]), json!({"B": null}));
    }

    #[test]
    fn diff_strips_read_only_properties() {
        let live = json!({"A": "2", "Size": 42});
        let baseline = json!({"A": "1", "Size": 7});
        assert_eq!(
            diff_properties(&live, &baseline, &["Size".to_owned()]),
            json!({"A": "2"})
        );
    }

    #[test]
    fn overlay_applies_payload_over_baseline() {
        let baseline = json!({"A": "1", "B": "1"});
        let payload = json!({"B": "2"});
        assert_eq!(
            overlay_properties(&baseline, Some(&payload)),
            json!({"A": "1", "B": "2"})
        );
    }

    #[test]
    fn strip_nulls_drops_null_values() {
        assert_eq!(strip_nulls(&json!({"A": "1", "B": null})), json!({"A": "1"}));
    }
}
