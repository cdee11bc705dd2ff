//! The cache façade: opens the store, wires the managers together and
//! offers the small read surface shared by all of them.

use crate::changes::ChangeManager;
use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::file_storage::FileStorage;
use crate::hierarchy::HierarchyManager;
use crate::info::{FileInfoManager, ObjectInfo, ObjectInfoManager, RelationshipInfoManager};
use crate::instance_cache::{CachedInstances, FetchedInstance, InstanceCacheHelper};
use crate::internal::{init_meta_schema, CacheSchema};
use crate::responses::CachedResponseManager;
use crate::roots::RootManager;
use rusqlite::Connection;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use syncline_store::ObjectStore;
use syncline_types::{
    CachedInstanceKey, ClassId, FileLocation, InstanceKey, ObjectId,
};

/// One cache instance: a store connection plus its managers.
///
/// A single logical writer session drives all mutation; nothing here
/// locks beyond the store's own connection serialization.
pub struct Cache {
    store: Arc<ObjectStore>,
    objects: ObjectInfoManager,
    relationships: RelationshipInfoManager,
    files: FileInfoManager,
    hierarchy: HierarchyManager,
    roots: RootManager,
    responses: CachedResponseManager,
    instance_cache: InstanceCacheHelper,
    file_storage: FileStorage,
    changes: ChangeManager,
}

impl Cache {
    /// Opens a cache per the configuration, creating directories, store
    /// relations and the internal anchor classes as needed.
    pub fn open(config: &CacheConfig) -> CacheResult<Self> {
        let conn = match &config.db_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        std::fs::create_dir_all(&config.persistent_dir)?;
        std::fs::create_dir_all(&config.temporary_dir)?;

        let conn = Arc::new(Mutex::new(conn));
        let store = Arc::new(ObjectStore::open_with_conn(Arc::clone(&conn))?);
        let schema = CacheSchema::register(&store)?;
        init_meta_schema(&conn)?;

        let objects = ObjectInfoManager::new(Arc::clone(&store), Arc::clone(&conn));
        let relationships = RelationshipInfoManager::new(Arc::clone(&conn));
        let files = FileInfoManager::new(Arc::clone(&conn));
        let file_storage = FileStorage::new(
            Arc::clone(&store),
            config.persistent_dir.clone(),
            config.temporary_dir.clone(),
            config.external_dir.clone(),
        );
        let hierarchy = HierarchyManager::new(
            Arc::clone(&store),
            Arc::clone(&conn),
            objects.clone(),
            relationships.clone(),
            files.clone(),
            file_storage.clone(),
        );
        let roots = RootManager::new(
            Arc::clone(&store),
            Arc::clone(&conn),
            schema,
            hierarchy.clone(),
        );
        let responses = CachedResponseManager::new(
            Arc::clone(&store),
            Arc::clone(&conn),
            schema,
            hierarchy.clone(),
        );
        let instance_cache = InstanceCacheHelper::new(
            Arc::clone(&store),
            objects.clone(),
            relationships.clone(),
            hierarchy.clone(),
        );
        let changes = ChangeManager::new(
            Arc::clone(&store),
            Arc::clone(&conn),
            objects.clone(),
            relationships.clone(),
            files.clone(),
            hierarchy.clone(),
            roots.clone(),
            responses.clone(),
            file_storage.clone(),
        );

        Ok(Self {
            store,
            objects,
            relationships,
            files,
            hierarchy,
            roots,
            responses,
            instance_cache,
            file_storage,
            changes,
        })
    }

    /// In-memory cache with file roots under `base` (for testing).
    pub fn open_in_memory(base: &std::path::Path) -> CacheResult<Self> {
        Self::open(&CacheConfig::in_memory(base))
    }

    // ── Component access ─────────────────────────────────────────

    #[must_use]
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    #[must_use]
    pub fn change_manager(&self) -> &ChangeManager {
        &self.changes
    }

    #[must_use]
    pub fn roots(&self) -> &RootManager {
        &self.roots
    }

    #[must_use]
    pub fn responses(&self) -> &CachedResponseManager {
        &self.responses
    }

    #[must_use]
    pub fn hierarchy(&self) -> &HierarchyManager {
        &self.hierarchy
    }

    #[must_use]
    pub fn instance_cache(&self) -> &InstanceCacheHelper {
        &self.instance_cache
    }

    #[must_use]
    pub fn file_storage(&self) -> &FileStorage {
        &self.file_storage
    }

    #[must_use]
    pub fn object_infos(&self) -> &ObjectInfoManager {
        &self.objects
    }

    #[must_use]
    pub fn relationship_infos(&self) -> &RelationshipInfoManager {
        &self.relationships
    }

    #[must_use]
    pub fn file_infos(&self) -> &FileInfoManager {
        &self.files
    }

    // ── Read surface ─────────────────────────────────────────────

    /// Data record key of a remote identity; `None` when not cached (a
    /// tombstone does not resolve).
    pub fn find_instance(&self, object_id: &ObjectId) -> CacheResult<Option<InstanceKey>> {
        self.objects.find_instance(object_id)
    }

    /// Metadata of a remote identity; sentinel when unknown.
    pub fn object_info(&self, object_id: &ObjectId) -> CacheResult<ObjectInfo> {
        self.objects.read_by_object_id(object_id)
    }

    /// Metadata addressed by data key; sentinel when unknown.
    pub fn object_info_by_key(&self, key: InstanceKey) -> CacheResult<ObjectInfo> {
        self.objects.read_by_instance(key)
    }

    /// Property bag of a cached instance.
    pub fn read_instance(&self, key: InstanceKey) -> CacheResult<Option<Value>> {
        Ok(self.store.read_instance(key)?)
    }

    pub fn count_instances(&self, class: ClassId) -> CacheResult<u64> {
        Ok(self.store.count_instances(class)?)
    }

    // ── Ingestion conveniences ───────────────────────────────────

    /// Caches a single remote instance (full completeness).
    pub fn cache_object(
        &self,
        object_id: &ObjectId,
        properties: Value,
        cache_tag: Option<&str>,
    ) -> CacheResult<CachedInstanceKey> {
        let mut fetched = FetchedInstance::new(object_id.clone(), properties);
        fetched.cache_tag = cache_tag.map(str::to_owned);
        let mut out = CachedInstances::default();
        self.instance_cache
            .cache_instances(&[fetched], &mut out, None, None, None)?;
        out.get(object_id)
            .ok_or_else(|| crate::error::CacheError::InvalidState("instance was not cached".into()))
    }

    /// Caches a single remote instance and links it under a root.
    pub fn cache_object_and_link_to_root(
        &self,
        root: &str,
        object_id: &ObjectId,
        properties: Value,
        cache_tag: Option<&str>,
        holding: bool,
    ) -> CacheResult<CachedInstanceKey> {
        let key = self.cache_object(object_id, properties, cache_tag)?;
        self.roots
            .link_existing_instance_to_root(root, key.instance, holding)?;
        Ok(key)
    }

    /// Ingests a server-delivered file for an owner instance (no pending
    /// change; this is cached data, not a local edit).
    pub fn cache_file(
        &self,
        owner: InstanceKey,
        source: &std::path::Path,
        cache_tag: Option<&str>,
        location: FileLocation,
        copy: bool,
    ) -> CacheResult<()> {
        if !self.store.instance_exists(owner)? {
            return crate::error::invalid_state(format!(
                "cannot cache file for {owner}: not in cache"
            ));
        }
        let mut info = self.files.read_by_owner(owner)?;
        self.file_storage
            .cache_file(&mut info, source, cache_tag, location, copy)?;
        self.files.save(&mut info)?;
        Ok(())
    }

    /// Path of the owner's cached file; `None` when no file is recorded
    /// or the file no longer exists on disk.
    pub fn read_file_path(&self, owner: InstanceKey) -> CacheResult<Option<PathBuf>> {
        let info = self.files.read_by_owner(owner)?;
        Ok(self
            .file_storage
            .file_path(&info)
            .filter(|path| path.is_file()))
    }

    /// Validity tag of the owner's cached file; `None` once the file is
    /// gone from disk.
    pub fn read_file_cache_tag(&self, owner: InstanceKey) -> CacheResult<Option<String>> {
        let info = self.files.read_by_owner(owner)?;
        match self.file_storage.file_path(&info) {
            Some(path) if path.is_file() => Ok(info.cache_tag),
            _ => Ok(None),
        }
    }

    /// Storage class of the owner's cached file; Temporary when none is
    /// recorded.
    pub fn file_cache_location(&self, owner: InstanceKey) -> CacheResult<FileLocation> {
        let info = self.files.read_by_owner(owner)?;
        Ok(info.location.unwrap_or(FileLocation::Temporary))
    }

    /// Attaches free-form metadata to an owner's file record (download
    /// provider state, checksums, whatever the application needs).
    pub fn set_file_external_metadata(
        &self,
        owner: InstanceKey,
        metadata: Option<Value>,
    ) -> CacheResult<()> {
        let mut info = self.files.read_by_owner(owner)?;
        if !info.is_in_cache() {
            return crate::error::invalid_state(format!("{owner} has no file record"));
        }
        info.external_metadata = metadata;
        self.files.save(&mut info)?;
        Ok(())
    }
}
