//! Internal anchor classes, metadata relations, and row codecs.
//!
//! The cache registers a handful of classes of its own in the object
//! store: root anchors, response anchors and page anchors, plus the
//! relationship classes that connect them to cached instances. Hierarchy
//! edges from these anchors are ordinary store relationships, so liveness
//! queries see them without special cases.

use crate::error::CacheResult;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use syncline_store::{ClassSpec, ObjectStore, RelationshipSpec};
use syncline_types::{ChangeStatus, ClassId, Completeness, FileLocation, RelStrength, RootPersistence};

/// Sequence names on the shared store.
pub(crate) const SEQ_CHANGE: &str = "change";
pub(crate) const SEQ_FILE_DIR: &str = "filedir";

/// Class ids of the cache's internal schema.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CacheSchema {
    pub root_class: ClassId,
    pub root_holds: ClassId,
    pub root_refers: ClassId,
    pub response_class: ClassId,
    pub page_class: ClassId,
    pub response_has_pages: ClassId,
    pub page_has_results: ClassId,
    pub response_has_additional: ClassId,
}

impl CacheSchema {
    pub fn register(store: &ObjectStore) -> CacheResult<Self> {
        let root_class = store.register_class(ClassSpec::new("Syncline", "Root").property("Name"))?;
        let response_class =
            store.register_class(ClassSpec::new("Syncline", "Response").property("Name"))?;
        let page_class = store.register_class(ClassSpec::new("Syncline", "Page"))?;
        let root_holds = store.register_relationship_class(RelationshipSpec::new(
            "Syncline",
            "RootHolds",
            RelStrength::Holding,
        ))?;
        let root_refers = store.register_relationship_class(RelationshipSpec::new(
            "Syncline",
            "RootRefers",
            RelStrength::Weak,
        ))?;
        let response_has_pages = store.register_relationship_class(RelationshipSpec::new(
            "Syncline",
            "ResponseHasPages",
            RelStrength::Embedding,
        ))?;
        let page_has_results = store.register_relationship_class(RelationshipSpec::new(
            "Syncline",
            "PageHasResults",
            RelStrength::Holding,
        ))?;
        let response_has_additional = store.register_relationship_class(RelationshipSpec::new(
            "Syncline",
            "ResponseHasAdditional",
            RelStrength::Holding,
        ))?;
        Ok(Self {
            root_class,
            root_holds,
            root_refers,
            response_class,
            page_class,
            response_has_pages,
            page_has_results,
            response_has_additional,
        })
    }
}

/// Creates the metadata relations on the shared connection.
pub(crate) fn init_meta_schema(conn: &Arc<Mutex<Connection>>) -> CacheResult<()> {
    let conn = conn.lock().unwrap();
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS object_info (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_id INTEGER NOT NULL,
            remote_id TEXT NOT NULL,
            instance_id INTEGER NOT NULL,
            change_status INTEGER NOT NULL,
            sync_status INTEGER NOT NULL,
            change_number INTEGER NOT NULL,
            revision INTEGER NOT NULL,
            cache_tag TEXT,
            cached_at TEXT,
            completeness INTEGER,
            UNIQUE(class_id, remote_id)
        );
        CREATE INDEX IF NOT EXISTS idx_object_info_instance
            ON object_info(class_id, instance_id);

        CREATE TABLE IF NOT EXISTS relationship_info (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_id INTEGER NOT NULL,
            remote_id TEXT NOT NULL,
            instance_id INTEGER NOT NULL,
            change_status INTEGER NOT NULL,
            sync_status INTEGER NOT NULL,
            change_number INTEGER NOT NULL,
            revision INTEGER NOT NULL,
            source_class INTEGER NOT NULL,
            source_id INTEGER NOT NULL,
            target_class INTEGER NOT NULL,
            target_id INTEGER NOT NULL,
            UNIQUE(class_id, remote_id)
        );
        CREATE INDEX IF NOT EXISTS idx_relationship_info_instance
            ON relationship_info(class_id, instance_id);

        CREATE TABLE IF NOT EXISTS file_info (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_class INTEGER NOT NULL,
            owner_id INTEGER NOT NULL,
            change_status INTEGER NOT NULL,
            sync_status INTEGER NOT NULL,
            change_number INTEGER NOT NULL,
            revision INTEGER NOT NULL,
            location INTEGER,
            relative_dir TEXT,
            file_name TEXT,
            cache_tag TEXT,
            cache_date TEXT,
            updated_at TEXT,
            external_meta TEXT,
            UNIQUE(owner_class, owner_id)
        );

        CREATE TABLE IF NOT EXISTS object_backup (
            info_id INTEGER PRIMARY KEY,
            props TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS roots (
            name TEXT PRIMARY KEY,
            class_id INTEGER NOT NULL,
            instance_id INTEGER NOT NULL,
            persistence INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cached_responses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            class_id INTEGER NOT NULL,
            instance_id INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS response_pages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            response_id INTEGER NOT NULL,
            page_index INTEGER NOT NULL,
            cache_tag TEXT,
            cached_at TEXT,
            class_id INTEGER NOT NULL,
            instance_id INTEGER NOT NULL,
            UNIQUE(response_id, page_index)
        );
        CREATE INDEX IF NOT EXISTS idx_response_pages_anchor
            ON response_pages(class_id, instance_id);

        CREATE TABLE IF NOT EXISTS page_rel_results (
            page_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            rel_id INTEGER NOT NULL,
            UNIQUE(page_id, class_id, rel_id)
        );
        ",
    )?;
    Ok(())
}

// ── Row codecs ──────────────────────────────────────────────────

pub(crate) fn status_to_i64(status: ChangeStatus) -> i64 {
    match status {
        ChangeStatus::NoChange => 0,
        ChangeStatus::Created => 1,
        ChangeStatus::Modified => 2,
        ChangeStatus::Deleted => 3,
    }
}

pub(crate) fn status_from_i64(raw: i64) -> ChangeStatus {
    match raw {
        1 => ChangeStatus::Created,
        2 => ChangeStatus::Modified,
        3 => ChangeStatus::Deleted,
        _ => ChangeStatus::NoChange,
    }
}

pub(crate) fn completeness_to_i64(value: Completeness) -> i64 {
    match value {
        Completeness::Full => 0,
        Completeness::Partial => 1,
    }
}

pub(crate) fn completeness_from_i64(raw: i64) -> Completeness {
    if raw == 1 {
        Completeness::Partial
    } else {
        Completeness::Full
    }
}

pub(crate) fn location_to_i64(location: FileLocation) -> i64 {
    match location {
        FileLocation::Auto => 0,
        FileLocation::Persistent => 1,
        FileLocation::Temporary => 2,
        FileLocation::External => 3,
    }
}

pub(crate) fn location_from_i64(raw: i64) -> FileLocation {
    match raw {
        1 => FileLocation::Persistent,
        2 => FileLocation::Temporary,
        3 => FileLocation::External,
        _ => FileLocation::Auto,
    }
}

pub(crate) fn persistence_to_i64(value: RootPersistence) -> i64 {
    match value {
        RootPersistence::Default => 0,
        RootPersistence::Temporary => 1,
    }
}

pub(crate) fn persistence_from_i64(raw: i64) -> RootPersistence {
    if raw == 1 {
        RootPersistence::Temporary
    } else {
        RootPersistence::Default
    }
}

pub(crate) fn date_to_text(date: DateTime<Utc>) -> String {
    date.to_rfc3339()
}

pub(crate) fn date_from_text(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
