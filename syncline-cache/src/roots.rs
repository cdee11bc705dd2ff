//! Named root anchors.
//!
//! A root is a named anchor node classifying everything reachable from it
//! (via Holding/Embedding edges) as worth keeping. Default roots are
//! durable; Temporary roots are scratch space that can be torn down in
//! bulk. Root links are ordinary store relationships from the anchor
//! instance, so liveness queries need no special casing.

use crate::error::{invalid_state, CacheResult};
use crate::hierarchy::HierarchyManager;
use crate::internal::{persistence_from_i64, persistence_to_i64, CacheSchema};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use syncline_store::ObjectStore;
use syncline_types::{ClassId, InstanceId, InstanceKey, RelDirection, RootPersistence};
use tracing::debug;

/// Manager of the `roots` relation and root link edges.
#[derive(Clone)]
pub struct RootManager {
    store: Arc<ObjectStore>,
    conn: Arc<Mutex<Connection>>,
    schema: CacheSchema,
    hierarchy: HierarchyManager,
}

impl RootManager {
    pub(crate) fn new(
        store: Arc<ObjectStore>,
        conn: Arc<Mutex<Connection>>,
        schema: CacheSchema,
        hierarchy: HierarchyManager,
    ) -> Self {
        Self {
            store,
            conn,
            schema,
            hierarchy,
        }
    }

    /// Anchor key of a root, if it exists.
    pub fn root_key(&self, name: &str) -> CacheResult<Option<InstanceKey>> {
        let conn = self.conn.lock().unwrap();
        let key = conn
            .query_row(
                "SELECT class_id, instance_id FROM roots WHERE name = ?1",
                params![name],
                |row| {
                    Ok(InstanceKey::new(
                        ClassId::from_raw(row.get(0)?),
                        InstanceId::from_raw(row.get(1)?),
                    ))
                },
            )
            .optional()?;
        Ok(key)
    }

    pub fn root_exists(&self, name: &str) -> CacheResult<bool> {
        Ok(self.root_key(name)?.is_some())
    }

    /// Finds the root's anchor, creating it (with Default persistence) if
    /// absent.
    pub fn find_or_create_root(&self, name: &str) -> CacheResult<InstanceKey> {
        if let Some(key) = self.root_key(name)? {
            return Ok(key);
        }
        let anchor = self.store.insert_instance(
            self.schema.root_class,
            &serde_json::json!({ "Name": name }),
        )?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO roots (name, class_id, instance_id, persistence) VALUES (?1, ?2, ?3, ?4)",
            params![
                name,
                anchor.class.as_raw(),
                anchor.id.as_raw(),
                persistence_to_i64(RootPersistence::Default)
            ],
        )?;
        debug!(root = name, "created root anchor");
        Ok(anchor)
    }

    /// Declares (or re-declares) a root with an explicit persistence class.
    pub fn setup_root(&self, name: &str, persistence: RootPersistence) -> CacheResult<InstanceKey> {
        let key = self.find_or_create_root(name)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE roots SET persistence = ?1 WHERE name = ?2",
            params![persistence_to_i64(persistence), name],
        )?;
        Ok(key)
    }

    pub fn root_persistence(&self, name: &str) -> CacheResult<Option<RootPersistence>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT persistence FROM roots WHERE name = ?1",
                params![name],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(value.map(persistence_from_i64))
    }

    /// Links an instance under a root; `holding` picks a Holding edge,
    /// otherwise a Weak lookup-only edge.
    pub fn link_existing_instance_to_root(
        &self,
        name: &str,
        instance: InstanceKey,
        holding: bool,
    ) -> CacheResult<()> {
        let anchor = self.find_or_create_root(name)?;
        let rel_class = if holding {
            self.schema.root_holds
        } else {
            self.schema.root_refers
        };
        self.hierarchy.relate_if_absent(anchor, instance, rel_class)?;
        Ok(())
    }

    /// Removes the root's links to an instance, then cleans the instance
    /// up if nothing else holds it. Unknown roots and unlinked instances
    /// succeed silently.
    pub fn unlink_instance_from_root(&self, name: &str, instance: InstanceKey) -> CacheResult<()> {
        let Some(anchor) = self.root_key(name)? else {
            return Ok(());
        };
        for rel_class in [self.schema.root_holds, self.schema.root_refers] {
            if let Some(row) = self.store.find_relationship(rel_class, anchor, instance)? {
                self.hierarchy.unrelate(row)?;
            }
        }
        self.hierarchy.check_and_cleanup_hierarchy(instance)?;
        Ok(())
    }

    /// True if the root links the instance (holding or weak).
    pub fn is_instance_in_root(&self, name: &str, instance: InstanceKey) -> CacheResult<bool> {
        let Some(anchor) = self.root_key(name)? else {
            return Ok(false);
        };
        for rel_class in [self.schema.root_holds, self.schema.root_refers] {
            if self
                .store
                .find_relationship(rel_class, anchor, instance)?
                .is_some()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Instances directly linked to the root.
    pub fn instances_linked_to_root(&self, name: &str) -> CacheResult<Vec<InstanceKey>> {
        let Some(anchor) = self.root_key(name)? else {
            return Ok(Vec::new());
        };
        let mut keys = Vec::new();
        for rel_class in [self.schema.root_holds, self.schema.root_refers] {
            for row in self
                .store
                .relationships_of_class(anchor, rel_class, RelDirection::Forward)?
            {
                keys.push(row.target);
            }
        }
        Ok(keys)
    }

    /// Re-parents all root links from `from` onto `to`.
    ///
    /// Used when an object's identity is replaced at commit time: the new
    /// instance takes over every root membership before the stale one is
    /// deleted.
    pub fn copy_root_relationships(&self, from: InstanceKey, to: InstanceKey) -> CacheResult<()> {
        for row in self.store.relationships_of(from, Some(RelDirection::Backward))? {
            if row.key.class == self.schema.root_holds || row.key.class == self.schema.root_refers {
                self.hierarchy.relate_if_absent(row.source, to, row.key.class)?;
            }
        }
        Ok(())
    }

    /// Bounded-depth reachability: instances connected to the named roots
    /// through Holding/Embedding edges, up to `depth` steps past the root
    /// links.
    pub fn get_instances_connected_to_roots(
        &self,
        names: &[&str],
        depth: usize,
    ) -> CacheResult<Vec<InstanceKey>> {
        let mut seen = BTreeSet::new();
        let mut frontier = Vec::new();
        for name in names {
            for key in self.instances_linked_to_root(name)? {
                if seen.insert(key) {
                    frontier.push(key);
                }
            }
        }
        let mut remaining = depth;
        while remaining > 0 && !frontier.is_empty() {
            let mut next = Vec::new();
            for key in frontier {
                for row in self.store.relationships_of(key, Some(RelDirection::Forward))? {
                    if self.store.relationship_strength(row.key.class)?.holds()
                        && seen.insert(row.target)
                    {
                        next.push(row.target);
                    }
                }
            }
            frontier = next;
            remaining -= 1;
        }
        Ok(seen.into_iter().collect())
    }

    /// Tears a root down: anchor and links removed, former children
    /// cleaned up unless something else still holds them.
    pub fn remove_root(&self, name: &str) -> CacheResult<()> {
        let Some(anchor) = self.root_key(name)? else {
            return Ok(());
        };
        {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM roots WHERE name = ?1", params![name])?;
        }
        self.hierarchy.delete_instance(anchor)?;
        debug!(root = name, "removed root");
        Ok(())
    }

    /// Removes every root whose name starts with `prefix`.
    pub fn remove_roots_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        let names: Vec<String> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt =
                conn.prepare("SELECT name FROM roots WHERE name LIKE ?1 || '%' ORDER BY name")?;
            let names = stmt
                .query_map(params![prefix], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            names
        };
        for name in names {
            self.remove_root(&name)?;
        }
        Ok(())
    }

    /// Renames a root. Renaming onto an existing name is refused; renaming
    /// a missing root creates the target.
    pub fn rename_root(&self, old: &str, new: &str) -> CacheResult<()> {
        if self.root_exists(new)? {
            return invalid_state(format!("root {new} already exists"));
        }
        if self.root_key(old)?.is_none() {
            self.find_or_create_root(new)?;
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE roots SET name = ?1 WHERE name = ?2",
            params![new, old],
        )?;
        Ok(())
    }

    /// Names of all Temporary roots.
    pub fn temporary_roots(&self) -> CacheResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name FROM roots WHERE persistence = ?1 ORDER BY name")?;
        let names = stmt
            .query_map(
                params![persistence_to_i64(RootPersistence::Temporary)],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}
