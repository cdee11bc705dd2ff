//! The object store adapter proper.
//!
//! One SQLite connection, shared behind a mutex; the cache core layers its
//! metadata relations on the same connection so everything lives in one
//! database file.

use crate::error::{StoreError, StoreResult};
use crate::schema::{ClassDef, ClassKind, ClassSpec, Registry, RelEndDef, RelationshipSpec};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};
use syncline_types::{ClassId, InstanceId, InstanceKey, RelDirection, RelStrength};
use tracing::debug;

/// A relationship record: its own key plus both endpoint keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipRow {
    pub key: InstanceKey,
    pub source: InstanceKey,
    pub target: InstanceKey,
}

/// SQLite-backed typed object store.
pub struct ObjectStore {
    conn: Arc<Mutex<Connection>>,
    registry: RwLock<Registry>,
}

impl ObjectStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: &std::path::Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    /// Wraps an existing connection, creating the store relations if absent.
    pub fn open_with_conn(conn: Arc<Mutex<Connection>>) -> StoreResult<Self> {
        let store = Self {
            conn,
            registry: RwLock::new(Registry::default()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Shared handle to the underlying connection.
    ///
    /// The cache core uses this to create and query its metadata relations
    /// on the same database.
    #[must_use]
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS classes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                schema_name TEXT NOT NULL,
                class_name TEXT NOT NULL,
                UNIQUE(schema_name, class_name)
            );

            CREATE TABLE IF NOT EXISTS instances (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                class_id INTEGER NOT NULL,
                props TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_instances_class ON instances(class_id);

            CREATE TABLE IF NOT EXISTS relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                class_id INTEGER NOT NULL,
                source_class INTEGER NOT NULL,
                source_id INTEGER NOT NULL,
                target_class INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                props TEXT NOT NULL,
                UNIQUE(class_id, source_class, source_id, target_class, target_id)
            );
            CREATE INDEX IF NOT EXISTS idx_rel_source ON relationships(source_class, source_id);
            CREATE INDEX IF NOT EXISTS idx_rel_target ON relationships(target_class, target_id);

            CREATE TABLE IF NOT EXISTS sequences (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Class registration and resolution ────────────────────────

    fn persist_class_id(&self, schema: &str, name: &str) -> StoreResult<ClassId> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO classes (schema_name, class_name) VALUES (?1, ?2)",
            params![schema, name],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM classes WHERE schema_name = ?1 AND class_name = ?2",
            params![schema, name],
            |row| row.get(0),
        )?;
        Ok(ClassId::from_raw(id))
    }

    /// Registers an object class, returning its stable id.
    pub fn register_class(&self, spec: ClassSpec) -> StoreResult<ClassId> {
        let id = self.persist_class_id(&spec.schema, &spec.name)?;
        let def = ClassDef {
            id,
            schema: spec.schema,
            name: spec.name,
            base: spec.base,
            properties: spec.properties,
            kind: ClassKind::Object,
        };
        debug!(class = %def.full_name(), %id, "registered object class");
        self.registry.write().unwrap().insert(def);
        Ok(id)
    }

    /// Registers a relationship class, returning its stable id.
    pub fn register_relationship_class(&self, spec: RelationshipSpec) -> StoreResult<ClassId> {
        let id = self.persist_class_id(&spec.schema, &spec.name)?;
        let def = ClassDef {
            id,
            schema: spec.schema,
            name: spec.name,
            base: spec.base,
            properties: spec.properties,
            kind: ClassKind::Relationship {
                strength: spec.strength,
                source: spec.source,
                target: spec.target,
            },
        };
        debug!(class = %def.full_name(), %id, "registered relationship class");
        self.registry.write().unwrap().insert(def);
        Ok(id)
    }

    /// Resolves a class by id.
    pub fn class(&self, id: ClassId) -> StoreResult<ClassDef> {
        self.registry
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownClass(id.to_string()))
    }

    /// Resolves a class by `"Schema.Class"` name.
    pub fn find_class(&self, full_name: &str) -> Option<ClassDef> {
        self.registry.read().unwrap().find(full_name).cloned()
    }

    /// True if `class` equals `ancestor` or derives from it.
    #[must_use]
    pub fn is_or_derives_from(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.registry
            .read()
            .unwrap()
            .is_or_derives_from(class, ancestor)
    }

    /// Lifetime strength of a relationship class.
    pub fn relationship_strength(&self, class: ClassId) -> StoreResult<RelStrength> {
        match self.class(class)?.kind {
            ClassKind::Relationship { strength, .. } => Ok(strength),
            ClassKind::Object => Err(StoreError::SchemaViolation(format!(
                "class {class} is not a relationship class"
            ))),
        }
    }

    // ── Instance CRUD ────────────────────────────────────────────

    /// Inserts a typed instance, returning its key.
    pub fn insert_instance(&self, class: ClassId, props: &Value) -> StoreResult<InstanceKey> {
        let def = self.class(class)?;
        if def.is_relationship() {
            return Err(StoreError::SchemaViolation(format!(
                "{} is a relationship class; use insert_relationship",
                def.full_name()
            )));
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO instances (class_id, props) VALUES (?1, ?2)",
            params![class.as_raw(), serde_json::to_string(props)?],
        )?;
        let id = conn.last_insert_rowid();
        Ok(InstanceKey::new(class, InstanceId::from_raw(id)))
    }

    /// Replaces the property bag of an existing instance.
    pub fn update_instance(&self, key: InstanceKey, props: &Value) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE instances SET props = ?1 WHERE id = ?2 AND class_id = ?3",
            params![
                serde_json::to_string(props)?,
                key.id.as_raw(),
                key.class.as_raw()
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(())
    }

    /// Reads an instance's property bag; `None` if the row does not exist.
    pub fn read_instance(&self, key: InstanceKey) -> StoreResult<Option<Value>> {
        let conn = self.conn.lock().unwrap();
        let props: Option<String> = conn
            .query_row(
                "SELECT props FROM instances WHERE id = ?1 AND class_id = ?2",
                params![key.id.as_raw(), key.class.as_raw()],
                |row| row.get(0),
            )
            .optional()?;
        match props {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// True if the data row exists.
    pub fn instance_exists(&self, key: InstanceKey) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM instances WHERE id = ?1 AND class_id = ?2",
                params![key.id.as_raw(), key.class.as_raw()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Deletes an instance row together with every relationship row that
    /// touches it, returning the removed relationships.
    ///
    /// The returned rows let the caller remove dependent metadata and
    /// cascade-check the former neighbors, the explicit two-phase
    /// replacement for a before-delete listener chain.
    pub fn delete_instance(&self, key: InstanceKey) -> StoreResult<Vec<RelationshipRow>> {
        let touching = self.relationships_of(key, None)?;
        let conn = self.conn.lock().unwrap();
        for rel in &touching {
            conn.execute(
                "DELETE FROM relationships WHERE id = ?1",
                params![rel.key.id.as_raw()],
            )?;
        }
        let deleted = conn.execute(
            "DELETE FROM instances WHERE id = ?1 AND class_id = ?2",
            params![key.id.as_raw(), key.class.as_raw()],
        )?;
        if deleted == 0 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        debug!(%key, edges = touching.len(), "deleted instance");
        Ok(touching)
    }

    /// Instance keys of every row of the exact class.
    pub fn instances_of(&self, class: ClassId) -> StoreResult<Vec<InstanceKey>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM instances WHERE class_id = ?1 ORDER BY id")?;
        let keys = stmt
            .query_map(params![class.as_raw()], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys
            .into_iter()
            .map(|id| InstanceKey::new(class, InstanceId::from_raw(id)))
            .collect())
    }

    /// Number of rows of the exact class.
    pub fn count_instances(&self, class: ClassId) -> StoreResult<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM instances WHERE class_id = ?1",
            params![class.as_raw()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ── Relationship CRUD ────────────────────────────────────────

    fn check_end(&self, end: &RelEndDef, actual: InstanceKey, which: &str) -> StoreResult<()> {
        if let Some(required) = end.class {
            if !self.is_or_derives_from(actual.class, required) {
                return Err(StoreError::SchemaViolation(format!(
                    "{which} end {actual} is not a {required}"
                )));
            }
        }
        Ok(())
    }

    /// Inserts a relationship instance between two existing endpoints.
    pub fn insert_relationship(
        &self,
        class: ClassId,
        source: InstanceKey,
        target: InstanceKey,
        props: &Value,
    ) -> StoreResult<InstanceKey> {
        let def = self.class(class)?;
        let ClassKind::Relationship {
            source: source_end,
            target: target_end,
            ..
        } = &def.kind
        else {
            return Err(StoreError::SchemaViolation(format!(
                "{} is not a relationship class",
                def.full_name()
            )));
        };
        self.check_end(source_end, source, "source")?;
        self.check_end(target_end, target, "target")?;
        if !self.instance_exists(source)? {
            return Err(StoreError::SchemaViolation(format!(
                "source {source} does not exist"
            )));
        }
        if !self.instance_exists(target)? {
            return Err(StoreError::SchemaViolation(format!(
                "target {target} does not exist"
            )));
        }

        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO relationships (class_id, source_class, source_id, target_class, target_id, props)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                class.as_raw(),
                source.class.as_raw(),
                source.id.as_raw(),
                target.class.as_raw(),
                target.id.as_raw(),
                serde_json::to_string(props)?
            ],
        );
        match result {
            Ok(_) => Ok(InstanceKey::new(
                class,
                InstanceId::from_raw(conn.last_insert_rowid()),
            )),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Constraint(format!(
                    "relationship {class} {source} -> {target} already exists"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes a relationship row; returns it, or `None` if absent.
    pub fn delete_relationship(&self, key: InstanceKey) -> StoreResult<Option<RelationshipRow>> {
        let row = self.read_relationship(key)?;
        if row.is_some() {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "DELETE FROM relationships WHERE id = ?1 AND class_id = ?2",
                params![key.id.as_raw(), key.class.as_raw()],
            )?;
        }
        Ok(row)
    }

    /// Reads a relationship row by key.
    pub fn read_relationship(&self, key: InstanceKey) -> StoreResult<Option<RelationshipRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT source_class, source_id, target_class, target_id
                 FROM relationships WHERE id = ?1 AND class_id = ?2",
                params![key.id.as_raw(), key.class.as_raw()],
                |row| {
                    Ok(RelationshipRow {
                        key,
                        source: InstanceKey::new(
                            ClassId::from_raw(row.get(0)?),
                            InstanceId::from_raw(row.get(1)?),
                        ),
                        target: InstanceKey::new(
                            ClassId::from_raw(row.get(2)?),
                            InstanceId::from_raw(row.get(3)?),
                        ),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Finds the relationship of `class` between two exact endpoints.
    pub fn find_relationship(
        &self,
        class: ClassId,
        source: InstanceKey,
        target: InstanceKey,
    ) -> StoreResult<Option<RelationshipRow>> {
        let conn = self.conn.lock().unwrap();
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM relationships
                 WHERE class_id = ?1 AND source_class = ?2 AND source_id = ?3
                   AND target_class = ?4 AND target_id = ?5",
                params![
                    class.as_raw(),
                    source.class.as_raw(),
                    source.id.as_raw(),
                    target.class.as_raw(),
                    target.id.as_raw()
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(|id| RelationshipRow {
            key: InstanceKey::new(class, InstanceId::from_raw(id)),
            source,
            target,
        }))
    }

    /// Relationship rows touching `instance`.
    ///
    /// `direction` filters to rows where the instance is the source
    /// (`Forward`) or the target (`Backward`); `None` returns both.
    pub fn relationships_of(
        &self,
        instance: InstanceKey,
        direction: Option<RelDirection>,
    ) -> StoreResult<Vec<RelationshipRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = match direction {
            Some(RelDirection::Forward) => {
                "SELECT id, class_id, source_class, source_id, target_class, target_id
                 FROM relationships WHERE source_class = ?1 AND source_id = ?2"
            }
            Some(RelDirection::Backward) => {
                "SELECT id, class_id, source_class, source_id, target_class, target_id
                 FROM relationships WHERE target_class = ?1 AND target_id = ?2"
            }
            None => {
                "SELECT id, class_id, source_class, source_id, target_class, target_id
                 FROM relationships
                 WHERE (source_class = ?1 AND source_id = ?2)
                    OR (target_class = ?1 AND target_id = ?2)"
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(
                params![instance.class.as_raw(), instance.id.as_raw()],
                |row| {
                    Ok(RelationshipRow {
                        key: InstanceKey::new(
                            ClassId::from_raw(row.get(1)?),
                            InstanceId::from_raw(row.get(0)?),
                        ),
                        source: InstanceKey::new(
                            ClassId::from_raw(row.get(2)?),
                            InstanceId::from_raw(row.get(3)?),
                        ),
                        target: InstanceKey::new(
                            ClassId::from_raw(row.get(4)?),
                            InstanceId::from_raw(row.get(5)?),
                        ),
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rows of one relationship class touching `instance` in `direction`.
    pub fn relationships_of_class(
        &self,
        instance: InstanceKey,
        class: ClassId,
        direction: RelDirection,
    ) -> StoreResult<Vec<RelationshipRow>> {
        Ok(self
            .relationships_of(instance, Some(direction))?
            .into_iter()
            .filter(|row| row.key.class == class)
            .collect())
    }

    // ── Sequences and units of work ──────────────────────────────

    /// Next value of a named persisted sequence (starting at 1).
    pub fn next_sequence(&self, name: &str) -> StoreResult<u64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sequences (name, value) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1",
            params![name],
        )?;
        let value: i64 = conn.query_row(
            "SELECT value FROM sequences WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(value as u64)
    }

    /// Runs `f` inside a savepoint; rolls back if it returns an error.
    pub fn unit_of_work<T>(
        &self,
        f: impl FnOnce() -> StoreResult<T>,
    ) -> StoreResult<T> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute_batch("SAVEPOINT syncline_uow")?;
        }
        match f() {
            Ok(value) => {
                let conn = self.conn.lock().unwrap();
                conn.execute_batch("RELEASE SAVEPOINT syncline_uow")?;
                Ok(value)
            }
            Err(err) => {
                let conn = self.conn.lock().unwrap();
                conn.execute_batch(
                    "ROLLBACK TO SAVEPOINT syncline_uow; RELEASE SAVEPOINT syncline_uow",
                )?;
                Err(err)
            }
        }
    }
}
