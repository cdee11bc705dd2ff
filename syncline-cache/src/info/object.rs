//! Object info rows.

use super::ObjectInfo;
use crate::error::CacheResult;
use crate::internal::{
    completeness_from_i64, completeness_to_i64, date_from_text, date_to_text, status_from_i64,
    status_to_i64,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};
use syncline_store::ObjectStore;
use syncline_types::{
    ChangeInfo, ChangeStatus, ClassId, InfoKey, InstanceId, InstanceKey, ObjectId, SyncStatus,
};

/// Manager of the `object_info` relation.
#[derive(Clone)]
pub struct ObjectInfoManager {
    store: Arc<ObjectStore>,
    conn: Arc<Mutex<Connection>>,
}

const COLUMNS: &str = "id, class_id, remote_id, instance_id, change_status, sync_status, \
                       change_number, revision, cache_tag, cached_at, completeness";

fn row_to_info(row: &Row<'_>) -> rusqlite::Result<ObjectInfo> {
    let class = ClassId::from_raw(row.get(1)?);
    let cached_at: Option<String> = row.get(9)?;
    Ok(ObjectInfo {
        key: Some(InfoKey::from_raw(row.get(0)?)),
        object_id: ObjectId::new(class, row.get::<_, String>(2)?),
        instance: Some(InstanceKey::new(class, InstanceId::from_raw(row.get(3)?))),
        change: ChangeInfo {
            status: status_from_i64(row.get(4)?),
            sync_status: SyncStatus::from_raw(row.get::<_, i64>(5)? as u32),
            change_number: row.get::<_, i64>(6)? as u64,
            revision: row.get::<_, i64>(7)? as u64,
        },
        cache_tag: row.get(8)?,
        cached_at: cached_at.as_deref().and_then(date_from_text),
        completeness: row.get::<_, Option<i64>>(10)?.map(completeness_from_i64),
    })
}

impl ObjectInfoManager {
    pub(crate) fn new(store: Arc<ObjectStore>, conn: Arc<Mutex<Connection>>) -> Self {
        Self { store, conn }
    }

    /// Reads the info for a remote identity; sentinel if unknown.
    pub fn read_by_object_id(&self, object_id: &ObjectId) -> CacheResult<ObjectInfo> {
        let conn = self.conn.lock().unwrap();
        let info = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM object_info WHERE class_id = ?1 AND remote_id = ?2"),
                params![object_id.class.as_raw(), object_id.remote_id],
                row_to_info,
            )
            .optional()?;
        Ok(info.unwrap_or_else(|| ObjectInfo::not_cached(object_id.clone())))
    }

    /// Reads the info addressing a data record; sentinel if unknown.
    pub fn read_by_instance(&self, instance: InstanceKey) -> CacheResult<ObjectInfo> {
        let conn = self.conn.lock().unwrap();
        let info = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM object_info WHERE class_id = ?1 AND instance_id = ?2"
                ),
                params![instance.class.as_raw(), instance.id.as_raw()],
                row_to_info,
            )
            .optional()?;
        Ok(info.unwrap_or_else(|| {
            let mut sentinel = ObjectInfo::not_cached(ObjectId::new(instance.class, ""));
            sentinel.instance = Some(instance);
            sentinel
        }))
    }

    pub fn read_by_key(&self, key: InfoKey) -> CacheResult<Option<ObjectInfo>> {
        let conn = self.conn.lock().unwrap();
        let info = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM object_info WHERE id = ?1"),
                params![key.as_raw()],
                row_to_info,
            )
            .optional()?;
        Ok(info)
    }

    /// Inserts or updates, setting `info.key` on insert.
    pub fn save(&self, info: &mut ObjectInfo) -> CacheResult<InfoKey> {
        let Some(instance) = info.instance else {
            return crate::error::invalid_state("object info must address a data record");
        };
        let conn = self.conn.lock().unwrap();
        match info.key {
            Some(key) => {
                conn.execute(
                    "UPDATE object_info SET class_id = ?1, remote_id = ?2, instance_id = ?3,
                         change_status = ?4, sync_status = ?5, change_number = ?6, revision = ?7,
                         cache_tag = ?8, cached_at = ?9, completeness = ?10
                     WHERE id = ?11",
                    params![
                        info.object_id.class.as_raw(),
                        info.object_id.remote_id,
                        instance.id.as_raw(),
                        status_to_i64(info.change.status),
                        info.change.sync_status.as_raw() as i64,
                        info.change.change_number as i64,
                        info.change.revision as i64,
                        info.cache_tag,
                        info.cached_at.map(date_to_text),
                        info.completeness.map(completeness_to_i64),
                        key.as_raw()
                    ],
                )?;
                Ok(key)
            }
            None => {
                conn.execute(
                    "INSERT INTO object_info (class_id, remote_id, instance_id, change_status,
                         sync_status, change_number, revision, cache_tag, cached_at, completeness)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        info.object_id.class.as_raw(),
                        info.object_id.remote_id,
                        instance.id.as_raw(),
                        status_to_i64(info.change.status),
                        info.change.sync_status.as_raw() as i64,
                        info.change.change_number as i64,
                        info.change.revision as i64,
                        info.cache_tag,
                        info.cached_at.map(date_to_text),
                        info.completeness.map(completeness_to_i64),
                    ],
                )?;
                let key = InfoKey::from_raw(conn.last_insert_rowid());
                info.key = Some(key);
                Ok(key)
            }
        }
    }

    pub fn delete(&self, key: InfoKey) -> CacheResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM object_info WHERE id = ?1", params![key.as_raw()])?;
        Ok(())
    }

    /// Data record key for a remote identity, when the data row still
    /// exists (tombstones do not resolve).
    pub fn find_instance(&self, object_id: &ObjectId) -> CacheResult<Option<InstanceKey>> {
        let info = self.read_by_object_id(object_id)?;
        match info.instance {
            Some(instance) if self.store.instance_exists(instance)? => Ok(Some(instance)),
            _ => Ok(None),
        }
    }

    /// All records with a pending change, ordered by change number.
    pub fn changed(&self) -> CacheResult<Vec<ObjectInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM object_info WHERE change_status != ?1 ORDER BY change_number"
        ))?;
        let infos = stmt
            .query_map(params![status_to_i64(ChangeStatus::NoChange)], row_to_info)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(infos)
    }
}
