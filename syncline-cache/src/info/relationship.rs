//! Relationship info rows.

use super::RelationshipInfo;
use crate::error::CacheResult;
use crate::internal::{status_from_i64, status_to_i64};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};
use syncline_types::{
    ChangeInfo, ChangeStatus, ClassId, InfoKey, InstanceId, InstanceKey, ObjectId, SyncStatus,
};

/// Manager of the `relationship_info` relation.
#[derive(Clone)]
pub struct RelationshipInfoManager {
    conn: Arc<Mutex<Connection>>,
}

const COLUMNS: &str = "id, class_id, remote_id, instance_id, change_status, sync_status, \
                       change_number, revision, source_class, source_id, target_class, target_id";

fn row_to_info(row: &Row<'_>) -> rusqlite::Result<RelationshipInfo> {
    let class = ClassId::from_raw(row.get(1)?);
    Ok(RelationshipInfo {
        key: Some(InfoKey::from_raw(row.get(0)?)),
        object_id: ObjectId::new(class, row.get::<_, String>(2)?),
        instance: Some(InstanceKey::new(class, InstanceId::from_raw(row.get(3)?))),
        change: ChangeInfo {
            status: status_from_i64(row.get(4)?),
            sync_status: SyncStatus::from_raw(row.get::<_, i64>(5)? as u32),
            change_number: row.get::<_, i64>(6)? as u64,
            revision: row.get::<_, i64>(7)? as u64,
        },
        source: Some(InstanceKey::new(
            ClassId::from_raw(row.get(8)?),
            InstanceId::from_raw(row.get(9)?),
        )),
        target: Some(InstanceKey::new(
            ClassId::from_raw(row.get(10)?),
            InstanceId::from_raw(row.get(11)?),
        )),
    })
}

impl RelationshipInfoManager {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn read_by_object_id(&self, object_id: &ObjectId) -> CacheResult<RelationshipInfo> {
        let conn = self.conn.lock().unwrap();
        let info = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM relationship_info WHERE class_id = ?1 AND remote_id = ?2"
                ),
                params![object_id.class.as_raw(), object_id.remote_id],
                row_to_info,
            )
            .optional()?;
        Ok(info.unwrap_or_else(|| RelationshipInfo::not_cached(object_id.clone())))
    }

    pub fn read_by_instance(&self, instance: InstanceKey) -> CacheResult<RelationshipInfo> {
        let conn = self.conn.lock().unwrap();
        let info = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM relationship_info WHERE class_id = ?1 AND instance_id = ?2"
                ),
                params![instance.class.as_raw(), instance.id.as_raw()],
                row_to_info,
            )
            .optional()?;
        Ok(info.unwrap_or_else(|| {
            let mut sentinel = RelationshipInfo::not_cached(ObjectId::new(instance.class, ""));
            sentinel.instance = Some(instance);
            sentinel
        }))
    }

    pub fn save(&self, info: &mut RelationshipInfo) -> CacheResult<InfoKey> {
        let (Some(instance), Some(source), Some(target)) = (info.instance, info.source, info.target)
        else {
            return crate::error::invalid_state("relationship info must address a data record");
        };
        let conn = self.conn.lock().unwrap();
        match info.key {
            Some(key) => {
                conn.execute(
                    "UPDATE relationship_info SET class_id = ?1, remote_id = ?2, instance_id = ?3,
                         change_status = ?4, sync_status = ?5, change_number = ?6, revision = ?7,
                         source_class = ?8, source_id = ?9, target_class = ?10, target_id = ?11
                     WHERE id = ?12",
                    params![
                        info.object_id.class.as_raw(),
                        info.object_id.remote_id,
                        instance.id.as_raw(),
                        status_to_i64(info.change.status),
                        info.change.sync_status.as_raw() as i64,
                        info.change.change_number as i64,
                        info.change.revision as i64,
                        source.class.as_raw(),
                        source.id.as_raw(),
                        target.class.as_raw(),
                        target.id.as_raw(),
                        key.as_raw()
                    ],
                )?;
                Ok(key)
            }
            None => {
                conn.execute(
                    "INSERT INTO relationship_info (class_id, remote_id, instance_id,
                         change_status, sync_status, change_number, revision,
                         source_class, source_id, target_class, target_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        info.object_id.class.as_raw(),
                        info.object_id.remote_id,
                        instance.id.as_raw(),
                        status_to_i64(info.change.status),
                        info.change.sync_status.as_raw() as i64,
                        info.change.change_number as i64,
                        info.change.revision as i64,
                        source.class.as_raw(),
                        source.id.as_raw(),
                        target.class.as_raw(),
                        target.id.as_raw(),
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
        conn.execute(
            "DELETE FROM relationship_info WHERE id = ?1",
            params![key.as_raw()],
        )?;
        Ok(())
    }

    /// Deletes the info addressing a relationship record, if any.
    pub fn delete_by_instance(&self, instance: InstanceKey) -> CacheResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM relationship_info WHERE class_id = ?1 AND instance_id = ?2",
            params![instance.class.as_raw(), instance.id.as_raw()],
        )?;
        Ok(())
    }

    /// All records with a pending change, ordered by change number.
    pub fn changed(&self) -> CacheResult<Vec<RelationshipInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM relationship_info WHERE change_status != ?1 ORDER BY change_number"
        ))?;
        let infos = stmt
            .query_map(params![status_to_i64(ChangeStatus::NoChange)], row_to_info)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(infos)
    }

    /// Pending relationships touching `instance` as either endpoint.
    pub fn changed_touching(&self, instance: InstanceKey) -> CacheResult<Vec<RelationshipInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM relationship_info
             WHERE change_status != ?1
               AND ((source_class = ?2 AND source_id = ?3)
                 OR (target_class = ?2 AND target_id = ?3))
             ORDER BY change_number"
        ))?;
        let infos = stmt
            .query_map(
                params![
                    status_to_i64(ChangeStatus::NoChange),
                    instance.class.as_raw(),
                    instance.id.as_raw()
                ],
                row_to_info,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(infos)
    }
}
