//! File info rows.

use super::FileInfo;
use crate::error::CacheResult;
use crate::internal::{
    date_from_text, date_to_text, location_from_i64, location_to_i64, status_from_i64,
    status_to_i64,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};
use syncline_types::{
    ChangeInfo, ChangeStatus, ClassId, FileLocation, InfoKey, InstanceId, InstanceKey, SyncStatus,
};

/// Manager of the `file_info` relation.
#[derive(Clone)]
pub struct FileInfoManager {
    conn: Arc<Mutex<Connection>>,
}

const COLUMNS: &str = "id, owner_class, owner_id, change_status, sync_status, change_number, \
                       revision, location, relative_dir, file_name, cache_tag, cache_date, \
                       updated_at, external_meta";

fn row_to_info(row: &Row<'_>) -> rusqlite::Result<FileInfo> {
    let cache_date: Option<String> = row.get(11)?;
    let updated_at: Option<String> = row.get(12)?;
    let external: Option<String> = row.get(13)?;
    let location: Option<i64> = row.get(7)?;
    Ok(FileInfo {
        key: Some(InfoKey::from_raw(row.get(0)?)),
        owner: InstanceKey::new(
            ClassId::from_raw(row.get(1)?),
            InstanceId::from_raw(row.get(2)?),
        ),
        change: ChangeInfo {
            status: status_from_i64(row.get(3)?),
            sync_status: SyncStatus::from_raw(row.get::<_, i64>(4)? as u32),
            change_number: row.get::<_, i64>(5)? as u64,
            revision: row.get::<_, i64>(6)? as u64,
        },
        location: location.map(location_from_i64).filter(|l| *l != FileLocation::Auto),
        relative_dir: row.get(8)?,
        file_name: row.get(9)?,
        cache_tag: row.get(10)?,
        cache_date: cache_date.as_deref().and_then(date_from_text),
        updated_at: updated_at.as_deref().and_then(date_from_text),
        external_metadata: external.as_deref().and_then(|t| serde_json::from_str(t).ok()),
    })
}

impl FileInfoManager {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Reads the file info of an owner instance; sentinel if none.
    pub fn read_by_owner(&self, owner: InstanceKey) -> CacheResult<FileInfo> {
        let conn = self.conn.lock().unwrap();
        let info = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM file_info WHERE owner_class = ?1 AND owner_id = ?2"
                ),
                params![owner.class.as_raw(), owner.id.as_raw()],
                row_to_info,
            )
            .optional()?;
        Ok(info.unwrap_or_else(|| FileInfo::not_cached(owner)))
    }

    pub fn save(&self, info: &mut FileInfo) -> CacheResult<InfoKey> {
        let external = info
            .external_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.conn.lock().unwrap();
        match info.key {
            Some(key) => {
                conn.execute(
                    "UPDATE file_info SET owner_class = ?1, owner_id = ?2, change_status = ?3,
                         sync_status = ?4, change_number = ?5, revision = ?6, location = ?7,
                         relative_dir = ?8, file_name = ?9, cache_tag = ?10, cache_date = ?11,
                         updated_at = ?12, external_meta = ?13
                     WHERE id = ?14",
                    params![
                        info.owner.class.as_raw(),
                        info.owner.id.as_raw(),
                        status_to_i64(info.change.status),
                        info.change.sync_status.as_raw() as i64,
                        info.change.change_number as i64,
                        info.change.revision as i64,
                        info.location.map(location_to_i64),
                        info.relative_dir,
                        info.file_name,
                        info.cache_tag,
                        info.cache_date.map(date_to_text),
                        info.updated_at.map(date_to_text),
                        external,
                        key.as_raw()
                    ],
                )?;
                Ok(key)
            }
            None => {
                conn.execute(
                    "INSERT INTO file_info (owner_class, owner_id, change_status, sync_status,
                         change_number, revision, location, relative_dir, file_name, cache_tag,
                         cache_date, updated_at, external_meta)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        info.owner.class.as_raw(),
                        info.owner.id.as_raw(),
                        status_to_i64(info.change.status),
                        info.change.sync_status.as_raw() as i64,
                        info.change.change_number as i64,
                        info.change.revision as i64,
                        info.location.map(location_to_i64),
                        info.relative_dir,
                        info.file_name,
                        info.cache_tag,
                        info.cache_date.map(date_to_text),
                        info.updated_at.map(date_to_text),
                        external,
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
        conn.execute("DELETE FROM file_info WHERE id = ?1", params![key.as_raw()])?;
        Ok(())
    }

    /// All records with a pending change, ordered by change number.
    pub fn changed(&self) -> CacheResult<Vec<FileInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM file_info WHERE change_status != ?1 ORDER BY change_number"
        ))?;
        let infos = stmt
            .query_map(params![status_to_i64(ChangeStatus::NoChange)], row_to_info)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(infos)
    }
}
