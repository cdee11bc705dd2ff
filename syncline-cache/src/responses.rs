//! Paged, tag-validated caching of query results.
//!
//! A cached response is an anchor node with an ordered set of pages. Each
//! page holds its result instances through Holding edges, so results stay
//! alive exactly as long as some page (or another holder) references them.
//! Relationship results are tracked in a membership relation instead;
//! a relationship's lifetime is already bounded by its endpoints, and the
//! store cannot use one as an edge endpoint.

use crate::error::CacheResult;
use crate::hierarchy::HierarchyManager;
use crate::internal::{date_from_text, date_to_text, CacheSchema};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use syncline_store::ObjectStore;
use syncline_types::{ClassId, InstanceId, InstanceKey, RelDirection};
use tracing::debug;

/// Manager of the cached-response relations and membership edges.
#[derive(Clone)]
pub struct CachedResponseManager {
    store: Arc<ObjectStore>,
    conn: Arc<Mutex<Connection>>,
    schema: CacheSchema,
    hierarchy: HierarchyManager,
}

#[derive(Debug, Clone, Copy)]
struct ResponseRow {
    id: i64,
    anchor: InstanceKey,
}

#[derive(Debug, Clone, Copy)]
struct PageRow {
    id: i64,
    anchor: InstanceKey,
}

impl CachedResponseManager {
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

    fn response_row(&self, name: &str) -> CacheResult<Option<ResponseRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, class_id, instance_id FROM cached_responses WHERE name = ?1",
                params![name],
                |row| {
                    Ok(ResponseRow {
                        id: row.get(0)?,
                        anchor: InstanceKey::new(
                            ClassId::from_raw(row.get(1)?),
                            InstanceId::from_raw(row.get(2)?),
                        ),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn find_or_create_response(&self, name: &str) -> CacheResult<ResponseRow> {
        if let Some(row) = self.response_row(name)? {
            return Ok(row);
        }
        let anchor = self.store.insert_instance(
            self.schema.response_class,
            &serde_json::json!({ "Name": name }),
        )?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cached_responses (name, class_id, instance_id) VALUES (?1, ?2, ?3)",
            params![name, anchor.class.as_raw(), anchor.id.as_raw()],
        )?;
        Ok(ResponseRow {
            id: conn.last_insert_rowid(),
            anchor,
        })
    }

    fn page_row(&self, response_id: i64, page_index: u32) -> CacheResult<Option<PageRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, class_id, instance_id FROM response_pages
                 WHERE response_id = ?1 AND page_index = ?2",
                params![response_id, page_index],
                |row| {
                    Ok(PageRow {
                        id: row.get(0)?,
                        anchor: InstanceKey::new(
                            ClassId::from_raw(row.get(1)?),
                            InstanceId::from_raw(row.get(2)?),
                        ),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// True once any page of the response has been saved.
    pub fn is_response_cached(&self, name: &str) -> CacheResult<bool> {
        Ok(self.response_row(name)?.is_some())
    }

    /// Saves one page: its validity tag, date, and result membership.
    ///
    /// Result instances are related to the page with Holding edges (old
    /// membership is replaced); relationship results are recorded in the
    /// membership relation.
    pub fn save_page(
        &self,
        name: &str,
        page_index: u32,
        cache_tag: Option<&str>,
        instances: &[InstanceKey],
        relationships: &[InstanceKey],
    ) -> CacheResult<()> {
        let response = self.find_or_create_response(name)?;
        let page = match self.page_row(response.id, page_index)? {
            Some(page) => page,
            None => {
                let anchor = self
                    .store
                    .insert_instance(self.schema.page_class, &serde_json::json!({}))?;
                self.hierarchy
                    .relate(response.anchor, anchor, self.schema.response_has_pages)?;
                let conn = self.conn.lock().unwrap();
                conn.execute(
                    "INSERT INTO response_pages (response_id, page_index, class_id, instance_id)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        response.id,
                        page_index,
                        anchor.class.as_raw(),
                        anchor.id.as_raw()
                    ],
                )?;
                PageRow {
                    id: conn.last_insert_rowid(),
                    anchor,
                }
            }
        };

        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE response_pages SET cache_tag = ?1, cached_at = ?2 WHERE id = ?3",
                params![cache_tag, date_to_text(Utc::now()), page.id],
            )?;
            conn.execute(
                "DELETE FROM page_rel_results WHERE page_id = ?1",
                params![page.id],
            )?;
        }

        // Replace membership; former members that lost their last holder
        // are collected by the hierarchy cleanup.
        self.hierarchy
            .remove_all_children_from_parent(page.anchor, self.schema.page_has_results)?;
        for instance in instances {
            self.hierarchy
                .relate_if_absent(page.anchor, *instance, self.schema.page_has_results)?;
        }
        {
            let conn = self.conn.lock().unwrap();
            for rel in relationships {
                conn.execute(
                    "INSERT OR IGNORE INTO page_rel_results (page_id, class_id, rel_id)
                     VALUES (?1, ?2, ?3)",
                    params![page.id, rel.class.as_raw(), rel.id.as_raw()],
                )?;
            }
        }
        debug!(response = name, page_index, "saved response page");
        Ok(())
    }

    /// Validity tag of a page; `None` when the page is absent or its tag
    /// was invalidated.
    pub fn read_page_tag(&self, name: &str, page_index: u32) -> CacheResult<Option<String>> {
        let Some(response) = self.response_row(name)? else {
            return Ok(None);
        };
        let conn = self.conn.lock().unwrap();
        let tag: Option<Option<String>> = conn
            .query_row(
                "SELECT cache_tag FROM response_pages WHERE response_id = ?1 AND page_index = ?2",
                params![response.id, page_index],
                |row| row.get(0),
            )
            .optional()?;
        Ok(tag.flatten())
    }

    /// When a page was cached; `None` when absent.
    pub fn read_page_date(&self, name: &str, page_index: u32) -> CacheResult<Option<DateTime<Utc>>> {
        let Some(response) = self.response_row(name)? else {
            return Ok(None);
        };
        let conn = self.conn.lock().unwrap();
        let date: Option<Option<String>> = conn
            .query_row(
                "SELECT cached_at FROM response_pages WHERE response_id = ?1 AND page_index = ?2",
                params![response.id, page_index],
                |row| row.get(0),
            )
            .optional()?;
        Ok(date.flatten().as_deref().and_then(date_from_text))
    }

    /// Page indexes currently stored for the response, ascending.
    pub fn page_indexes(&self, name: &str) -> CacheResult<Vec<u32>> {
        let Some(response) = self.response_row(name)? else {
            return Ok(Vec::new());
        };
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT page_index FROM response_pages WHERE response_id = ?1 ORDER BY page_index",
        )?;
        let indexes = stmt
            .query_map(params![response.id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(indexes.into_iter().map(|i| i as u32).collect())
    }

    /// Result keys of every page plus the additional-instance set.
    pub fn read_response_instance_keys(&self, name: &str) -> CacheResult<Vec<InstanceKey>> {
        let Some(response) = self.response_row(name)? else {
            return Ok(Vec::new());
        };
        let mut keys = Vec::new();
        let page_anchors: Vec<PageRow> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, class_id, instance_id FROM response_pages
                 WHERE response_id = ?1 ORDER BY page_index",
            )?;
            let rows = stmt
                .query_map(params![response.id], |row| {
                    Ok(PageRow {
                        id: row.get(0)?,
                        anchor: InstanceKey::new(
                            ClassId::from_raw(row.get(1)?),
                            InstanceId::from_raw(row.get(2)?),
                        ),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        for page in &page_anchors {
            for row in self.store.relationships_of_class(
                page.anchor,
                self.schema.page_has_results,
                RelDirection::Forward,
            )? {
                keys.push(row.target);
            }
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT class_id, rel_id FROM page_rel_results WHERE page_id = ?1",
            )?;
            for rel in stmt.query_map(params![page.id], |row| {
                Ok(InstanceKey::new(
                    ClassId::from_raw(row.get(0)?),
                    InstanceId::from_raw(row.get(1)?),
                ))
            })? {
                keys.push(rel?);
            }
        }
        for row in self.store.relationships_of_class(
            response.anchor,
            self.schema.response_has_additional,
            RelDirection::Forward,
        )? {
            keys.push(row.target);
        }
        Ok(keys)
    }

    /// Discards trailing pages when a result shrinks: every page with an
    /// index greater than `max_page_index` is torn down.
    pub fn trim_pages(&self, name: &str, max_page_index: u32) -> CacheResult<()> {
        let Some(response) = self.response_row(name)? else {
            return Ok(());
        };
        let doomed: Vec<PageRow> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, class_id, instance_id FROM response_pages
                 WHERE response_id = ?1 AND page_index > ?2",
            )?;
            let rows = stmt
                .query_map(params![response.id, max_page_index], |row| {
                    Ok(PageRow {
                        id: row.get(0)?,
                        anchor: InstanceKey::new(
                            ClassId::from_raw(row.get(1)?),
                            InstanceId::from_raw(row.get(2)?),
                        ),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        for page in doomed {
            self.remove_page(page)?;
        }
        Ok(())
    }

    fn remove_page(&self, page: PageRow) -> CacheResult<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "DELETE FROM page_rel_results WHERE page_id = ?1",
                params![page.id],
            )?;
            conn.execute("DELETE FROM response_pages WHERE id = ?1", params![page.id])?;
        }
        // Page row is gone, so the anchor is no longer self-held and the
        // cascade releases its members.
        self.hierarchy.delete_instance(page.anchor)?;
        Ok(())
    }

    /// Clears the validity tag of every page whose result set contains
    /// the instance, and of no other page. Cleared pages re-fetch on
    /// next use.
    pub fn invalidate_pages_containing_instance(&self, instance: InstanceKey) -> CacheResult<()> {
        invalidate_pages_containing(&self.conn, instance)
    }

    /// Attaches an instance to a response outside normal paging, so a
    /// locally created object can appear in a cached listing without
    /// invalidating its pages.
    pub fn add_additional_instance(&self, name: &str, instance: InstanceKey) -> CacheResult<()> {
        let response = self.find_or_create_response(name)?;
        self.hierarchy.relate_if_absent(
            response.anchor,
            instance,
            self.schema.response_has_additional,
        )?;
        Ok(())
    }

    /// Detaches an additional instance. Returns whether it was attached.
    pub fn remove_additional_instance(
        &self,
        name: &str,
        instance: InstanceKey,
    ) -> CacheResult<bool> {
        let Some(response) = self.response_row(name)? else {
            return Ok(false);
        };
        match self.store.find_relationship(
            self.schema.response_has_additional,
            response.anchor,
            instance,
        )? {
            Some(row) => {
                self.hierarchy.unrelate(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Detaches the instance from every response it was added to.
    pub(crate) fn remove_additional_instance_everywhere(
        &self,
        instance: InstanceKey,
    ) -> CacheResult<()> {
        for row in self
            .store
            .relationships_of(instance, Some(RelDirection::Backward))?
        {
            if row.key.class == self.schema.response_has_additional {
                self.hierarchy.unrelate(row)?;
            }
        }
        Ok(())
    }

    /// Tears a response down: pages, membership and the anchor itself.
    pub fn remove_response(&self, name: &str) -> CacheResult<()> {
        let Some(response) = self.response_row(name)? else {
            return Ok(());
        };
        let pages: Vec<PageRow> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, class_id, instance_id FROM response_pages WHERE response_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![response.id], |row| {
                    Ok(PageRow {
                        id: row.get(0)?,
                        anchor: InstanceKey::new(
                            ClassId::from_raw(row.get(1)?),
                            InstanceId::from_raw(row.get(2)?),
                        ),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        for page in pages {
            self.remove_page(page)?;
        }
        {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM cached_responses WHERE id = ?1", params![response.id])?;
        }
        self.hierarchy.delete_instance(response.anchor)?;
        debug!(response = name, "removed cached response");
        Ok(())
    }
}

/// Clears the tag of every page referencing `instance`, either through a
/// membership edge or a relationship-result row.
///
/// Free-standing so the hierarchy's delete batch can invalidate before the
/// membership edges disappear with the instance.
pub(crate) fn invalidate_pages_containing(
    conn: &Arc<Mutex<Connection>>,
    instance: InstanceKey,
) -> CacheResult<()> {
    let conn = conn.lock().unwrap();
    // Membership edges land in the store's relationships table; pages are
    // matched through their anchor instance.
    conn.execute(
        "UPDATE response_pages SET cache_tag = NULL
         WHERE id IN (
            SELECT p.id FROM response_pages p
            JOIN relationships r
              ON r.source_class = p.class_id AND r.source_id = p.instance_id
            WHERE r.target_class = ?1 AND r.target_id = ?2
         )",
        params![instance.class.as_raw(), instance.id.as_raw()],
    )?;
    conn.execute(
        "UPDATE response_pages SET cache_tag = NULL
         WHERE id IN (
            SELECT page_id FROM page_rel_results WHERE class_id = ?1 AND rel_id = ?2
         )",
        params![instance.class.as_raw(), instance.id.as_raw()],
    )?;
    Ok(())
}
