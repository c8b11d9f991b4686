//! Record catalog: which blob holds which user's named item.

use chrono::Utc;
use rusqlite::{params, Connection};

use strongbox_shared::types::{RecordId, RecordKind, UserId};

use crate::error::{conflict, not_found, Result};
use crate::models::{timestamp_column, uuid_column, BlobHandle, Record, RecordSummary};

/// Catalog queries bound to one connection (or transaction).
#[derive(Clone, Copy)]
pub struct Catalog<'c> {
    conn: &'c Connection,
}

impl<'c> Catalog<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Bind a new record id to `blob_handle`.
    pub fn insert(
        &self,
        owner: UserId,
        kind: &RecordKind,
        name: &str,
        blob_handle: BlobHandle,
    ) -> Result<RecordId> {
        let id = RecordId::new();
        self.conn
            .execute(
                "INSERT INTO user_data (id, user_id, data_type, data_name, blob_handle, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.to_string(),
                    owner.to_string(),
                    kind.as_str(),
                    name,
                    blob_handle.0,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(conflict)?;
        Ok(id)
    }

    /// Every record owned by `owner`, in insertion order.
    pub fn list_by_owner(&self, owner: UserId) -> Result<Vec<RecordSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, data_type, data_name FROM user_data
             WHERE user_id = ?1
             ORDER BY rowid",
        )?;

        let rows = stmt.query_map(params![owner.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let name: String = row.get(2)?;
            Ok(RecordSummary {
                id: RecordId(uuid_column(0, &id_str)?),
                kind: RecordKind::from(kind),
                name,
            })
        })?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Blob handle of `id`, provided `owner` owns it.
    pub fn handle_for(&self, owner: UserId, id: RecordId) -> Result<BlobHandle> {
        self.conn
            .query_row(
                "SELECT blob_handle FROM user_data WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), owner.to_string()],
                |row| Ok(BlobHandle(row.get(0)?)),
            )
            .map_err(not_found)
    }

    /// Full record row, provided `owner` owns it.
    pub fn get(&self, owner: UserId, id: RecordId) -> Result<Record> {
        self.conn
            .query_row(
                "SELECT id, user_id, data_type, data_name, blob_handle, created_at
                 FROM user_data
                 WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), owner.to_string()],
                row_to_record,
            )
            .map_err(not_found)
    }

    /// Remove the catalog row. Returns the blob it pointed at, or `None` if
    /// `owner` has no such record.
    pub fn delete(&self, owner: UserId, id: RecordId) -> Result<Option<BlobHandle>> {
        let handle = match self.handle_for(owner, id) {
            Ok(handle) => handle,
            Err(crate::StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        self.conn.execute(
            "DELETE FROM user_data WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), owner.to_string()],
        )?;
        Ok(Some(handle))
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let id_str: String = row.get(0)?;
    let owner_str: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let name: String = row.get(3)?;
    let handle: i64 = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(Record {
        id: RecordId(uuid_column(0, &id_str)?),
        owner_id: UserId(uuid_column(1, &owner_str)?),
        kind: RecordKind::from(kind),
        name,
        blob_handle: BlobHandle(handle),
        created_at: timestamp_column(5, &created_str)?,
    })
}
