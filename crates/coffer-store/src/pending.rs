use chrono::{Duration, Utc};
use tracing::instrument;

use coffer_core::{ContainerId, ContentRecord};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A save that could not be written back to its backing item when the view
/// closed. Held here until the next open under the same identifier.
#[derive(Clone, Debug)]
pub struct PendingSave {
    pub container_id: ContainerId,
    pub contents: ContentRecord,
    /// Whether the durable write to the containers table succeeded before the
    /// item went missing. Affects which copy wins on the next open.
    pub write_back_succeeded: bool,
    pub created_at: String,
}

/// Repository for pending saves. One entry per container identifier; a newer
/// entry replaces the old one.
pub struct PendingSaveRepo {
    db: Database,
}

impl PendingSaveRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, contents), fields(container_id = %id))]
    pub fn put(
        &self,
        id: &ContainerId,
        contents: &ContentRecord,
        write_back_succeeded: bool,
    ) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(contents)?;
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending_saves (container_id, contents, write_back_succeeded, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(container_id) DO UPDATE SET
                     contents = excluded.contents,
                     write_back_succeeded = excluded.write_back_succeeded,
                     created_at = excluded.created_at",
                rusqlite::params![id.as_str(), serialized, write_back_succeeded, now],
            )?;
            Ok(())
        })
    }

    /// Read and delete in one step. The entry is consumed exactly once.
    #[instrument(skip(self), fields(container_id = %id))]
    pub fn take(&self, id: &ContainerId) -> Result<Option<PendingSave>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT container_id, contents, write_back_succeeded, created_at
                 FROM pending_saves WHERE container_id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            let pending = match rows.next()? {
                Some(row) => Some(row_to_pending(row)?),
                None => None,
            };
            drop(rows);
            drop(stmt);

            if pending.is_some() {
                conn.execute(
                    "DELETE FROM pending_saves WHERE container_id = ?1",
                    [id.as_str()],
                )?;
            }
            Ok(pending)
        })
    }

    /// Peek without consuming (auditor and admin tooling).
    pub fn get(&self, id: &ContainerId) -> Result<Option<PendingSave>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT container_id, contents, write_back_succeeded, created_at
                 FROM pending_saves WHERE container_id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_pending(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn list(&self) -> Result<Vec<PendingSave>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT container_id, contents, write_back_succeeded, created_at
                 FROM pending_saves ORDER BY created_at",
            )?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_pending(row)?);
            }
            Ok(results)
        })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM pending_saves", [], |row| row.get(0))?;
            Ok(count)
        })
    }

    /// Drop entries older than the retention window. Returns rows deleted.
    #[instrument(skip(self))]
    pub fn purge_expired(&self, days: u64) -> Result<usize, StoreError> {
        let cutoff = (Utc::now() - Duration::days(days as i64)).to_rfc3339();
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM pending_saves WHERE created_at < ?1",
                [cutoff],
            )?;
            Ok(deleted)
        })
    }
}

fn row_to_pending(row: &rusqlite::Row<'_>) -> Result<PendingSave, StoreError> {
    let raw: String = row_helpers::get(row, 1, "pending_saves", "contents")?;
    Ok(PendingSave {
        container_id: ContainerId::from_raw(row_helpers::get::<String>(
            row,
            0,
            "pending_saves",
            "container_id",
        )?),
        contents: row_helpers::parse_json(&raw, "pending_saves", "contents")?,
        write_back_succeeded: row_helpers::get(row, 2, "pending_saves", "write_back_succeeded")?,
        created_at: row_helpers::get(row, 3, "pending_saves", "created_at")?,
    })
}
