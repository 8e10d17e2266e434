use chrono::{Duration, Utc};
use tracing::{instrument, warn};

use coffer_core::{ActorId, ContainerId, ContentRecord};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A persisted container record.
#[derive(Clone, Debug)]
pub struct StoredContainer {
    pub id: ContainerId,
    pub owner_id: Option<ActorId>,
    pub contents: ContentRecord,
    pub created_at: String,
    pub updated_at: String,
}

/// Repository for container contents. Overwrites keep a timestamped backup of
/// the previous row; rows that no longer deserialize are moved to quarantine
/// instead of being surfaced as errors.
pub struct ContainerRepo {
    db: Database,
}

impl ContainerRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Save contents under an identifier, creating or overwriting. The
    /// previous contents (if any) are copied to container_backups first.
    #[instrument(skip(self, contents), fields(container_id = %id))]
    pub fn save(
        &self,
        id: &ContainerId,
        owner_id: Option<&ActorId>,
        contents: &ContentRecord,
    ) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(contents)?;
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let previous: Option<String> = conn
                .query_row(
                    "SELECT contents FROM containers WHERE id = ?1",
                    [id.as_str()],
                    |row| row.get(0),
                )
                .ok();

            if let Some(old_contents) = previous {
                conn.execute(
                    "INSERT INTO container_backups (container_id, contents, backed_up_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![id.as_str(), old_contents, now],
                )?;
                conn.execute(
                    "UPDATE containers SET owner_id = ?1, contents = ?2, updated_at = ?3 WHERE id = ?4",
                    rusqlite::params![
                        owner_id.map(|o| o.as_str()),
                        serialized,
                        now,
                        id.as_str(),
                    ],
                )?;
            } else {
                conn.execute(
                    "INSERT INTO containers (id, owner_id, contents, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        id.as_str(),
                        owner_id.map(|o| o.as_str()),
                        serialized,
                        now,
                        now,
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Load a container. Returns Ok(None) when the identifier is unknown, and
    /// also when the stored row is corrupt — the corrupt row is moved to
    /// quarantine so the caller can proceed with fresh contents.
    #[instrument(skip(self), fields(container_id = %id))]
    pub fn load(&self, id: &ContainerId) -> Result<Option<StoredContainer>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, contents, created_at, updated_at
                 FROM containers WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            let row = match rows.next()? {
                Some(row) => row,
                None => return Ok(None),
            };

            let raw: String = row_helpers::get(row, 2, "containers", "contents")?;
            match row_helpers::parse_json::<ContentRecord>(&raw, "containers", "contents") {
                Ok(contents) => Ok(Some(StoredContainer {
                    id: ContainerId::from_raw(row_helpers::get::<String>(
                        row, 0, "containers", "id",
                    )?),
                    owner_id: row_helpers::get_opt::<String>(row, 1, "containers", "owner_id")?
                        .map(ActorId::from_raw),
                    contents,
                    created_at: row_helpers::get(row, 3, "containers", "created_at")?,
                    updated_at: row_helpers::get(row, 4, "containers", "updated_at")?,
                })),
                Err(e) => {
                    warn!(container_id = %id, error = %e, "corrupt container row, quarantining");
                    conn.execute(
                        "INSERT INTO quarantined_containers (container_id, raw_contents, reason, quarantined_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![
                            id.as_str(),
                            raw,
                            e.to_string(),
                            Utc::now().to_rfc3339(),
                        ],
                    )?;
                    conn.execute("DELETE FROM containers WHERE id = ?1", [id.as_str()])?;
                    Ok(None)
                }
            }
        })
    }

    /// Load every container that still deserializes. Corrupt rows are
    /// quarantined and skipped.
    #[instrument(skip(self))]
    pub fn load_all(&self) -> Result<Vec<StoredContainer>, StoreError> {
        let ids: Vec<ContainerId> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM containers ORDER BY created_at")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for raw in rows {
                ids.push(ContainerId::from_raw(raw?));
            }
            Ok(ids)
        })?;

        let mut results = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(container) = self.load(id)? {
                results.push(container);
            }
        }
        Ok(results)
    }

    #[instrument(skip(self), fields(container_id = %id))]
    pub fn delete(&self, id: &ContainerId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM containers WHERE id = ?1", [id.as_str()])?;
            Ok(())
        })
    }

    pub fn exists(&self, id: &ContainerId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM containers WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM containers", [], |row| row.get(0))?;
            Ok(count)
        })
    }

    pub fn backup_count(&self, id: &ContainerId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM container_backups WHERE container_id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    pub fn quarantine_count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM quarantined_containers",
                [],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Drop backups older than the retention window. Returns rows deleted.
    #[instrument(skip(self))]
    pub fn purge_backups_older_than(&self, days: u64) -> Result<usize, StoreError> {
        let cutoff = (Utc::now() - Duration::days(days as i64)).to_rfc3339();
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM container_backups WHERE backed_up_at < ?1",
                [cutoff],
            )?;
            Ok(deleted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::Item;

    fn record_with(kind: &str, count: u32) -> ContentRecord {
        let mut record = ContentRecord::empty(27);
        record.set(0, Some(Item::plain(kind, count))).unwrap();
        record
    }

    #[test]
    fn save_and_load_roundtrip() {
        let repo = ContainerRepo::new(Database::in_memory().unwrap());
        let id = ContainerId::new();
        let owner = ActorId::new();
        let record = record_with("dust", 64);

        repo.save(&id, Some(&owner), &record).unwrap();
        let loaded = repo.load(&id).unwrap().unwrap();
        assert_eq!(loaded.contents, record);
        assert_eq!(loaded.owner_id.as_ref(), Some(&owner));
    }

    #[test]
    fn load_unknown_returns_none() {
        let repo = ContainerRepo::new(Database::in_memory().unwrap());
        assert!(repo.load(&ContainerId::new()).unwrap().is_none());
    }

    #[test]
    fn overwrite_creates_backup() {
        let repo = ContainerRepo::new(Database::in_memory().unwrap());
        let id = ContainerId::new();

        repo.save(&id, None, &record_with("dust", 10)).unwrap();
        assert_eq!(repo.backup_count(&id).unwrap(), 0);

        repo.save(&id, None, &record_with("dust", 20)).unwrap();
        assert_eq!(repo.backup_count(&id).unwrap(), 1);

        repo.save(&id, None, &record_with("dust", 30)).unwrap();
        assert_eq!(repo.backup_count(&id).unwrap(), 2);

        let loaded = repo.load(&id).unwrap().unwrap();
        assert_eq!(loaded.contents.total_count(), 30);
    }

    #[test]
    fn corrupt_row_is_quarantined_and_reads_as_missing() {
        let db = Database::in_memory().unwrap();
        let repo = ContainerRepo::new(db.clone());
        let id = ContainerId::new();
        let now = Utc::now().to_rfc3339();

        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO containers (id, owner_id, contents, created_at, updated_at)
                 VALUES (?1, NULL, 'garbage{{{', ?2, ?2)",
                rusqlite::params![id.as_str(), now],
            )?;
            Ok(())
        })
        .unwrap();

        assert!(repo.load(&id).unwrap().is_none());
        assert_eq!(repo.quarantine_count().unwrap(), 1);
        assert_eq!(repo.count().unwrap(), 0);

        // A fresh save under the same id works again.
        repo.save(&id, None, &record_with("gem", 1)).unwrap();
        assert!(repo.load(&id).unwrap().is_some());
    }

    #[test]
    fn load_all_skips_corrupt_rows() {
        let db = Database::in_memory().unwrap();
        let repo = ContainerRepo::new(db.clone());
        let good = ContainerId::new();
        let bad = ContainerId::new();
        let now = Utc::now().to_rfc3339();

        repo.save(&good, None, &record_with("dust", 5)).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO containers (id, owner_id, contents, created_at, updated_at)
                 VALUES (?1, NULL, 'nope', ?2, ?2)",
                rusqlite::params![bad.as_str(), now],
            )?;
            Ok(())
        })
        .unwrap();

        let all = repo.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, good);
        assert_eq!(repo.quarantine_count().unwrap(), 1);
    }

    #[test]
    fn delete_removes_row() {
        let repo = ContainerRepo::new(Database::in_memory().unwrap());
        let id = ContainerId::new();
        repo.save(&id, None, &record_with("dust", 1)).unwrap();
        assert!(repo.exists(&id).unwrap());
        repo.delete(&id).unwrap();
        assert!(!repo.exists(&id).unwrap());
    }

    #[test]
    fn purge_old_backups() {
        let db = Database::in_memory().unwrap();
        let repo = ContainerRepo::new(db.clone());
        let id = ContainerId::new();
        repo.save(&id, None, &record_with("dust", 1)).unwrap();
        repo.save(&id, None, &record_with("dust", 2)).unwrap();

        // Age the backup past the retention window.
        let old = (Utc::now() - Duration::days(10)).to_rfc3339();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE container_backups SET backed_up_at = ?1",
                [old.as_str()],
            )?;
            Ok(())
        })
        .unwrap();

        let deleted = repo.purge_backups_older_than(7).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(repo.backup_count(&id).unwrap(), 0);
    }
}
