use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::warn;

/// A persisted security event (integrity violation, forced session end).
#[derive(Clone, Debug)]
pub struct SecurityEvent {
    pub id: i64,
    pub timestamp: String,
    pub actor_id: String,
    pub actor_name: String,
    pub container_id: Option<String>,
    pub kind: String,
    pub detail: String,
}

/// Query parameters for the admin-facing audit trail.
#[derive(Clone, Debug, Default)]
pub struct SecurityQuery {
    pub actor_id: Option<String>,
    pub kind: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite-backed audit trail for integrity violations. Writes are
/// best-effort: a failed insert must never take down the save path that
/// triggered it.
pub struct SecurityLog {
    conn: Mutex<Connection>,
}

impl SecurityLog {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS security_events (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 actor_id TEXT NOT NULL,
                 actor_name TEXT NOT NULL,
                 container_id TEXT,
                 kind TEXT NOT NULL,
                 detail TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_security_actor ON security_events(actor_id);
             CREATE INDEX IF NOT EXISTS idx_security_kind ON security_events(kind);
             CREATE INDEX IF NOT EXISTS idx_security_timestamp ON security_events(timestamp);",
        )
    }

    pub fn record(
        &self,
        actor_id: &str,
        actor_name: &str,
        container_id: Option<&str>,
        kind: &str,
        detail: &str,
    ) {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO security_events (timestamp, actor_id, actor_name, container_id, kind, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                Utc::now().to_rfc3339(),
                actor_id,
                actor_name,
                container_id,
                kind,
                detail,
            ],
        );
        if let Err(e) = result {
            warn!(error = %e, kind, "security event insert failed");
        }
    }

    pub fn query(&self, q: &SecurityQuery) -> Result<Vec<SecurityEvent>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, actor_id, actor_name, container_id, kind, detail
             FROM security_events WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(actor_id) = &q.actor_id {
            sql.push_str(&format!(" AND actor_id = ?{}", params.len() + 1));
            params.push(Box::new(actor_id.clone()));
        }
        if let Some(kind) = &q.kind {
            sql.push_str(&format!(" AND kind = ?{}", params.len() + 1));
            params.push(Box::new(kind.clone()));
        }
        if let Some(since) = &q.since {
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len() + 1));
            params.push(Box::new(since.clone()));
        }

        sql.push_str(" ORDER BY id DESC");
        let limit = q.limit.unwrap_or(100);
        sql.push_str(&format!(" LIMIT {limit}"));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(SecurityEvent {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                actor_id: row.get(2)?,
                actor_name: row.get(3)?,
                container_id: row.get(4)?,
                kind: row.get(5)?,
                detail: row.get(6)?,
            })
        })?;

        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM security_events", [], |row| row.get(0))
    }
}
