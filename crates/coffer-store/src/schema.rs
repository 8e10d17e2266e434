/// SQL DDL for the coffer-store database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS containers (
    id TEXT PRIMARY KEY,
    owner_id TEXT,
    contents TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS container_backups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    container_id TEXT NOT NULL,
    contents TEXT NOT NULL,
    backed_up_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS quarantined_containers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    container_id TEXT NOT NULL,
    raw_contents TEXT NOT NULL,
    reason TEXT NOT NULL,
    quarantined_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_saves (
    container_id TEXT PRIMARY KEY,
    contents TEXT NOT NULL,
    write_back_succeeded INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_backups_container ON container_backups(container_id);
CREATE INDEX IF NOT EXISTS idx_backups_time ON container_backups(backed_up_at);
CREATE INDEX IF NOT EXISTS idx_quarantine_container ON quarantined_containers(container_id);
CREATE INDEX IF NOT EXISTS idx_pending_created ON pending_saves(created_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
