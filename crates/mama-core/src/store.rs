// MAMA OS — Persistence layer.
//
// One SQLite connection (via `rusqlite`, bundled) behind a mutex, the same
// shape as this codebase's session store: WAL journaling, idempotent
// `CREATE TABLE IF NOT EXISTS` migrations run at open time instead of a
// separate migration runner, and a generic key/value table for config blobs
// that don't warrant a dedicated schema.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::atoms::error::EngineResult;

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mama-os")
        .join("mama.db")
}

/// Thread-safe database wrapper backing SessionPool (C9), the delegation
/// audit trail (C13), CronScheduler (C14), and JobLock (C2).
pub struct Store {
    pub conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> EngineResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;").ok();
        migrate(&conn)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    // ── Generic key/value config (routing tables, enforcement overrides) ────

    pub fn get_config(&self, key: &str) -> EngineResult<Option<String>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT value FROM kv_config WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_config(&self, key: &str, value: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv_config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

fn migrate(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv_config (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            session_id              TEXT PRIMARY KEY,
            channel_key             TEXT NOT NULL,
            project_dir             TEXT,
            created_at              TEXT NOT NULL,
            last_active             TEXT NOT NULL,
            message_count           INTEGER NOT NULL DEFAULT 0,
            cumulative_input_tokens INTEGER NOT NULL DEFAULT 0,
            pid                     INTEGER,
            client_id               TEXT,
            status                  TEXT NOT NULL DEFAULT 'active'
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_channel_key ON sessions(channel_key);

        CREATE TABLE IF NOT EXISTS decision_edges (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            from_id          TEXT NOT NULL,
            to_id            TEXT NOT NULL,
            relationship     TEXT NOT NULL DEFAULT 'delegates',
            reason           TEXT,
            created_at       TEXT NOT NULL,
            created_by       TEXT,
            approved_by_user INTEGER NOT NULL DEFAULT 0,
            wave             INTEGER NOT NULL,
            status           TEXT NOT NULL,
            channel_key      TEXT NOT NULL,
            depth            INTEGER NOT NULL,
            task             TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_decision_edges_channel_key ON decision_edges(channel_key);

        CREATE TABLE IF NOT EXISTS cron_jobs (
            id          TEXT PRIMARY KEY,
            schedule    TEXT NOT NULL,
            enabled     INTEGER NOT NULL DEFAULT 1,
            next_run    TEXT,
            last_run    TEXT,
            last_status TEXT
        );

        CREATE TABLE IF NOT EXISTS job_locks (
            name       TEXT PRIMARY KEY,
            holder     TEXT NOT NULL,
            acquired_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ultrawork_sessions (
            session_id      TEXT PRIMARY KEY,
            channel_key     TEXT NOT NULL,
            state           TEXT NOT NULL,
            max_steps       INTEGER NOT NULL,
            max_duration_ms INTEGER NOT NULL,
            step_count      INTEGER NOT NULL,
            started_at      TEXT NOT NULL,
            plan            TEXT NOT NULL DEFAULT '',
            progress_json   TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_ultrawork_sessions_channel_key ON ultrawork_sessions(channel_key);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_opens_and_migrates() {
        let store = Store::open_in_memory().unwrap();
        store.set_config("k", "v").unwrap();
        assert_eq!(store.get_config("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn missing_key_returns_none() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_config("nope").unwrap(), None);
    }

    #[test]
    fn set_config_overwrites_existing_key() {
        let store = Store::open_in_memory().unwrap();
        store.set_config("k", "v1").unwrap();
        store.set_config("k", "v2").unwrap();
        assert_eq!(store.get_config("k").unwrap(), Some("v2".to_string()));
    }
}
