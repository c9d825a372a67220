//! SQLite memory store backing the `Database` backend.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::error::{ChainError, ChainResult};
use crate::domain::memory::{AccessStats, MemoryEntry, MemoryStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memory_sessions (
    key          TEXT PRIMARY KEY,
    entries      TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_access  TEXT NOT NULL,
    created_at   TEXT NOT NULL
);
";

/// Durable store keyed by session, one row per key with the entry list
/// serialized as JSON. The connection lock serializes read-modify-write
/// cycles, so `prepend` is atomic.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> ChainResult<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> ChainResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> ChainResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ChainError::memory("sqlite connection lock poisoned"))
    }

    fn read_entries(conn: &Connection, key: &str) -> ChainResult<Option<Vec<MemoryEntry>>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT entries FROM memory_sessions WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        raw.map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| ChainError::memory(format!("decode entries for '{key}': {e}")))
        })
        .transpose()
    }

    fn write_entries(conn: &Connection, key: &str, entries: &[MemoryEntry]) -> ChainResult<()> {
        let raw = serde_json::to_string(entries)
            .map_err(|e| ChainError::memory(format!("encode entries for '{key}': {e}")))?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO memory_sessions (key, entries, access_count, last_access, created_at)
             VALUES (?1, ?2, 0, ?3, ?3)
             ON CONFLICT(key) DO UPDATE SET entries = excluded.entries",
            params![key, raw, now],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn store(&self, key: &str, entries: Vec<MemoryEntry>) -> ChainResult<()> {
        let conn = self.lock()?;
        Self::write_entries(&conn, key, &entries)
    }

    async fn retrieve(&self, key: &str) -> ChainResult<Vec<MemoryEntry>> {
        let conn = self.lock()?;
        let entries = Self::read_entries(&conn, key)?
            .ok_or_else(|| ChainError::not_found(format!("memory key '{key}'")))?;

        conn.execute(
            "UPDATE memory_sessions
             SET access_count = access_count + 1, last_access = ?2
             WHERE key = ?1",
            params![key, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;

        Ok(entries)
    }

    async fn prepend(
        &self,
        key: &str,
        entries: Vec<MemoryEntry>,
        max_len: Option<usize>,
    ) -> ChainResult<()> {
        let conn = self.lock()?;

        let mut merged = entries;
        if let Some(mut existing) = Self::read_entries(&conn, key)? {
            merged.append(&mut existing);
        }
        if let Some(max_len) = max_len {
            merged.truncate(max_len);
        }
        Self::write_entries(&conn, key, &merged)
    }

    async fn delete(&self, key: &str) -> ChainResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM memory_sessions WHERE key = ?1", params![key])
            .map_err(db_err)?;
        Ok(())
    }

    async fn keys(&self) -> ChainResult<Vec<String>> {
        let conn = self.lock()?;
        let mut statement = conn
            .prepare("SELECT key FROM memory_sessions")
            .map_err(db_err)?;
        let keys = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(keys)
    }

    async fn size(&self) -> ChainResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_sessions", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(count as usize)
    }

    async fn clear(&self) -> ChainResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM memory_sessions", [])
            .map_err(db_err)?;
        Ok(())
    }

    async fn access_stats(&self) -> ChainResult<HashMap<String, AccessStats>> {
        let conn = self.lock()?;
        let mut statement = conn
            .prepare("SELECT key, access_count, last_access, created_at FROM memory_sessions")
            .map_err(db_err)?;

        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut stats = HashMap::with_capacity(rows.len());
        for (key, access_count, last_access, created_at) in rows {
            stats.insert(
                key,
                AccessStats {
                    access_count: access_count.max(0) as u64,
                    last_access: parse_timestamp(&last_access)?,
                    created_at: parse_timestamp(&created_at)?,
                },
            );
        }
        Ok(stats)
    }
}

fn db_err(e: rusqlite::Error) -> ChainError {
    ChainError::memory(e.to_string())
}

fn parse_timestamp(raw: &str) -> ChainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ChainError::memory(format!("bad timestamp '{raw}': {e}")))
}
