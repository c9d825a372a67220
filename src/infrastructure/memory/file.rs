//! JSON-file memory store backing the `File` backend.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::in_memory::StoredSession;
use crate::domain::error::{ChainError, ChainResult};
use crate::domain::memory::{AccessStats, MemoryEntry, MemoryStore};

/// Durable store keeping all sessions in one JSON file.
///
/// Every operation holds the store lock across its load-modify-save cycle,
/// and saves go through a temp file renamed into place so a crash never
/// leaves a half-written store behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> ChainResult<HashMap<String, StoredSession>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| ChainError::memory(format!("read {}: {e}", self.path.display())))?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&raw)
            .map_err(|e| ChainError::memory(format!("decode {}: {e}", self.path.display())))
    }

    fn save(&self, sessions: &HashMap<String, StoredSession>) -> ChainResult<()> {
        let raw = serde_json::to_string(sessions)
            .map_err(|e| ChainError::memory(format!("encode memory store: {e}")))?;

        let parent = self.path.parent().unwrap_or_else(|| std::path::Path::new("."));
        fs::create_dir_all(parent)
            .map_err(|e| ChainError::memory(format!("create {}: {e}", parent.display())))?;

        let tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| ChainError::memory(format!("temp file: {e}")))?;
        fs::write(tmp.path(), raw)
            .map_err(|e| ChainError::memory(format!("write memory store: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| ChainError::memory(format!("persist {}: {e}", self.path.display())))?;
        Ok(())
    }

    fn with_sessions<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, StoredSession>) -> ChainResult<(T, bool)>,
    ) -> ChainResult<T> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| ChainError::memory("file store lock poisoned"))?;
        let mut sessions = self.load()?;
        let (result, dirty) = f(&mut sessions)?;
        if dirty {
            self.save(&sessions)?;
        }
        Ok(result)
    }
}

#[async_trait]
impl MemoryStore for FileStore {
    async fn store(&self, key: &str, entries: Vec<MemoryEntry>) -> ChainResult<()> {
        self.with_sessions(|sessions| {
            match sessions.get_mut(key) {
                Some(session) => session.entries = entries,
                None => {
                    sessions.insert(key.to_string(), StoredSession::new(entries));
                }
            }
            Ok(((), true))
        })
    }

    async fn retrieve(&self, key: &str) -> ChainResult<Vec<MemoryEntry>> {
        self.with_sessions(|sessions| {
            let session = sessions
                .get_mut(key)
                .ok_or_else(|| ChainError::not_found(format!("memory key '{key}'")))?;
            session.stats.record_access(Utc::now());
            Ok((session.entries.clone(), true))
        })
    }

    async fn prepend(
        &self,
        key: &str,
        entries: Vec<MemoryEntry>,
        max_len: Option<usize>,
    ) -> ChainResult<()> {
        self.with_sessions(|sessions| {
            let session = sessions
                .entry(key.to_string())
                .or_insert_with(|| StoredSession::new(Vec::new()));

            let mut merged = entries;
            merged.append(&mut session.entries);
            if let Some(max_len) = max_len {
                merged.truncate(max_len);
            }
            session.entries = merged;
            Ok(((), true))
        })
    }

    async fn delete(&self, key: &str) -> ChainResult<()> {
        self.with_sessions(|sessions| {
            let removed = sessions.remove(key).is_some();
            Ok(((), removed))
        })
    }

    async fn keys(&self) -> ChainResult<Vec<String>> {
        self.with_sessions(|sessions| Ok((sessions.keys().cloned().collect(), false)))
    }

    async fn size(&self) -> ChainResult<usize> {
        self.with_sessions(|sessions| Ok((sessions.len(), false)))
    }

    async fn clear(&self) -> ChainResult<()> {
        self.with_sessions(|sessions| {
            sessions.clear();
            Ok(((), true))
        })
    }

    async fn access_stats(&self) -> ChainResult<HashMap<String, AccessStats>> {
        self.with_sessions(|sessions| {
            Ok((
                sessions
                    .iter()
                    .map(|(key, session)| (key.clone(), session.stats))
                    .collect(),
                false,
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> FileStore {
        FileStore::new(dir.path().join("memory.json"))
    }

    #[tokio::test]
    async fn test_round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = store_in(&dir);
            store
                .prepend("s", vec![MemoryEntry::user("hello")], None)
                .await
                .unwrap();
        }

        let reopened = store_in(&dir);
        let entries = reopened.retrieve("s").await.unwrap();
        assert_eq!(entries[0].content, "hello");
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.size().await.unwrap(), 0);
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prepend_bound_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        for i in 0..4 {
            store
                .prepend("s", vec![MemoryEntry::user(format!("m{i}"))], Some(2))
                .await
                .unwrap();
        }

        let entries = store.retrieve("s").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "m3");
    }

    #[tokio::test]
    async fn test_access_stats_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .prepend("s", vec![MemoryEntry::user("x")], None)
            .await
            .unwrap();
        store.retrieve("s").await.unwrap();

        let reopened = store_in(&dir);
        let stats = reopened.access_stats().await.unwrap();
        assert_eq!(stats["s"].access_count, 1);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .prepend("a", vec![MemoryEntry::user("x")], None)
            .await
            .unwrap();
        store
            .prepend("b", vec![MemoryEntry::user("y")], None)
            .await
            .unwrap();

        store.delete("a").await.unwrap();
        assert_eq!(store.size().await.unwrap(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.size().await.unwrap(), 0);
    }
}
