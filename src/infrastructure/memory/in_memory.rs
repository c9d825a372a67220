//! In-process memory store backing the `Shared` backend.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::error::{ChainError, ChainResult};
use crate::domain::memory::{AccessStats, MemoryEntry, MemoryStore};

/// One session's entries plus its access statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredSession {
    pub entries: Vec<MemoryEntry>,
    pub stats: AccessStats,
}

impl StoredSession {
    pub fn new(entries: Vec<MemoryEntry>) -> Self {
        Self {
            entries,
            stats: AccessStats::fresh(Utc::now()),
        }
    }
}

/// Ephemeral table guarded by a single lock; prepends hold the write lock
/// for the whole read-modify-write, so concurrent runs against one session
/// cannot lose updates.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(
        &self,
    ) -> ChainResult<std::sync::RwLockReadGuard<'_, HashMap<String, StoredSession>>> {
        self.sessions
            .read()
            .map_err(|_| ChainError::memory("memory table lock poisoned"))
    }

    fn write(
        &self,
    ) -> ChainResult<std::sync::RwLockWriteGuard<'_, HashMap<String, StoredSession>>> {
        self.sessions
            .write()
            .map_err(|_| ChainError::memory("memory table lock poisoned"))
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(&self, key: &str, entries: Vec<MemoryEntry>) -> ChainResult<()> {
        let mut sessions = self.write()?;
        match sessions.get_mut(key) {
            Some(session) => session.entries = entries,
            None => {
                sessions.insert(key.to_string(), StoredSession::new(entries));
            }
        }
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> ChainResult<Vec<MemoryEntry>> {
        let mut sessions = self.write()?;
        let session = sessions
            .get_mut(key)
            .ok_or_else(|| ChainError::not_found(format!("memory key '{key}'")))?;
        session.stats.record_access(Utc::now());
        Ok(session.entries.clone())
    }

    async fn prepend(
        &self,
        key: &str,
        entries: Vec<MemoryEntry>,
        max_len: Option<usize>,
    ) -> ChainResult<()> {
        let mut sessions = self.write()?;
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| StoredSession::new(Vec::new()));

        let mut merged = entries;
        merged.append(&mut session.entries);
        if let Some(max_len) = max_len {
            merged.truncate(max_len);
        }
        session.entries = merged;
        Ok(())
    }

    async fn delete(&self, key: &str) -> ChainResult<()> {
        self.write()?.remove(key);
        Ok(())
    }

    async fn keys(&self) -> ChainResult<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    async fn size(&self) -> ChainResult<usize> {
        Ok(self.read()?.len())
    }

    async fn clear(&self) -> ChainResult<()> {
        self.write()?.clear();
        Ok(())
    }

    async fn access_stats(&self) -> ChainResult<HashMap<String, AccessStats>> {
        Ok(self
            .read()?
            .iter()
            .map(|(key, session)| (key.clone(), session.stats))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retrieve_missing_key() {
        let store = InMemoryStore::new();
        let result = store.retrieve("absent").await;
        assert!(matches!(result, Err(ChainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_prepend_creates_and_orders_newest_first() {
        let store = InMemoryStore::new();
        store
            .prepend("s", vec![MemoryEntry::user("first")], None)
            .await
            .unwrap();
        store
            .prepend("s", vec![MemoryEntry::user("second")], None)
            .await
            .unwrap();

        let entries = store.retrieve("s").await.unwrap();
        assert_eq!(entries[0].content, "second");
        assert_eq!(entries[1].content, "first");
    }

    #[tokio::test]
    async fn test_prepend_truncates_to_bound() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .prepend("s", vec![MemoryEntry::user(format!("m{i}"))], Some(3))
                .await
                .unwrap();
        }

        let entries = store.retrieve("s").await.unwrap();
        assert_eq!(entries.len(), 3);
        // Most recent survive.
        assert_eq!(entries[0].content, "m4");
        assert_eq!(entries[2].content, "m2");
    }

    #[tokio::test]
    async fn test_retrieve_records_access() {
        let store = InMemoryStore::new();
        store
            .prepend("s", vec![MemoryEntry::user("x")], None)
            .await
            .unwrap();

        store.retrieve("s").await.unwrap();
        store.retrieve("s").await.unwrap();

        let stats = store.access_stats().await.unwrap();
        assert_eq!(stats["s"].access_count, 2);
    }

    #[tokio::test]
    async fn test_delete_and_size() {
        let store = InMemoryStore::new();
        store
            .prepend("a", vec![MemoryEntry::user("x")], None)
            .await
            .unwrap();
        store
            .prepend("b", vec![MemoryEntry::user("y")], None)
            .await
            .unwrap();
        assert_eq!(store.size().await.unwrap(), 2);

        store.delete("a").await.unwrap();
        assert_eq!(store.size().await.unwrap(), 1);
        assert_eq!(store.keys().await.unwrap(), vec!["b"]);

        store.clear().await.unwrap();
        assert_eq!(store.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_prepends_lose_nothing() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .prepend("s", vec![MemoryEntry::user(format!("m{i}"))], None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.retrieve("s").await.unwrap().len(), 20);
    }
}
