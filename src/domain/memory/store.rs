//! Keyed persistence contract for memory entries.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::MemoryEntry;
use super::eviction::{self, PruningStrategy};
use crate::domain::error::ChainResult;

/// Per-key access statistics, the input to the eviction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessStats {
    pub access_count: u64,
    pub last_access: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AccessStats {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            access_count: 0,
            last_access: now,
            created_at: now,
        }
    }

    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_access = now;
    }
}

/// Uniform contract over the three memory backends (in-process shared table,
/// file-backed, SQLite-backed). Keys are session ids; values are entry lists
/// in newest-first order.
///
/// `prepend` is the atomic write path: backends must apply it without a
/// separate read-then-overwrite window, so concurrent runs against one
/// session cannot lose updates.
#[async_trait]
pub trait MemoryStore: Send + Sync + Debug {
    /// Replace the entry list for a key.
    async fn store(&self, key: &str, entries: Vec<MemoryEntry>) -> ChainResult<()>;

    /// Entry list for a key, newest-first. `NotFound` if the key is absent.
    async fn retrieve(&self, key: &str) -> ChainResult<Vec<MemoryEntry>>;

    /// Atomically add entries to the front of a key's list, creating the key
    /// if needed. When `max_len` is set the list is truncated to the most
    /// recent `max_len` entries in the same operation.
    async fn prepend(
        &self,
        key: &str,
        entries: Vec<MemoryEntry>,
        max_len: Option<usize>,
    ) -> ChainResult<()>;

    async fn delete(&self, key: &str) -> ChainResult<()>;

    async fn keys(&self) -> ChainResult<Vec<String>>;

    async fn size(&self) -> ChainResult<usize>;

    async fn clear(&self) -> ChainResult<()>;

    /// Access statistics for every key.
    async fn access_stats(&self) -> ChainResult<HashMap<String, AccessStats>>;

    /// Keys the configured strategy would remove, up to `limit`.
    async fn find_keys_for_pruning(
        &self,
        strategy: PruningStrategy,
        limit: usize,
        ttl_cutoff: Option<DateTime<Utc>>,
    ) -> ChainResult<Vec<String>> {
        let stats = self.access_stats().await?;
        Ok(eviction::select_keys(&stats, strategy, limit, ttl_cutoff))
    }
}
