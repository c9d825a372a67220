//! Session-scoped memory management: context injection, write-back, pruning.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::MemoryEntry;
use super::eviction::PruningStrategy;
use super::store::MemoryStore;
use crate::domain::error::{ChainError, ChainResult};
use crate::domain::variables::Variables;

/// Session id used when neither the variables nor the chain name one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// What the memory remembers and how it behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Full transcript in a (typically shared, ephemeral) store; injected as
    /// context before each LLM call.
    Conversation,
    /// Bounded recent entries, no persistence, no context injection.
    Buffer,
    /// Durable transcript that survives process restarts; injected as
    /// context before each LLM call.
    Persistent,
}

impl MemoryKind {
    /// Whether this kind feeds stored turns back into the system message.
    pub fn injects_context(&self) -> bool {
        matches!(self, Self::Conversation | Self::Persistent)
    }
}

/// Storage medium behind the memory contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryBackend {
    /// Process-wide shared table; contents live for the process lifetime.
    Shared,
    /// JSON file on disk.
    File { path: PathBuf },
    /// SQLite database.
    Database { path: PathBuf },
}

/// Memory configuration attached to a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub kind: MemoryKind,
    pub backend: MemoryBackend,
    /// Capacity in sessions before pruning kicks in.
    pub max_entries: usize,
    pub pruning_strategy: PruningStrategy,
    pub auto_prune: bool,
    /// Occupancy fraction of `max_entries` above which auto-pruning runs.
    pub prune_threshold: f64,
    /// Fraction of `max_entries` removed per pruning pass.
    pub prune_percentage: f64,
    /// Age cutoff feeding the TTL strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
    /// Most recent entries injected as context per call.
    pub context_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            kind: MemoryKind::Conversation,
            backend: MemoryBackend::Shared,
            max_entries: 1000,
            pruning_strategy: PruningStrategy::default(),
            auto_prune: true,
            prune_threshold: 0.9,
            prune_percentage: 0.2,
            ttl: None,
            context_limit: 10,
        }
    }
}

impl MemoryConfig {
    pub fn conversation() -> Self {
        Self::default()
    }

    pub fn buffer(max_entries: usize) -> Self {
        Self {
            kind: MemoryKind::Buffer,
            max_entries,
            ..Self::default()
        }
    }

    pub fn persistent(backend: MemoryBackend) -> Self {
        Self {
            kind: MemoryKind::Persistent,
            backend,
            ..Self::default()
        }
    }

    pub fn with_backend(mut self, backend: MemoryBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_pruning_strategy(mut self, strategy: PruningStrategy) -> Self {
        self.pruning_strategy = strategy;
        self
    }

    pub fn with_auto_prune(mut self, auto_prune: bool) -> Self {
        self.auto_prune = auto_prune;
        self
    }

    pub fn with_prune_threshold(mut self, threshold: f64) -> Self {
        self.prune_threshold = threshold;
        self
    }

    pub fn with_prune_percentage(mut self, percentage: f64) -> Self {
        self.prune_percentage = percentage;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = limit;
        self
    }
}

/// Resolve the session id for a run: explicit variable binding first, then
/// the chain-level option, then the literal default.
pub fn resolve_session_id(variables: &Variables, chain_session: Option<&str>) -> String {
    variables
        .get_str("session_id")
        .map(str::to_string)
        .or_else(|| chain_session.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string())
}

/// Per-run handle binding a chain's memory configuration to one backend.
///
/// All operations for a session observe the same store for the lifetime of
/// the chain instance; the engine resolves the backend once and hands the
/// same `Arc` to every run.
#[derive(Debug, Clone)]
pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    config: MemoryConfig,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn MemoryStore>, config: MemoryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// Formatted transcript to append to the system message, or `None` when
    /// this memory kind does not inject context or no entries exist.
    ///
    /// The newest-first stored list is cut to `context_limit` and reversed
    /// so the transcript reads chronologically.
    pub async fn context_block(&self, session_id: &str) -> ChainResult<Option<String>> {
        if !self.config.kind.injects_context() {
            return Ok(None);
        }

        let entries = match self.store.retrieve(session_id).await {
            Ok(entries) => entries,
            Err(ChainError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        if entries.is_empty() {
            return Ok(None);
        }

        let mut recent: Vec<&MemoryEntry> =
            entries.iter().take(self.config.context_limit).collect();
        recent.reverse();

        let block = recent
            .iter()
            .map(|entry| entry.format_line())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Some(block))
    }

    /// Store both turns of an LLM exchange under the session, newest first.
    pub async fn record_exchange(
        &self,
        session_id: &str,
        user_content: &str,
        assistant_content: &str,
    ) -> ChainResult<()> {
        let entries = vec![
            MemoryEntry::assistant(assistant_content),
            MemoryEntry::user(user_content),
        ];

        // Buffer memory keeps only the most recent entries per session.
        let bound = match self.config.kind {
            MemoryKind::Buffer => Some(self.config.max_entries),
            _ => None,
        };

        self.store.prepend(session_id, entries, bound).await?;
        debug!(session_id, "recorded memory exchange");

        if self.config.auto_prune {
            self.maybe_prune().await?;
        }
        Ok(())
    }

    pub async fn clear_session(&self, session_id: &str) -> ChainResult<()> {
        self.store.delete(session_id).await
    }

    /// Prune sessions when occupancy exceeds the configured threshold.
    async fn maybe_prune(&self) -> ChainResult<()> {
        if self.config.max_entries == 0 {
            return Ok(());
        }

        let size = self.store.size().await?;
        let threshold =
            (self.config.max_entries as f64 * self.config.prune_threshold).ceil() as usize;
        if size <= threshold {
            return Ok(());
        }

        let prune_count = ((self.config.max_entries as f64 * self.config.prune_percentage).ceil()
            as usize)
            .max(1);
        let cutoff = self.config.ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .map(|age| Utc::now() - age)
        });

        let victims = self
            .store
            .find_keys_for_pruning(self.config.pruning_strategy, prune_count, cutoff)
            .await?;

        if victims.is_empty() {
            warn!(size, threshold, "memory over threshold but nothing prunable");
            return Ok(());
        }

        debug!(
            count = victims.len(),
            strategy = ?self.config.pruning_strategy,
            "pruning memory sessions"
        );
        for key in victims {
            self.store.delete(&key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::infrastructure::memory::InMemoryStore;
    use serde_json::json;

    #[test]
    fn test_session_id_prefers_variables() {
        let vars = Variables::new().with("session_id", "from-vars");
        assert_eq!(resolve_session_id(&vars, Some("from-chain")), "from-vars");
    }

    #[test]
    fn test_session_id_falls_back_to_chain_then_default() {
        let vars = Variables::new();
        assert_eq!(resolve_session_id(&vars, Some("from-chain")), "from-chain");
        assert_eq!(resolve_session_id(&vars, None), DEFAULT_SESSION_ID);
    }

    #[test]
    fn test_session_id_ignores_non_string_binding() {
        let vars = Variables::new().with("session_id", json!(42));
        assert_eq!(resolve_session_id(&vars, None), DEFAULT_SESSION_ID);
    }

    #[test]
    fn test_kind_context_injection() {
        assert!(MemoryKind::Conversation.injects_context());
        assert!(MemoryKind::Persistent.injects_context());
        assert!(!MemoryKind::Buffer.injects_context());
    }

    #[tokio::test]
    async fn test_record_exchange_prunes_lru_sessions_over_threshold() {
        let store = Arc::new(InMemoryStore::new());
        // Threshold ceil(4 * 0.9) = 4, so the fifth session tips the store
        // over and ceil(4 * 0.5) = 2 sessions get evicted.
        let config = MemoryConfig::conversation()
            .with_max_entries(4)
            .with_prune_threshold(0.9)
            .with_prune_percentage(0.5);
        let manager = MemoryManager::new(store.clone(), config);

        for i in 0..4 {
            manager
                .record_exchange(&format!("s{i}"), "hi", "hello")
                .await
                .unwrap();
        }
        assert_eq!(store.size().await.unwrap(), 4);

        // Touch s0 and s1 so the least recently accessed sessions are
        // unambiguously s2 and s3.
        store.retrieve("s0").await.unwrap();
        store.retrieve("s1").await.unwrap();

        manager.record_exchange("s4", "hi", "hello").await.unwrap();

        assert_eq!(store.size().await.unwrap(), 3);
        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["s0", "s1", "s4"]);
    }

    #[tokio::test]
    async fn test_record_exchange_skips_pruning_when_disabled() {
        let store = Arc::new(InMemoryStore::new());
        let config = MemoryConfig::conversation()
            .with_max_entries(2)
            .with_auto_prune(false);
        let manager = MemoryManager::new(store.clone(), config);

        for i in 0..5 {
            manager
                .record_exchange(&format!("s{i}"), "hi", "hello")
                .await
                .unwrap();
        }

        assert_eq!(store.size().await.unwrap(), 5);
    }

    #[test]
    fn test_config_builders() {
        let config = MemoryConfig::buffer(50)
            .with_pruning_strategy(PruningStrategy::Lfu)
            .with_prune_threshold(0.8);

        assert_eq!(config.kind, MemoryKind::Buffer);
        assert_eq!(config.max_entries, 50);
        assert_eq!(config.pruning_strategy, PruningStrategy::Lfu);
        assert_eq!(config.prune_threshold, 0.8);
    }
}
