//! Session-scoped memory: entries, the store contract, eviction, and the
//! per-chain manager.

mod entry;
mod eviction;
mod manager;
mod store;

pub use entry::MemoryEntry;
pub use eviction::{select_keys, PruningStrategy};
pub use manager::{
    resolve_session_id, MemoryBackend, MemoryConfig, MemoryKind, MemoryManager,
    DEFAULT_SESSION_ID,
};
pub use store::{AccessStats, MemoryStore};
