//! Memory store backends: in-process shared table, JSON file, SQLite.

mod file;
mod in_memory;
mod sqlite;

pub use file::FileStore;
pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
