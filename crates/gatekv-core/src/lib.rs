//! gatekv core: typed key-value backends
//!
//! Defines the [`KeyValueBackend`] contract that the level-gated store in the
//! `gatekv` crate is built on, plus two implementations:
//!
//! - [`MemoryBackend`]: ephemeral, for tests and scratch state
//! - [`FileBackend`]: RAM-first store persisted through a write-ahead log
//!
//! # File backend architecture
//!
//! - **Read path**: served from a RAM hash table
//! - **Write path**: one checksummed WAL record per editor batch, then RAM
//! - **Flusher**: optional background thread that syncs applied batches
//! - **Compaction**: collapses the WAL into one snapshot record

pub mod backend;
pub mod compaction;
pub mod config;
pub mod error;
pub mod file;
pub mod flusher;
pub mod format;
pub mod memory;
pub mod platform_durability;
pub mod value;
pub mod wal;

// Re-export key types for convenience
pub use backend::{BackendEditor, KeyValueBackend};
pub use compaction::CompactionResult;
pub use config::Config;
pub use error::{KvError, KvResult};
pub use file::{FileBackend, FileEditor};
pub use format::BatchOp;
pub use memory::{MemoryBackend, MemoryEditor};
pub use platform_durability::SyncMode;
pub use value::Value;
