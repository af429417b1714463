//! Level-gated key-value store
//!
//! Lets independent writers share one persisted namespace without a
//! higher-priority value being clobbered by a lower-priority one. Every
//! accepted write records its level next to the value; a later write to the
//! same key is accepted only at an equal or higher level.
//!
//! ```ignore
//! use gatekv::{BackendEditor, Config, KeyValueBackend, LevelGatedStore};
//!
//! let store = LevelGatedStore::open("/var/lib/app", "settings", Config::mobile(), 0)?;
//!
//! store.save_string_at("endpoint", "https://default.example", 0)?;  // local default
//! store.save_string_at("endpoint", "https://pushed.example", 2)?;   // server config wins
//! store.save_string_at("endpoint", "https://stale.example", 1)?;    // dropped: 1 < 2
//!
//! let mut editor = store.edit_at(2)?;
//! editor.put_int("retries", 5).put_bool("metrics", false);
//! editor.commit()?;
//! ```
//!
//! # Architecture
//!
//! The store wraps two [`KeyValueBackend`]s: one for values, one mapping each
//! key to the level it was last written at. Reads only touch the value
//! backend. Removal is never gated.

pub mod editor;
pub mod error;
pub mod store;

pub use editor::GatedEditor;
pub use error::{GateError, GateResult};
pub use store::{Level, LevelGatedStore, LEVELS_SUFFIX, MAX_LEVEL};

pub use gatekv_core::{
    BackendEditor, Config, FileBackend, KeyValueBackend, KvError, KvResult, MemoryBackend, SyncMode, Value,
};
