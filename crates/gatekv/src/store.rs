//! `LevelGatedStore`: write-priority arbitration over two backends.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use gatekv_core::{BackendEditor, Config, FileBackend, KeyValueBackend, KvError, KvResult, Value};

use crate::editor::GatedEditor;
use crate::error::{GateError, GateResult};

/// Write priority. Higher or equal wins over what is stored.
pub type Level = u32;

/// Highest level that can be recorded in the level backend.
pub const MAX_LEVEL: Level = i32::MAX as Level;

/// Suffix of the level namespace next to a named value namespace.
pub const LEVELS_SUFFIX: &str = ".levels";

pub(crate) struct Backends<V, L> {
    pub(crate) values: V,
    pub(crate) levels: L,
}

fn check_level(level: Level) -> GateResult<Level> {
    if level > MAX_LEVEL {
        return Err(GateError::InvalidLevel { level, max: MAX_LEVEL });
    }
    Ok(level)
}

/// A key-value store where each key remembers the level of its last accepted
/// write, and lower-level writes to it are silently dropped.
///
/// Reads are never gated and go straight to the value backend. Removal is
/// never gated either: it deletes the value and its level, after which the
/// key accepts writes at any level again.
///
/// The store does no locking of its own. Two editors racing on the same key
/// from different threads each arbitrate against whatever level was
/// published when their put ran.
pub struct LevelGatedStore<V, L> {
    backends: Arc<Backends<V, L>>,
    default_level: Level,
}

impl<V: KeyValueBackend, L: KeyValueBackend> LevelGatedStore<V, L> {
    /// Wrap a value backend and a level backend. `default_level` is used by
    /// [`KeyValueBackend::edit`] and the plain `save_*` helpers.
    pub fn new(values: V, levels: L, default_level: Level) -> GateResult<Self> {
        Ok(Self {
            backends: Arc::new(Backends { values, levels }),
            default_level: check_level(default_level)?,
        })
    }

    pub fn default_level(&self) -> Level {
        self.default_level
    }

    pub fn values(&self) -> &V {
        &self.backends.values
    }

    pub fn levels(&self) -> &L {
        &self.backends.levels
    }

    /// Start a batch whose puts are written at `level`.
    pub fn edit_at(&self, level: Level) -> GateResult<GatedEditor<V, L>> {
        Ok(GatedEditor::new(Arc::clone(&self.backends), check_level(level)?))
    }

    /// Level of the last accepted write to `key`, 0 if none.
    pub fn level_of(&self, key: &str) -> Level {
        self.backends.levels.get_int(key, 0).max(0) as Level
    }

    /// Put `value` at `level` in a batch of its own and apply it.
    pub fn save_at(&self, key: &str, value: impl Into<Value>, level: Level) -> GateResult<()> {
        let mut editor = self.edit_at(level)?;
        editor.put(key, value.into());
        editor.apply();
        Ok(())
    }

    pub fn save_string_at(&self, key: &str, value: impl Into<String>, level: Level) -> GateResult<()> {
        self.save_at(key, Value::String(value.into()), level)
    }

    pub fn save_int_at(&self, key: &str, value: i32, level: Level) -> GateResult<()> {
        self.save_at(key, value, level)
    }

    pub fn save_float_at(&self, key: &str, value: f32, level: Level) -> GateResult<()> {
        self.save_at(key, value, level)
    }

    pub fn save_bool_at(&self, key: &str, value: bool, level: Level) -> GateResult<()> {
        self.save_at(key, value, level)
    }

    pub fn save_string_array_at<I, S>(&self, key: &str, values: I, level: Level) -> GateResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: Vec<String> = values.into_iter().map(Into::into).collect();
        self.save_at(key, items, level)
    }
}

impl LevelGatedStore<FileBackend, FileBackend> {
    /// Open a file-backed store: values in `<root>/<name>/`, levels in
    /// `<root>/<name>.levels/`.
    ///
    /// `name` must not end in [`LEVELS_SUFFIX`], or its values would share a
    /// directory with the levels of another store.
    pub fn open<P: AsRef<Path>>(root: P, name: &str, config: Config, default_level: Level) -> GateResult<Self> {
        if name.ends_with(LEVELS_SUFFIX) {
            return Err(KvError::InvalidConfig(format!(
                "store name {:?} ends in reserved suffix {:?}",
                name, LEVELS_SUFFIX
            ))
            .into());
        }
        let root = root.as_ref();
        let values = FileBackend::open(root, name, config.clone())?;
        let levels = FileBackend::open(root, &format!("{}{}", name, LEVELS_SUFFIX), config)?;
        Self::new(values, levels, default_level)
    }

    /// Start background flushers for both namespaces.
    pub fn start_flusher(&self) -> KvResult<()> {
        self.backends.values.start_flusher()?;
        self.backends.levels.start_flusher()
    }

    /// Make every applied batch in both namespaces durable, values first.
    pub fn sync(&self) -> KvResult<()> {
        self.backends.values.sync()?;
        self.backends.levels.sync()
    }
}

impl<V: KeyValueBackend, L: KeyValueBackend> KeyValueBackend for LevelGatedStore<V, L> {
    type Editor = GatedEditor<V, L>;

    fn get(&self, key: &str) -> Option<Value> {
        self.backends.values.get(key)
    }

    fn contains(&self, key: &str) -> bool {
        self.backends.values.contains(key)
    }

    fn get_all(&self) -> BTreeMap<String, Value> {
        self.backends.values.get_all()
    }

    /// Editor at the store's default level.
    fn edit(&self) -> GatedEditor<V, L> {
        GatedEditor::new(Arc::clone(&self.backends), self.default_level)
    }
}

impl<V, L> Clone for LevelGatedStore<V, L> {
    fn clone(&self) -> Self {
        Self { backends: Arc::clone(&self.backends), default_level: self.default_level }
    }
}

impl<V: std::fmt::Debug, L: std::fmt::Debug> std::fmt::Debug for LevelGatedStore<V, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelGatedStore")
            .field("values", &self.backends.values)
            .field("levels", &self.backends.levels)
            .field("default_level", &self.default_level)
            .finish()
    }
}
