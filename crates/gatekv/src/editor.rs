//! The priority-aware batch editor.
//!
//! A `GatedEditor` is bound to one level for its whole life. Each put reads
//! the key's stored level from the level backend *at call time* and is
//! dropped if the editor's level is lower. Puts already staged in this editor
//! are not visible to that read: two puts to the same key in one open editor
//! both arbitrate against the level that was persisted before either ran.
//!
//! Underlying backend editors are created on first use, so an editor whose
//! puts were all rejected finishes without touching either backend.

use std::sync::Arc;

use gatekv_core::{BackendEditor, KeyValueBackend, KvResult, Value};
use tracing::trace;

use crate::store::{Backends, Level};

/// Batch of gated writes at a fixed level.
///
/// Finish it with [`BackendEditor::apply`] or [`BackendEditor::commit`];
/// both consume the editor.
pub struct GatedEditor<V: KeyValueBackend, L: KeyValueBackend> {
    backends: Arc<Backends<V, L>>,
    level: Level,
    value_editor: Option<V::Editor>,
    level_editor: Option<L::Editor>,
}

impl<V: KeyValueBackend, L: KeyValueBackend> GatedEditor<V, L> {
    pub(crate) fn new(backends: Arc<Backends<V, L>>, level: Level) -> Self {
        Self { backends, level, value_editor: None, level_editor: None }
    }

    /// The level every put in this editor is written with.
    pub fn level(&self) -> Level {
        self.level
    }

    fn value_editor(&mut self) -> &mut V::Editor {
        let backends = &self.backends;
        self.value_editor.get_or_insert_with(|| backends.values.edit())
    }

    fn level_editor(&mut self) -> &mut L::Editor {
        let backends = &self.backends;
        self.level_editor.get_or_insert_with(|| backends.levels.edit())
    }
}

impl<V: KeyValueBackend, L: KeyValueBackend> BackendEditor for GatedEditor<V, L> {
    fn put(&mut self, key: &str, value: Value) -> &mut Self {
        let stored = i64::from(self.backends.levels.get_int(key, 0));
        let requested = i64::from(self.level);

        if requested < stored {
            trace!(key, level = self.level, stored, "gated write rejected");
            return self;
        }

        self.value_editor().put(key, value);
        // one level put per accepted put; the level editor still publishes once
        if requested != stored {
            // level <= MAX_LEVEL is checked when the editor is created
            let level = self.level as i32;
            self.level_editor().put_int(key, level);
        }
        self
    }

    /// Removal is not gated: value and level go regardless of either level.
    fn remove(&mut self, key: &str) -> &mut Self {
        self.value_editor().remove(key);
        self.level_editor().remove(key);
        self
    }

    fn apply(self) {
        if let Some(editor) = self.value_editor {
            editor.apply();
        }
        if let Some(editor) = self.level_editor {
            editor.apply();
        }
    }

    /// Commits values first, then levels. If the value commit fails the
    /// level editor is dropped uncommitted and the error is returned as is.
    fn commit(self) -> KvResult<()> {
        if let Some(editor) = self.value_editor {
            editor.commit()?;
        }
        if let Some(editor) = self.level_editor {
            editor.commit()?;
        }
        Ok(())
    }
}
