//! The typed key-value backend contract
//!
//! A backend is a synchronous, typed key-value store. Reads never fail:
//! typed getters fall back to the caller's default when the key is absent or
//! holds a different variant. All mutation goes through an editor that
//! stages operations and publishes them on `apply` (fire-and-forget) or
//! `commit` (blocking, returns the backend's error).
//!
//! ```ignore
//! let mut editor = backend.edit();
//! editor.put_string("server.url", "https://example.org").put_int("retries", 3);
//! editor.commit()?;
//! ```

use std::collections::BTreeMap;

use crate::error::KvResult;
use crate::value::Value;

/// A batch of staged mutations against one backend.
///
/// Operations accumulate in call order and are invisible to reads until the
/// editor is finished. `apply` and `commit` consume the editor, so an editor
/// cannot be used again once finished.
pub trait BackendEditor: Send {
    /// Stage a put of `value` under `key`.
    fn put(&mut self, key: &str, value: Value) -> &mut Self;

    /// Stage removal of `key`.
    fn remove(&mut self, key: &str) -> &mut Self;

    /// Publish the batch without waiting for durability. Failures are logged
    /// by the backend, never returned.
    fn apply(self);

    /// Publish the batch and block until it is durable or has failed.
    fn commit(self) -> KvResult<()>;

    fn put_string(&mut self, key: &str, value: impl Into<String>) -> &mut Self
    where
        Self: Sized,
    {
        self.put(key, Value::String(value.into()))
    }

    fn put_int(&mut self, key: &str, value: i32) -> &mut Self
    where
        Self: Sized,
    {
        self.put(key, Value::Int(value))
    }

    fn put_float(&mut self, key: &str, value: f32) -> &mut Self
    where
        Self: Sized,
    {
        self.put(key, Value::Float(value))
    }

    fn put_bool(&mut self, key: &str, value: bool) -> &mut Self
    where
        Self: Sized,
    {
        self.put(key, Value::Bool(value))
    }

    fn put_string_array<I, S>(&mut self, key: &str, values: I) -> &mut Self
    where
        Self: Sized,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.put(key, Value::StringArray(values.into_iter().map(Into::into).collect()))
    }
}

/// A typed key-value store.
pub trait KeyValueBackend: Send + Sync {
    type Editor: BackendEditor;

    /// Current value of `key`, if any.
    fn get(&self, key: &str) -> Option<Value>;

    /// Snapshot of every entry.
    fn get_all(&self) -> BTreeMap<String, Value>;

    /// Start a new batch.
    fn edit(&self) -> Self::Editor;

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(v)) => v,
            _ => default.to_string(),
        }
    }

    fn get_int(&self, key: &str, default: i32) -> i32 {
        self.get(key).and_then(|v| v.as_int()).unwrap_or(default)
    }

    fn get_float(&self, key: &str, default: f32) -> f32 {
        self.get(key).and_then(|v| v.as_float()).unwrap_or(default)
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn get_string_array(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.get(key) {
            Some(Value::StringArray(v)) => v,
            _ => default.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn save_string(&self, key: &str, value: impl Into<String>)
    where
        Self: Sized,
    {
        let mut editor = self.edit();
        editor.put_string(key, value);
        editor.apply();
    }

    fn save_int(&self, key: &str, value: i32)
    where
        Self: Sized,
    {
        let mut editor = self.edit();
        editor.put_int(key, value);
        editor.apply();
    }

    fn save_float(&self, key: &str, value: f32)
    where
        Self: Sized,
    {
        let mut editor = self.edit();
        editor.put_float(key, value);
        editor.apply();
    }

    fn save_bool(&self, key: &str, value: bool)
    where
        Self: Sized,
    {
        let mut editor = self.edit();
        editor.put_bool(key, value);
        editor.apply();
    }

    fn save_string_array<I, S>(&self, key: &str, values: I)
    where
        Self: Sized,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut editor = self.edit();
        editor.put_string_array(key, values);
        editor.apply();
    }

    /// Remove `key` in a batch of its own.
    fn remove(&self, key: &str) {
        let mut editor = self.edit();
        editor.remove(key);
        editor.apply();
    }
}
