//! In-memory backend
//!
//! Nothing is persisted. `apply` and `commit` behave identically: the whole
//! batch is applied under one write lock, so readers see all of it or none.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::error;

use crate::backend::{BackendEditor, KeyValueBackend};
use crate::error::KvResult;
use crate::format::{validate_key, BatchOp};
use crate::value::Value;

type Table = Arc<RwLock<HashMap<String, Value>>>;

/// Ephemeral backend. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Table,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KeyValueBackend for MemoryBackend {
    type Editor = MemoryEditor;

    fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    fn get_all(&self) -> BTreeMap<String, Value> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn edit(&self) -> MemoryEditor {
        MemoryEditor { data: Arc::clone(&self.data), ops: Vec::new() }
    }
}

/// Editor for [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryEditor {
    data: Table,
    ops: Vec<BatchOp>,
}

impl MemoryEditor {
    fn publish(self) -> KvResult<()> {
        for op in &self.ops {
            validate_key(op.key(), usize::MAX)?;
        }
        if self.ops.is_empty() {
            return Ok(());
        }

        let mut data = self.data.write();
        for op in self.ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Remove { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

impl BackendEditor for MemoryEditor {
    fn put(&mut self, key: &str, value: Value) -> &mut Self {
        self.ops.push(BatchOp::Put { key: key.to_string(), value });
        self
    }

    fn remove(&mut self, key: &str) -> &mut Self {
        self.ops.push(BatchOp::Remove { key: key.to_string() });
        self
    }

    fn apply(self) {
        if let Err(e) = self.publish() {
            error!(error = %e, "dropping in-memory batch");
        }
    }

    fn commit(self) -> KvResult<()> {
        self.publish()
    }
}
