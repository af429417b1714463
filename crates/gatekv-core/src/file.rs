//! File-backed backend: RAM table + write-ahead log.
//!
//! **Read path**: RAM only (RwLock read)
//! **Write path**: one WAL record per editor batch, then RAM
//! **Background**: optional flusher syncs batches published with `apply`
//!
//! Each named store lives in its own directory, `<root>/<name>/`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::backend::{BackendEditor, KeyValueBackend};
use crate::compaction::{compact_wal, wal_size, CompactionResult};
use crate::config::Config;
use crate::error::{KvError, KvResult};
use crate::flusher::{start_flusher, sync_pending, FlushHandle, SyncTracker};
use crate::format::{BatchOp, RecordKind};
use crate::value::Value;
use crate::wal::{WalReader, WalWriter};

struct FileInner {
    name: String,
    /// RAM working set
    data: RwLock<HashMap<String, Value>>,
    /// Single writer; shared with the flusher thread
    wal: Arc<Mutex<WalWriter>>,
    tracker: Arc<SyncTracker>,
    flusher: Mutex<Option<FlushHandle>>,
    path: PathBuf,
    config: Config,
}

impl Drop for FileInner {
    fn drop(&mut self) {
        if let Some(handle) = self.flusher.lock().take() {
            handle.shutdown();
        }
        if let Err(e) = sync_pending(&self.wal, &self.tracker) {
            error!(store = %self.name, error = %e, "final WAL sync failed");
        }
    }
}

/// Persistent backend. Clones are handles to the same store.
#[derive(Clone)]
pub struct FileBackend {
    inner: Arc<FileInner>,
}

impl FileBackend {
    /// Open or create the store `name` under `root`.
    ///
    /// Replays the WAL into RAM, cuts off a torn tail left by a crash, and
    /// compacts when the WAL has outgrown `compaction_trigger_bytes`.
    pub fn open<P: AsRef<Path>>(root: P, name: &str, config: Config) -> KvResult<Self> {
        config.validate()?;
        if name.is_empty() || name.contains(|c: char| c == '/' || c == '\\') {
            return Err(KvError::InvalidConfig(format!("invalid store name: {:?}", name)));
        }

        let path = root.as_ref().join(name);
        std::fs::create_dir_all(&path)
            .map_err(|e| KvError::io_at(&path, e, "Failed to create store directory"))?;

        let recovery = WalReader::new(&path).recover()?;
        if let Some(tail) = &recovery.torn_tail {
            tail.truncate()?;
        }

        let mut data = HashMap::new();
        for record in recovery.records {
            if record.kind == RecordKind::Snapshot {
                data.clear();
            }
            for op in record.ops {
                match op {
                    BatchOp::Put { key, value } => {
                        data.insert(key, value);
                    }
                    BatchOp::Remove { key } => {
                        data.remove(&key);
                    }
                }
            }
        }

        if !data.is_empty() || recovery.skipped > 0 {
            info!(
                store = name,
                entries = data.len(),
                segments = recovery.segments,
                skipped = recovery.skipped,
                "recovered store from WAL"
            );
        }

        let mut wal = WalWriter::new(&path, config.clone())?;
        if recovery.wal_bytes > config.compaction_trigger_bytes {
            compact_wal(&mut wal, &data)?;
        }

        Ok(Self {
            inner: Arc::new(FileInner {
                name: name.to_string(),
                data: RwLock::new(data),
                wal: Arc::new(Mutex::new(wal)),
                tracker: Arc::new(SyncTracker::new()),
                flusher: Mutex::new(None),
                path,
                config,
            }),
        })
    }

    /// Start the background flusher. Without it, applied batches become
    /// durable on [`FileBackend::sync`], on the next commit, or when the last
    /// handle is dropped.
    pub fn start_flusher(&self) -> KvResult<()> {
        let mut flusher = self.inner.flusher.lock();
        if flusher.is_some() {
            return Ok(());
        }
        *flusher = Some(start_flusher(
            &self.inner.name,
            Arc::clone(&self.inner.wal),
            Arc::clone(&self.inner.tracker),
            self.inner.config.flush_cadence,
        )?);
        Ok(())
    }

    pub fn stop_flusher(&self) {
        if let Some(handle) = self.inner.flusher.lock().take() {
            handle.shutdown();
        }
    }

    /// Make every applied batch durable now.
    pub fn sync(&self) -> KvResult<()> {
        sync_pending(&self.inner.wal, &self.inner.tracker).map(|_| ())
    }

    /// Rewrite the WAL as a single snapshot of the current state.
    pub fn compact(&self) -> KvResult<CompactionResult> {
        let mut wal = self.inner.wal.lock();
        // writers publish to RAM while holding the WAL lock, so the table is stable here
        let data = self.inner.data.read();
        let result = compact_wal(&mut wal, &data)?;
        // the snapshot was synced, which covers anything still pending
        let pending = self.inner.tracker.take_pending();
        drop(data);
        drop(wal);
        self.inner.tracker.mark_synced(pending);
        Ok(result)
    }

    /// Current total size of the WAL in bytes.
    pub fn wal_bytes(&self) -> KvResult<u64> {
        wal_size(&self.inner.wal.lock())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Store directory.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn len(&self) -> usize {
        self.inner.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.read().is_empty()
    }

    /// Applied batches not yet synced.
    pub fn pending_sync(&self) -> u64 {
        self.inner.tracker.pending()
    }

    /// Applied batches made durable since open.
    pub fn total_synced(&self) -> u64 {
        self.inner.tracker.total_synced()
    }

    /// Flusher cycles completed since open.
    pub fn flush_cycles(&self) -> u64 {
        self.inner.tracker.total_cycles()
    }

    /// Write `ops` as one record, then publish them to RAM.
    ///
    /// If the WAL append fails, RAM is never modified.
    fn publish(&self, ops: Vec<BatchOp>, durable: bool) -> KvResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut wal = self.inner.wal.lock();
        wal.append(RecordKind::Batch, &ops, durable)?;

        {
            let mut data = self.inner.data.write();
            for op in ops {
                match op {
                    BatchOp::Put { key, value } => {
                        data.insert(key, value);
                    }
                    BatchOp::Remove { key } => {
                        data.remove(&key);
                    }
                }
            }
        }
        drop(wal);

        if durable {
            // the commit's sync also covered earlier applied batches
            let pending = self.inner.tracker.take_pending();
            self.inner.tracker.mark_synced(pending);
        } else {
            self.inner.tracker.mark_pending();
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("name", &self.inner.name)
            .field("path", &self.inner.path)
            .field("entries", &self.len())
            .finish()
    }
}

impl KeyValueBackend for FileBackend {
    type Editor = FileEditor;

    fn get(&self, key: &str) -> Option<Value> {
        self.inner.data.read().get(key).cloned()
    }

    fn contains(&self, key: &str) -> bool {
        self.inner.data.read().contains_key(key)
    }

    fn get_all(&self) -> BTreeMap<String, Value> {
        self.inner
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn edit(&self) -> FileEditor {
        FileEditor { backend: self.clone(), ops: Vec::new() }
    }
}

/// Editor for [`FileBackend`]. The whole batch becomes one WAL record.
pub struct FileEditor {
    backend: FileBackend,
    ops: Vec<BatchOp>,
}

impl BackendEditor for FileEditor {
    fn put(&mut self, key: &str, value: Value) -> &mut Self {
        self.ops.push(BatchOp::Put { key: key.to_string(), value });
        self
    }

    fn remove(&mut self, key: &str) -> &mut Self {
        self.ops.push(BatchOp::Remove { key: key.to_string() });
        self
    }

    fn apply(self) {
        let count = self.ops.len();
        if let Err(e) = self.backend.publish(self.ops, false) {
            error!(store = %self.backend.name(), ops = count, error = %e, "failed to apply batch");
        }
    }

    fn commit(self) -> KvResult<()> {
        self.backend.publish(self.ops, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_backend(dir: &TempDir) -> FileBackend {
        FileBackend::open(dir.path(), "prefs", Config::default()).unwrap()
    }

    #[test]
    fn test_open_empty() {
        let dir = TempDir::new().unwrap();
        let backend = test_backend(&dir);
        assert!(backend.is_empty());
        assert_eq!(backend.pending_sync(), 0);
        assert_eq!(backend.path(), dir.path().join("prefs"));
    }

    #[test]
    fn test_commit_then_get() {
        let dir = TempDir::new().unwrap();
        let backend = test_backend(&dir);

        let mut editor = backend.edit();
        editor.put_string("hello", "world").put_float("ratio", 0.5);
        editor.commit().unwrap();

        assert_eq!(backend.get_string("hello", ""), "world");
        assert_eq!(backend.get_float("ratio", 0.0), 0.5);
        assert_eq!(backend.pending_sync(), 0);
    }

    #[test]
    fn test_apply_visible_immediately_and_pending() {
        let dir = TempDir::new().unwrap();
        let backend = test_backend(&dir);

        backend.save_int("a", 1);
        backend.save_int("b", 2);
        assert_eq!(backend.get_int("a", 0), 1);
        assert_eq!(backend.pending_sync(), 2);

        backend.sync().unwrap();
        assert_eq!(backend.pending_sync(), 0);
        assert_eq!(backend.total_synced(), 2);
    }

    #[test]
    fn test_commit_covers_earlier_applies() {
        let dir = TempDir::new().unwrap();
        let backend = test_backend(&dir);

        backend.save_bool("applied", true);
        let mut editor = backend.edit();
        editor.put_bool("committed", true);
        editor.commit().unwrap();

        assert_eq!(backend.pending_sync(), 0);
        assert_eq!(backend.total_synced(), 1);
    }

    #[test]
    fn test_empty_editor_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let backend = test_backend(&dir);
        backend.edit().commit().unwrap();
        backend.edit().apply();
        assert_eq!(backend.wal_bytes().unwrap(), 0);
    }

    #[test]
    fn test_failed_commit_leaves_ram_untouched() {
        let dir = TempDir::new().unwrap();
        let backend = test_backend(&dir);

        let mut editor = backend.edit();
        editor.put_int("fine", 1).put_int("", 2);
        assert!(matches!(editor.commit(), Err(KvError::EmptyKey)));
        assert!(!backend.contains("fine"));
        assert_eq!(backend.wal_bytes().unwrap(), 0);
    }

    #[test]
    fn test_crash_recovery() {
        let dir = TempDir::new().unwrap();
        {
            let backend = test_backend(&dir);
            backend.save_string("survive1", "yes");
            backend.save_string_array("survive2", ["also", "yes"]);
            backend.save_string("doomed", "temp");
            backend.remove("doomed");
        }
        {
            let backend = test_backend(&dir);
            assert_eq!(backend.get_string("survive1", ""), "yes");
            assert_eq!(backend.get_string_array("survive2", &[]), vec!["also", "yes"]);
            assert!(!backend.contains("doomed"));
            assert_eq!(backend.len(), 2);
        }
    }

    #[test]
    fn test_torn_batch_is_discarded_whole() {
        let dir = TempDir::new().unwrap();
        {
            let backend = test_backend(&dir);
            backend.save_int("before", 1);
            let mut editor = backend.edit();
            editor.put_int("x", 1).put_int("y", 2);
            editor.commit().unwrap();
        }

        // chop the last bytes off the second record
        let segment = crate::wal::list_segments(&dir.path().join("prefs")).unwrap().pop().unwrap().1;
        let len = std::fs::metadata(&segment).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&segment).unwrap();
        file.set_len(len - 2).unwrap();
        drop(file);

        let backend = test_backend(&dir);
        assert_eq!(backend.get_int("before", 0), 1);
        assert!(!backend.contains("x"));
        assert!(!backend.contains("y"));

        // the torn tail was cut, so new writes replay after restart
        backend.save_int("after", 3);
        drop(backend);
        let backend = test_backend(&dir);
        assert_eq!(backend.get_int("after", 0), 3);
    }

    #[test]
    fn test_damaged_record_length_keeps_later_records() {
        let dir = TempDir::new().unwrap();
        {
            let backend = test_backend(&dir);
            for key in ["a", "b", "c"] {
                let mut editor = backend.edit();
                editor.put_string(key, key);
                editor.commit().unwrap();
            }
        }

        // length of the first record now points far past end of file
        let segment = crate::wal::list_segments(&dir.path().join("prefs")).unwrap().pop().unwrap().1;
        let mut data = std::fs::read(&segment).unwrap();
        let len_before = data.len() as u64;
        data[4..8].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
        std::fs::write(&segment, data).unwrap();

        let backend = test_backend(&dir);
        assert!(!backend.contains("a"));
        assert_eq!(backend.get_string("b", ""), "b");
        assert_eq!(backend.get_string("c", ""), "c");
        assert_eq!(std::fs::metadata(&segment).unwrap().len(), len_before);

        // still intact after another restart
        drop(backend);
        let backend = test_backend(&dir);
        assert_eq!(backend.len(), 2);
    }

    #[test]
    fn test_stores_are_isolated_by_name() {
        let dir = TempDir::new().unwrap();
        let values = FileBackend::open(dir.path(), "values", Config::default()).unwrap();
        let levels = FileBackend::open(dir.path(), "values.levels", Config::default()).unwrap();

        values.save_string("k", "v");
        levels.save_int("k", 4);

        assert_eq!(values.get_string("k", ""), "v");
        assert_eq!(levels.get_int("k", 0), 4);
        assert_eq!(values.get_int("k", -1), -1);
    }

    #[test]
    fn test_invalid_name_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(FileBackend::open(dir.path(), "", Config::default()).is_err());
        assert!(FileBackend::open(dir.path(), "a/b", Config::default()).is_err());
    }

    #[test]
    fn test_compact_preserves_state() {
        let dir = TempDir::new().unwrap();
        let backend = test_backend(&dir);
        for i in 0..100 {
            backend.save_int("counter", i);
        }
        backend.save_string("keep", "me");
        backend.remove("counter");

        let before = backend.wal_bytes().unwrap();
        let result = backend.compact().unwrap();
        assert_eq!(result.live_entries, 1);
        assert!(backend.wal_bytes().unwrap() < before);
        assert_eq!(backend.pending_sync(), 0);
        drop(backend);

        let backend = test_backend(&dir);
        assert_eq!(backend.get_string("keep", ""), "me");
        assert!(!backend.contains("counter"));
    }

    #[test]
    fn test_auto_compaction_on_open() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::embedded();
        config.compaction_trigger_bytes = 4096;
        {
            let backend = FileBackend::open(dir.path(), "small", config.clone()).unwrap();
            for i in 0..200 {
                backend.save_int("hot", i);
            }
            assert!(backend.wal_bytes().unwrap() > 4096);
        }

        let backend = FileBackend::open(dir.path(), "small", config).unwrap();
        assert_eq!(backend.get_int("hot", 0), 199);
        assert!(backend.wal_bytes().unwrap() < 4096);
    }

    #[test]
    fn test_flusher_syncs_applied_batches() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.flush_cadence = Duration::from_millis(30);

        let backend = FileBackend::open(dir.path(), "flushed", config).unwrap();
        backend.start_flusher().unwrap();
        backend.save_string("bg", "sync");

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(backend.pending_sync(), 0);
        assert!(backend.flush_cycles() >= 1);
        backend.stop_flusher();
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let dir = TempDir::new().unwrap();
        let backend = test_backend(&dir);
        for i in 0..50 {
            backend.save_int(&format!("k{}", i), i);
        }

        let mut handles = vec![];
        for _ in 0..4 {
            let b = backend.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    assert_eq!(b.get_int(&format!("k{}", i), -1), i);
                }
            }));
        }
        let writer = backend.clone();
        handles.push(std::thread::spawn(move || {
            for i in 50..100 {
                writer.save_int(&format!("k{}", i), i);
            }
        }));
        for h in handles { h.join().unwrap(); }
        assert_eq!(backend.len(), 100);
    }
}
