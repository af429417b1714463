//! Compaction: collapse the WAL into a single snapshot record
//!
//! Applied batches accumulate overwritten values and removals. Compaction
//! writes the live state as one `Snapshot` record into a fresh segment and
//! then deletes every older segment.
//!
//! Crash safety:
//! - Crash before the snapshot is synced: old segments are intact, the torn
//!   snapshot is discarded on replay
//! - Crash after the snapshot is synced but before old segments are gone:
//!   replay applies the old segments, then the snapshot resets state to the
//!   same live set

use std::fs;

use hashbrown::HashMap;
use tracing::{info, warn};

use crate::error::{KvError, KvResult};
use crate::format::{BatchOp, RecordKind};
use crate::platform_durability::sync_dir;
use crate::value::Value;
use crate::wal::{list_segments, WalWriter};

/// Result of a compaction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Live entries written into the snapshot
    pub live_entries: usize,
    /// Segments deleted
    pub removed_segments: usize,
    /// WAL bytes before compaction
    pub original_bytes: u64,
    /// WAL bytes after compaction
    pub compacted_bytes: u64,
}

impl CompactionResult {
    /// Space saved in bytes.
    pub fn bytes_saved(&self) -> u64 {
        self.original_bytes.saturating_sub(self.compacted_bytes)
    }
}

/// Total size of all segments in the writer's directory.
pub fn wal_size(wal: &WalWriter) -> KvResult<u64> {
    let mut total = 0;
    for (_, path) in list_segments(wal.wal_dir())? {
        total += fs::metadata(&path)
            .map_err(|e| KvError::io_at(&path, e, "Failed to stat WAL segment"))?
            .len();
    }
    Ok(total)
}

/// Rewrite the WAL as one snapshot of `live`.
///
/// The caller must hold the WAL lock and keep `live` from changing for the
/// duration, otherwise batches written concurrently could land in a segment
/// this call deletes.
pub fn compact_wal(wal: &mut WalWriter, live: &HashMap<String, Value>) -> KvResult<CompactionResult> {
    let original_bytes = wal_size(wal)?;

    // sorted so identical state always produces an identical snapshot
    let mut ops: Vec<BatchOp> = live
        .iter()
        .map(|(key, value)| BatchOp::Put { key: key.clone(), value: value.clone() })
        .collect();
    ops.sort_by(|a, b| a.key().cmp(b.key()));

    let snapshot_seq = wal.rotate()?;
    let compacted_bytes = wal.append(RecordKind::Snapshot, &ops, true)?;
    sync_dir(wal.wal_dir()).map_err(|e| KvError::io_at(wal.wal_dir(), e, "Failed to sync WAL directory"))?;

    let mut removed_segments = 0;
    for (seq, path) in list_segments(wal.wal_dir())? {
        if seq >= snapshot_seq {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed_segments += 1,
            // a leftover segment only costs replay time; the snapshot still wins
            Err(e) => warn!(path = %path.display(), error = %e, "failed to delete compacted WAL segment"),
        }
    }
    sync_dir(wal.wal_dir()).map_err(|e| KvError::io_at(wal.wal_dir(), e, "Failed to sync WAL directory"))?;

    let result = CompactionResult {
        live_entries: ops.len(),
        removed_segments,
        original_bytes,
        compacted_bytes,
    };
    info!(
        dir = %wal.wal_dir().display(),
        live_entries = result.live_entries,
        removed_segments = result.removed_segments,
        bytes_saved = result.bytes_saved(),
        "compacted WAL"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::wal::WalReader;
    use tempfile::TempDir;

    fn put(key: &str, value: impl Into<Value>) -> BatchOp {
        BatchOp::Put { key: key.to_string(), value: value.into() }
    }

    #[test]
    fn test_compaction_keeps_only_live_state() {
        let temp = TempDir::new().unwrap();
        let mut wal = WalWriter::new(temp.path(), Config::default()).unwrap();

        for i in 0..50 {
            wal.append(RecordKind::Batch, &[put("counter", i)], false).unwrap();
        }
        wal.append(RecordKind::Batch, &[put("gone", true), BatchOp::Remove { key: "gone".into() }], false).unwrap();

        let mut live = HashMap::new();
        live.insert("counter".to_string(), Value::Int(49));

        let result = compact_wal(&mut wal, &live).unwrap();
        assert_eq!(result.live_entries, 1);
        assert_eq!(result.removed_segments, 1);
        assert!(result.bytes_saved() > 0);

        let recovery = WalReader::new(temp.path()).recover().unwrap();
        assert_eq!(recovery.segments, 1);
        assert_eq!(recovery.records.len(), 1);
        assert_eq!(recovery.records[0].kind, RecordKind::Snapshot);
        assert_eq!(recovery.records[0].ops, vec![put("counter", 49)]);
    }

    #[test]
    fn test_compaction_of_empty_state() {
        let temp = TempDir::new().unwrap();
        let mut wal = WalWriter::new(temp.path(), Config::default()).unwrap();
        wal.append(RecordKind::Batch, &[BatchOp::Remove { key: "x".into() }], true).unwrap();

        let result = compact_wal(&mut wal, &HashMap::new()).unwrap();
        assert_eq!(result.live_entries, 0);

        let recovery = WalReader::new(temp.path()).recover().unwrap();
        assert_eq!(recovery.records.len(), 1);
        assert!(recovery.records[0].ops.is_empty());
    }

    #[test]
    fn test_appends_after_compaction_survive() {
        let temp = TempDir::new().unwrap();
        let mut wal = WalWriter::new(temp.path(), Config::default()).unwrap();
        wal.append(RecordKind::Batch, &[put("a", 1)], true).unwrap();

        let mut live = HashMap::new();
        live.insert("a".to_string(), Value::Int(1));
        compact_wal(&mut wal, &live).unwrap();
        wal.append(RecordKind::Batch, &[put("b", 2)], true).unwrap();

        let recovery = WalReader::new(temp.path()).recover().unwrap();
        assert_eq!(recovery.records.len(), 2);
        assert_eq!(recovery.records[1].ops, vec![put("b", 2)]);
    }
}
