//! Write-ahead log for the file backend
//!
//! Write ordering for every batch:
//! 1. Serialize the whole batch into one record (CRC32C over the payload)
//! 2. Append the record to the current segment
//! 3. For `commit`, durable-sync before returning
//! 4. Caller updates RAM only after the append succeeded
//!
//! Segments are named `wal-{seq:016x}.gkv` so lexicographic order is replay
//! order.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::Config;
use crate::error::{KvError, KvResult};
use crate::format::{deserialize_record, serialize_record, BatchOp, RecordKind, WalRecord, HEADER_SIZE, MAGIC_ARRAY};
use crate::platform_durability::{durable_sync, SyncMode};

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".gkv";

/// Path of segment `sequence` inside `wal_dir`.
pub fn segment_path(wal_dir: &Path, sequence: u64) -> PathBuf {
    wal_dir.join(format!("{}{:016x}{}", SEGMENT_PREFIX, sequence, SEGMENT_SUFFIX))
}

fn parse_segment_name(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok()
}

/// All segments in `wal_dir` as `(sequence, path)`, oldest first.
pub fn list_segments(wal_dir: &Path) -> KvResult<Vec<(u64, PathBuf)>> {
    let entries = std::fs::read_dir(wal_dir)
        .map_err(|e| KvError::io_at(wal_dir, e, "Failed to read WAL directory"))?;

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| KvError::io_at(wal_dir, e, "Failed to read directory entry"))?;
        if let Some(seq) = entry.file_name().to_str().and_then(parse_segment_name) {
            segments.push((seq, entry.path()));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

/// Appends batch records to the newest segment.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    size: u64,
    wal_dir: PathBuf,
    sequence: u64,
    config: Config,
}

impl WalWriter {
    /// Open the newest segment in `wal_dir` for appending, creating segment 0
    /// if the directory has none.
    pub fn new<P: AsRef<Path>>(wal_dir: P, config: Config) -> KvResult<Self> {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&wal_dir)
            .map_err(|e| KvError::io_at(&wal_dir, e, "Failed to create WAL directory"))?;

        let sequence = list_segments(&wal_dir)?.last().map_or(0, |(seq, _)| *seq);
        let path = segment_path(&wal_dir, sequence);
        let file = open_append(&path)?;
        let size = file
            .metadata()
            .map_err(|e| KvError::io_at(&path, e, "Failed to stat WAL file"))?
            .len();

        Ok(Self { file, path, size, wal_dir, sequence, config })
    }

    /// Append one record. With `durable` the call returns only after the
    /// record reached stable storage; otherwise it sits in the page cache
    /// until [`WalWriter::sync`].
    ///
    /// Returns the number of bytes written.
    pub fn append(&mut self, kind: RecordKind, ops: &[BatchOp], durable: bool) -> KvResult<u64> {
        let record = serialize_record(kind, ops, &self.config)?;

        if self.size > 0 && self.size + record.len() as u64 > self.config.wal_rotation_size_bytes {
            self.rotate()?;
        }

        self.file
            .write_all(&record)
            .map_err(|e| KvError::io_at(&self.path, e, "WAL write failed"))?;
        self.size += record.len() as u64;

        if durable {
            self.sync()?;
        }
        Ok(record.len() as u64)
    }

    /// Seal the current segment and continue in a fresh one.
    ///
    /// Returns the new segment's sequence number.
    pub fn rotate(&mut self) -> KvResult<u64> {
        self.sync()?;

        let sequence = self.sequence + 1;
        let path = segment_path(&self.wal_dir, sequence);
        let file = open_append(&path)?;

        self.file = file;
        self.path = path;
        self.size = 0;
        self.sequence = sequence;
        Ok(sequence)
    }

    /// Sync the current segment without writing anything.
    pub fn sync(&self) -> KvResult<()> {
        durable_sync(&self.file, self.config.sync_mode)
            .map_err(|e| KvError::io_at(&self.path, e, "WAL durable_sync failed"))
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.config.sync_mode
    }

    pub fn current_path(&self) -> &Path {
        &self.path
    }

    pub fn current_size(&self) -> u64 {
        self.size
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }
}

fn open_append(path: &Path) -> KvResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| KvError::io_at(path, e, "Failed to open WAL file"))
}

/// Incomplete record at the end of the newest segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TornTail {
    pub path: PathBuf,
    /// Length of the segment up to the last complete record
    pub valid_len: u64,
}

impl TornTail {
    /// Cut the segment back to its last complete record so new appends are
    /// not hidden behind the torn bytes on the next replay.
    pub fn truncate(&self) -> KvResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| KvError::io_at(&self.path, e, "Failed to open torn WAL segment"))?;
        file.set_len(self.valid_len)
            .map_err(|e| KvError::io_at(&self.path, e, "Failed to truncate torn WAL segment"))?;
        file.sync_all()
            .map_err(|e| KvError::io_at(&self.path, e, "Failed to sync truncated WAL segment"))
    }
}

/// Everything replay needs from the WAL directory.
#[derive(Debug, Default)]
pub struct Recovery {
    pub records: Vec<WalRecord>,
    /// Total bytes across all segments
    pub wal_bytes: u64,
    pub segments: usize,
    /// Records skipped because they failed validation
    pub skipped: usize,
    pub torn_tail: Option<TornTail>,
}

/// Reads records back for crash recovery.
pub struct WalReader {
    wal_dir: PathBuf,
}

impl WalReader {
    pub fn new<P: AsRef<Path>>(wal_dir: P) -> Self {
        Self { wal_dir: wal_dir.as_ref().to_path_buf() }
    }

    /// Recover all records from all segments in sequence order.
    ///
    /// Per segment: validate magic, length and CRC32C of each record; on
    /// corruption scan forward to the next magic. A record that runs past end
    /// of file is the crash point unless a valid record follows it.
    pub fn recover(&self) -> KvResult<Recovery> {
        let mut recovery = Recovery::default();
        if !self.wal_dir.exists() {
            return Ok(recovery);
        }

        let segments = list_segments(&self.wal_dir)?;
        let last = segments.len().saturating_sub(1);
        for (i, (_, path)) in segments.iter().enumerate() {
            let buffer = read_segment(path)?;
            recovery.wal_bytes += buffer.len() as u64;
            recovery.segments += 1;

            let valid_len = self.recover_segment(path, &buffer, &mut recovery);
            if valid_len < buffer.len() as u64 && i == last {
                recovery.torn_tail = Some(TornTail { path: path.clone(), valid_len });
            }
        }
        Ok(recovery)
    }

    /// Returns the offset just past the last record recovered in this segment.
    fn recover_segment(&self, path: &Path, buffer: &[u8], recovery: &mut Recovery) -> u64 {
        let mut offset = 0;
        let mut valid_end = 0;

        while offset + HEADER_SIZE <= buffer.len() {
            if buffer[offset..offset + 4] != MAGIC_ARRAY {
                warn!(path = %path.display(), offset, "bad magic in WAL, scanning for next record");
                match find_next_magic(buffer, offset + 1) {
                    Some(next) => { offset = next; continue; }
                    None => break,
                }
            }

            match deserialize_record(&buffer[offset..]) {
                Ok((record, used)) => {
                    recovery.records.push(record);
                    offset += used;
                    valid_end = offset;
                }
                Err(KvError::TornWrite { expected_size, available_bytes, .. }) => {
                    // the checksum does not cover the header, so a damaged
                    // length looks torn; it is only the crash point if nothing
                    // valid follows
                    match find_next_valid_record(buffer, offset + 1) {
                        Some(next) => {
                            warn!(
                                path = %path.display(),
                                offset,
                                expected_size,
                                "record length runs past end of segment, skipping to next valid record"
                            );
                            recovery.skipped += 1;
                            offset = next;
                        }
                        None => {
                            warn!(
                                path = %path.display(),
                                offset,
                                expected_size,
                                available_bytes,
                                "torn write at end of WAL segment"
                            );
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), offset, error = %e, "skipping corrupt WAL record");
                    recovery.skipped += 1;
                    match find_next_magic(buffer, offset + 1) {
                        Some(next) => { offset = next; continue; }
                        None => break,
                    }
                }
            }
        }

        // a partial header with nothing valid after it is also a torn tail
        valid_end as u64
    }
}

fn read_segment(path: &Path) -> KvResult<Vec<u8>> {
    let mut file = File::open(path)
        .map_err(|e| KvError::io_at(path, e, "Failed to open WAL file for recovery"))?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)
        .map_err(|e| KvError::io_at(path, e, "Failed to read WAL file"))?;
    Ok(buffer)
}

/// Offset of the next record at or after `start` that fully validates.
fn find_next_valid_record(buffer: &[u8], start: usize) -> Option<usize> {
    let mut pos = start;
    while let Some(next) = find_next_magic(buffer, pos) {
        if deserialize_record(&buffer[next..]).is_ok() {
            return Some(next);
        }
        pos = next + 1;
    }
    None
}

/// Scan forward for the next record magic. Used to resync after corruption.
fn find_next_magic(buffer: &[u8], start: usize) -> Option<usize> {
    buffer
        .get(start..)?
        .windows(MAGIC_ARRAY.len())
        .position(|w| w == MAGIC_ARRAY)
        .map(|pos| start + pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Operation;
    use crate::value::Value;
    use tempfile::TempDir;

    fn put(key: &str, value: impl Into<Value>) -> BatchOp {
        BatchOp::Put { key: key.to_string(), value: value.into() }
    }

    #[test]
    fn test_wal_write_read_roundtrip() {
        let temp = TempDir::new().unwrap();

        let mut writer = WalWriter::new(temp.path(), Config::default()).unwrap();
        writer.append(RecordKind::Batch, &[put("key1", "value1"), put("key2", 2)], true).unwrap();
        writer.append(RecordKind::Batch, &[BatchOp::Remove { key: "key1".into() }], false).unwrap();
        drop(writer);

        let recovery = WalReader::new(temp.path()).recover().unwrap();
        assert_eq!(recovery.records.len(), 2);
        assert_eq!(recovery.records[0].ops.len(), 2);
        assert_eq!(recovery.records[1].ops[0].operation(), Operation::Remove);
        assert!(recovery.torn_tail.is_none());
        assert_eq!(recovery.segments, 1);
    }

    #[test]
    fn test_corruption_recovery_skips_bad_record() {
        let temp = TempDir::new().unwrap();

        let mut writer = WalWriter::new(temp.path(), Config::default()).unwrap();
        let first = writer.append(RecordKind::Batch, &[put("good1", "v1")], true).unwrap();
        writer.append(RecordKind::Batch, &[put("good2", "v2")], true).unwrap();
        writer.append(RecordKind::Batch, &[put("good3", "v3")], true).unwrap();
        let wal_path = writer.current_path().to_path_buf();
        drop(writer);

        // flip a payload byte of the second record
        let mut data = std::fs::read(&wal_path).unwrap();
        let target = first as usize + HEADER_SIZE + 6;
        data[target] ^= 0xFF;
        std::fs::write(&wal_path, data).unwrap();

        let recovery = WalReader::new(temp.path()).recover().unwrap();
        let keys: Vec<&str> = recovery.records.iter().map(|r| r.ops[0].key()).collect();
        assert_eq!(keys, vec!["good1", "good3"]);
        assert_eq!(recovery.skipped, 1);
    }

    #[test]
    fn test_torn_write_stops_cleanly() {
        let temp = TempDir::new().unwrap();

        let mut writer = WalWriter::new(temp.path(), Config::default()).unwrap();
        let complete = writer.append(RecordKind::Batch, &[put("complete", "entry")], true).unwrap();
        let wal_path = writer.current_path().to_path_buf();
        drop(writer);

        let mut data = std::fs::read(&wal_path).unwrap();
        data.extend_from_slice(&MAGIC_ARRAY);
        data.extend_from_slice(&[0xFF, 0x00, 0x00, 0x00]);
        data.extend_from_slice(&[0u8; HEADER_SIZE]);
        std::fs::write(&wal_path, data).unwrap();

        let recovery = WalReader::new(temp.path()).recover().unwrap();
        assert_eq!(recovery.records.len(), 1);
        let tail = recovery.torn_tail.unwrap();
        assert_eq!(tail.valid_len, complete);

        tail.truncate().unwrap();
        assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), complete);
    }

    #[test]
    fn test_damaged_length_field_is_skipped_not_torn() {
        let temp = TempDir::new().unwrap();

        let mut writer = WalWriter::new(temp.path(), Config::default()).unwrap();
        writer.append(RecordKind::Batch, &[put("a", 1)], true).unwrap();
        writer.append(RecordKind::Batch, &[put("b", 2)], true).unwrap();
        writer.append(RecordKind::Batch, &[put("c", 3)], true).unwrap();
        let wal_path = writer.current_path().to_path_buf();
        drop(writer);

        let mut data = std::fs::read(&wal_path).unwrap();
        data[4..8].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
        std::fs::write(&wal_path, data).unwrap();

        let recovery = WalReader::new(temp.path()).recover().unwrap();
        let keys: Vec<&str> = recovery.records.iter().map(|r| r.ops[0].key()).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert_eq!(recovery.skipped, 1);
        assert!(recovery.torn_tail.is_none());
    }

    #[test]
    fn test_rotation_creates_ordered_segments() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::embedded();
        config.wal_rotation_size_bytes = 64 * 1024;
        config.max_value_size = 40 * 1024;

        let mut writer = WalWriter::new(temp.path(), config).unwrap();
        let big = "x".repeat(30 * 1024);
        for i in 0..4 {
            writer.append(RecordKind::Batch, &[put(&format!("k{}", i), big.as_str())], false).unwrap();
        }
        assert!(writer.sequence() >= 1);
        drop(writer);

        let segments = list_segments(temp.path()).unwrap();
        assert!(segments.len() >= 2);
        assert!(segments.windows(2).all(|w| w[0].0 < w[1].0));

        let recovery = WalReader::new(temp.path()).recover().unwrap();
        let keys: Vec<&str> = recovery.records.iter().map(|r| r.ops[0].key()).collect();
        assert_eq!(keys, vec!["k0", "k1", "k2", "k3"]);
    }

    #[test]
    fn test_missing_directory_recovers_empty() {
        let temp = TempDir::new().unwrap();
        let recovery = WalReader::new(temp.path().join("nope")).recover().unwrap();
        assert!(recovery.records.is_empty());
    }

    #[test]
    fn test_segment_naming() {
        let path = segment_path(Path::new("/tmp"), 26);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "wal-000000000000001a.gkv");
        assert_eq!(parse_segment_name(name), Some(26));
        assert_eq!(parse_segment_name("data-0001.gkv"), None);
    }
}
