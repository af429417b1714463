//! Binary format of WAL records
//!
//! One record holds one editor batch (or one compaction snapshot), so a batch
//! is either recovered whole or not at all:
//!
//! ```text
//! RecordHeader (32 bytes) + payload
//! payload = op_count(u32) + { op(u8) + pad(u8) + key_len(u16) + value_len(u32) + key + value }*
//! ```
//!
//! `value` is the tagged encoding from [`crate::value`]; removes carry an
//! empty value.

use std::path::PathBuf;

use crate::config::Config;
use crate::error::{KvError, KvResult};
use crate::value::Value;

/// Magic bytes identifying gatekv WAL records: 'G','K','V','W'
pub const MAGIC_ARRAY: [u8; 4] = [0x47, 0x4B, 0x56, 0x57];

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Fixed bytes per op before key and value
const OP_PREFIX_SIZE: usize = 1 + 1 + 2 + 4;

/// What a record means during replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Apply the ops on top of current state
    Batch = 1,
    /// Discard current state, then apply the ops (written by compaction)
    Snapshot = 2,
}

/// Per-key operation inside a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    Put = 1,
    Remove = 2,
}

/// A staged mutation, in the order the caller issued it.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Put { key: String, value: Value },
    Remove { key: String },
}

impl BatchOp {
    pub fn key(&self) -> &str {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Remove { key } => key,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            BatchOp::Put { .. } => Operation::Put,
            BatchOp::Remove { .. } => Operation::Remove,
        }
    }
}

/// Fixed-size header for each record
///
/// Layout:
///   [0..4]   magic:    "GKVW"
///   [4..8]   length:   u32 - payload length in bytes
///   [8..12]  checksum: u32 - CRC32C of payload bytes
///   [12]     kind:     u8  - RecordKind
///   [13..16] reserved
///   [16..32] padding
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub magic: [u8; 4],
    pub length: u32,
    pub checksum: u32,
    pub kind: u8,
}

impl RecordHeader {
    pub fn new(length: u32, checksum: u32, kind: RecordKind) -> Self {
        Self { magic: MAGIC_ARRAY, length, checksum, kind: kind as u8 }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12] = self.kind;
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            checksum: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            kind: bytes[12],
        }
    }
}

/// A decoded record
#[derive(Debug, Clone)]
pub struct WalRecord {
    pub kind: RecordKind,
    pub ops: Vec<BatchOp>,
}

/// Reject keys the store cannot hold.
pub fn validate_key(key: &str, max_key_size: usize) -> KvResult<()> {
    if key.is_empty() {
        return Err(KvError::EmptyKey);
    }
    if key.len() > max_key_size {
        return Err(KvError::OversizedEntry {
            entry_size: key.len() as u64,
            max_size: max_key_size as u64,
            component: "key".to_string(),
        });
    }
    Ok(())
}

/// Serialize a batch into one complete record (header + payload).
///
/// Every key and value is validated before anything is allocated for the
/// payload.
pub fn serialize_record(kind: RecordKind, ops: &[BatchOp], config: &Config) -> KvResult<Vec<u8>> {
    let mut payload_size = 4usize;
    for op in ops {
        validate_key(op.key(), config.max_key_size)?;
        let value_len = match op {
            BatchOp::Put { value, .. } => value.encoded_len(),
            BatchOp::Remove { .. } => 0,
        };
        if value_len > config.max_value_size {
            return Err(KvError::OversizedEntry {
                entry_size: value_len as u64,
                max_size: config.max_value_size as u64,
                component: "value".to_string(),
            });
        }
        payload_size += OP_PREFIX_SIZE + op.key().len() + value_len;
    }
    if payload_size > u32::MAX as usize {
        return Err(KvError::OversizedEntry {
            entry_size: payload_size as u64,
            max_size: u32::MAX as u64,
            component: "record".to_string(),
        });
    }

    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload_size);
    buffer.resize(HEADER_SIZE, 0);
    buffer.extend_from_slice(&(ops.len() as u32).to_le_bytes());

    for op in ops {
        let key = op.key().as_bytes();
        buffer.push(op.operation() as u8);
        buffer.push(0);
        buffer.extend_from_slice(&(key.len() as u16).to_le_bytes());
        match op {
            BatchOp::Put { value, .. } => {
                buffer.extend_from_slice(&(value.encoded_len() as u32).to_le_bytes());
                buffer.extend_from_slice(key);
                value.encode_into(&mut buffer);
            }
            BatchOp::Remove { .. } => {
                buffer.extend_from_slice(&0u32.to_le_bytes());
                buffer.extend_from_slice(key);
            }
        }
    }

    let payload = &buffer[HEADER_SIZE..];
    let header = RecordHeader::new(payload.len() as u32, crc32c::crc32c(payload), kind);
    buffer[..HEADER_SIZE].copy_from_slice(&header.to_bytes());

    Ok(buffer)
}

fn corrupt(offset: usize, reason: String) -> KvError {
    KvError::WalCorrupted {
        path: PathBuf::from("<buffer>"),
        offset: offset as u64,
        reason,
    }
}

/// Deserialize one record from the start of `data`.
///
/// Returns the record and the number of bytes it occupied.
pub fn deserialize_record(data: &[u8]) -> KvResult<(WalRecord, usize)> {
    if data.len() < HEADER_SIZE {
        return Err(corrupt(0, format!(
            "record too short: {} bytes, need at least {}",
            data.len(),
            HEADER_SIZE
        )));
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&data[..HEADER_SIZE]);
    let header = RecordHeader::from_bytes(&header_bytes);

    if header.magic != MAGIC_ARRAY {
        return Err(KvError::NoMagicFound {
            path: PathBuf::from("<buffer>"),
            offset: 0,
            found_bytes: header.magic,
        });
    }

    let payload_end = HEADER_SIZE + header.length as usize;
    if data.len() < payload_end {
        return Err(KvError::TornWrite {
            path: PathBuf::from("<buffer>"),
            expected_size: header.length,
            available_bytes: (data.len() - HEADER_SIZE) as u64,
            offset: HEADER_SIZE as u64,
        });
    }

    let payload = &data[HEADER_SIZE..payload_end];
    let computed = crc32c::crc32c(payload);
    if computed != header.checksum {
        return Err(KvError::ChecksumMismatch {
            path: PathBuf::from("<buffer>"),
            expected: header.checksum,
            actual: computed,
            offset: HEADER_SIZE as u64,
        });
    }

    let kind = match header.kind {
        1 => RecordKind::Batch,
        2 => RecordKind::Snapshot,
        other => return Err(corrupt(12, format!("invalid record kind: {}", other))),
    };

    let ops = parse_ops(payload).map_err(|(pos, reason)| corrupt(HEADER_SIZE + pos, reason))?;
    Ok((WalRecord { kind, ops }, payload_end))
}

fn parse_ops(payload: &[u8]) -> Result<Vec<BatchOp>, (usize, String)> {
    if payload.len() < 4 {
        return Err((0, "payload too short for op count".to_string()));
    }
    let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    if count > (payload.len() - 4) / OP_PREFIX_SIZE {
        return Err((0, format!("op count {} does not fit in {} bytes", count, payload.len())));
    }

    let mut ops = Vec::with_capacity(count);
    let mut pos = 4;
    for _ in 0..count {
        let prefix = payload
            .get(pos..pos + OP_PREFIX_SIZE)
            .ok_or_else(|| (pos, "op header truncated".to_string()))?;
        let op = prefix[0];
        let key_len = u16::from_le_bytes([prefix[2], prefix[3]]) as usize;
        let value_len = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;

        let key_start = pos + OP_PREFIX_SIZE;
        let value_start = key_start + key_len;
        let value_end = value_start + value_len;
        if payload.len() < value_end {
            return Err((pos, format!(
                "need {} bytes for key({}) + value({})",
                value_end - pos,
                key_len,
                value_len
            )));
        }

        let key = std::str::from_utf8(&payload[key_start..value_start])
            .map_err(|e| (key_start, format!("key is not utf-8: {}", e)))?
            .to_string();

        let batch_op = match op {
            1 => {
                let value = Value::decode(&payload[value_start..value_end])
                    .map_err(|e| (value_start, e.to_string()))?;
                BatchOp::Put { key, value }
            }
            2 => BatchOp::Remove { key },
            other => return Err((pos, format!("invalid operation type: {}", other))),
        };
        ops.push(batch_op);
        pos = value_end;
    }

    if pos != payload.len() {
        return Err((pos, format!("{} trailing bytes after ops", payload.len() - pos)));
    }
    Ok(ops)
}
