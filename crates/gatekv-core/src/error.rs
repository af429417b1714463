//! Error types for gatekv backends
//!
//! Every fallible backend operation returns [`KvError`]. Reads never fail;
//! errors surface from `open`, `commit`, `sync` and `compact`.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Backend error with enough context to locate the failing file or record.
#[derive(Debug, Clone, Error)]
pub enum KvError {
    /// I/O operation failed
    #[error("I/O error{}: {message} ({kind})", in_path(.path))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// WAL record is structurally invalid
    #[error("WAL corrupted in {} at offset {offset}: {reason}", .path.display())]
    WalCorrupted {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Checksum verification failed
    #[error(
        "checksum mismatch in {} at offset {offset}: expected 0x{expected:08x}, got 0x{actual:08x}",
        .path.display()
    )]
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
        offset: u64,
    },

    /// Record header promises more bytes than are available
    #[error(
        "torn write in {} at offset {offset}: expected {expected_size} bytes, only {available_bytes} available",
        .path.display()
    )]
    TornWrite {
        path: PathBuf,
        expected_size: u32,
        available_bytes: u64,
        offset: u64,
    },

    /// Magic bytes not found at expected location
    #[error(
        "magic bytes not found in {} at offset {offset}: found {:02x}{:02x}{:02x}{:02x}",
        .path.display(), .found_bytes[0], .found_bytes[1], .found_bytes[2], .found_bytes[3]
    )]
    NoMagicFound {
        path: PathBuf,
        offset: u64,
        found_bytes: [u8; 4],
    },

    /// Key or value exceeds the configured limit
    #[error("entry {component} too large: {entry_size} bytes exceeds limit of {max_size} bytes")]
    OversizedEntry {
        entry_size: u64,
        max_size: u64,
        /// "key", "value" or "record"
        component: String,
    },

    /// Keys must be non-empty
    #[error("empty key")]
    EmptyKey,

    /// Encoded value could not be decoded
    #[error("corrupt value: {0}")]
    CorruptValue(String),

    /// Configuration failed validation
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

fn in_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" in {}", p.display()),
        None => String::new(),
    }
}

impl KvError {
    /// Build an `Io` error carrying the path it happened on.
    pub fn io_at(path: &Path, err: std::io::Error, context: &str) -> Self {
        KvError::Io {
            path: Some(path.to_path_buf()),
            kind: err.kind(),
            message: format!("{}: {}", context, err),
        }
    }
}

impl From<std::io::Error> for KvError {
    fn from(err: std::io::Error) -> Self {
        KvError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for backend operations
pub type KvResult<T> = Result<T, KvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KvError::ChecksumMismatch {
            path: PathBuf::from("/tmp/test.gkv"),
            expected: 0x12345678,
            actual: 0x87654321,
            offset: 1024,
        };

        let display = err.to_string();
        assert!(display.contains("checksum mismatch"));
        assert!(display.contains("0x12345678"));
        assert!(display.contains("0x87654321"));
    }

    #[test]
    fn test_io_display_with_and_without_path() {
        let with_path = KvError::io_at(
            Path::new("/tmp/prefs"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            "Failed to open WAL file",
        );
        assert!(with_path.to_string().contains("in /tmp/prefs"));

        let without: KvError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(without.to_string().starts_with("I/O error: boom"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KvError = io_err.into();

        match err {
            KvError::Io { kind, .. } => assert_eq!(kind, std::io::ErrorKind::NotFound),
            _ => panic!("Expected Io error"),
        }
    }
}
