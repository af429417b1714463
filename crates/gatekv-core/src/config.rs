//! Configuration for file-backed stores
//!
//! Provides presets for different device classes and validation of
//! custom configurations.

use std::time::Duration;

use crate::error::{KvError, KvResult};
use crate::platform_durability::SyncMode;

/// File backend configuration with device-class presets
#[derive(Debug, Clone)]
pub struct Config {
    /// How hard `commit` and the flusher push data to the device
    pub sync_mode: SyncMode,
    /// WAL segment rotation threshold (bytes)
    pub wal_rotation_size_bytes: u64,
    /// Compact on open once the WAL grows past this many bytes
    pub compaction_trigger_bytes: u64,
    /// Background flusher cadence for applied (unsynced) batches
    pub flush_cadence: Duration,
    /// Maximum key size in bytes
    pub max_key_size: usize,
    /// Maximum encoded value size in bytes
    pub max_value_size: usize,
}

impl Config {
    /// Desktop / server class: large segments, full device flush.
    pub fn desktop() -> Self {
        Self {
            sync_mode: SyncMode::Full,
            wal_rotation_size_bytes: 16 * 1024 * 1024,
            compaction_trigger_bytes: 4 * 1024 * 1024,
            flush_cadence: Duration::from_millis(500),
            max_key_size: 1024,
            max_value_size: 4 * 1024 * 1024,
        }
    }

    /// Phone class: smaller segments, data-only sync to save flash wear.
    pub fn mobile() -> Self {
        Self {
            sync_mode: SyncMode::Data,
            wal_rotation_size_bytes: 4 * 1024 * 1024,
            compaction_trigger_bytes: 1024 * 1024,
            flush_cadence: Duration::from_secs(1),
            max_key_size: 512,
            max_value_size: 1024 * 1024,
        }
    }

    /// Constrained devices: tiny segments, aggressive compaction.
    pub fn embedded() -> Self {
        Self {
            sync_mode: SyncMode::Data,
            wal_rotation_size_bytes: 1024 * 1024,
            compaction_trigger_bytes: 256 * 1024,
            flush_cadence: Duration::from_secs(2),
            max_key_size: 128,
            max_value_size: 64 * 1024,
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> KvResult<()> {
        if self.wal_rotation_size_bytes < 64 * 1024 {
            return Err(KvError::InvalidConfig(
                "wal_rotation_size_bytes must be >= 64KB".into(),
            ));
        }
        if self.compaction_trigger_bytes == 0 {
            return Err(KvError::InvalidConfig(
                "compaction_trigger_bytes must be > 0".into(),
            ));
        }
        if self.flush_cadence.is_zero() {
            return Err(KvError::InvalidConfig("flush_cadence must be > 0".into()));
        }
        // key length is stored as u16 in the record format
        if self.max_key_size == 0 || self.max_key_size > u16::MAX as usize {
            return Err(KvError::InvalidConfig(
                "max_key_size must be in [1, 65535]".into(),
            ));
        }
        if self.max_value_size == 0 || self.max_value_size > 128 * 1024 * 1024 {
            return Err(KvError::InvalidConfig(
                "max_value_size must be in [1, 128MB]".into(),
            ));
        }
        if self.max_value_size as u64 >= self.wal_rotation_size_bytes {
            return Err(KvError::InvalidConfig(
                "max_value_size must be smaller than wal_rotation_size_bytes".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self { Self::desktop() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_presets_valid() {
        assert!(Config::desktop().validate().is_ok());
        assert!(Config::mobile().validate().is_ok());
        assert!(Config::embedded().validate().is_ok());
    }

    #[test]
    fn test_tier_ordering() {
        let d = Config::desktop();
        let m = Config::mobile();
        let e = Config::embedded();
        assert!(d.wal_rotation_size_bytes > m.wal_rotation_size_bytes);
        assert!(m.wal_rotation_size_bytes > e.wal_rotation_size_bytes);
        assert!(d.max_value_size > e.max_value_size);
    }

    #[test]
    fn test_invalid_key_size_rejected() {
        let mut config = Config::default();
        config.max_key_size = 0;
        assert!(matches!(config.validate(), Err(KvError::InvalidConfig(_))));

        config.max_key_size = 70_000;
        assert!(matches!(config.validate(), Err(KvError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_cadence_rejected() {
        let mut config = Config::mobile();
        config.flush_cadence = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
