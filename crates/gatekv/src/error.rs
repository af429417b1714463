//! Error types for the level-gated store
//!
//! Losing arbitration is not an error: a rejected put is a silent no-op.
//! Backend failures pass through as [`KvError`] unchanged.

use gatekv_core::KvError;
use thiserror::Error;

use crate::store::Level;

#[derive(Debug, Clone, Error)]
pub enum GateError {
    /// Levels are persisted as `i32`, so anything above `i32::MAX` cannot be
    /// recorded
    #[error("level {level} exceeds maximum level {max}")]
    InvalidLevel { level: Level, max: Level },

    /// Failure from an underlying backend
    #[error(transparent)]
    Backend(#[from] KvError),
}

pub type GateResult<T> = Result<T, GateError>;
