//! Error taxonomy for the core numerical engine.
//!
//! One variant per failure kind named in the design; shape and config
//! errors always surface, pure-numeric errors are recovered locally where
//! the call site allows it (see `Core::train`'s ridge-escalation retry and
//! `OnlineLearner`'s reseed-on-violation path).

use thiserror::Error;

/// Errors produced by the core's boundary operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Invalid configuration key or value at construction.
    #[error("config error: {0}")]
    ConfigError(String),

    /// Operand shape inconsistent with instance dimensions.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Dimension the instance was constructed with.
        expected: usize,
        /// Dimension actually supplied by the caller.
        got: usize,
    },

    /// Training set smaller than the configured washout.
    #[error("insufficient data: need at least {needed} samples, got {got}")]
    InsufficientData {
        /// Minimum sample count required (the washout length).
        needed: usize,
        /// Sample count actually supplied.
        got: usize,
    },

    /// NaN/∞ detected, spectral collapse, or singular solve after retries.
    #[error("numeric instability: {0}")]
    NumericInstability(String),

    /// Bad magic, version mismatch, bad CRC, or truncation in a snapshot.
    #[error("snapshot corrupt: {0}")]
    SnapshotCorrupt(String),

    /// Restore attempted into an instance with a different configuration.
    #[error("config mismatch: {0}")]
    ConfigMismatch(String),

    /// Malformed wire packet; the packet is dropped, this error is never
    /// fatal to the receiver's state.
    #[error("codec error: {0}")]
    CodecError(String),

    /// A long operation observed its cancellation predicate return `true`.
    #[error("cancelled")]
    Cancelled,
}

/// Recoverable signal that `OnlineLearner` reset `P` after its
/// positive-definiteness proxy failed. Not a `CoreError`: `W_out` is
/// preserved and the call that triggered it still succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnerReseeded;
