//! Error types for sample access.

use std::path::PathBuf;

use aac_core::IndexError;
use thiserror::Error;

/// Errors from reading a prepared subset.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Requested index is past the end of the subset.
    #[error("index {index} out of range for subset of length {len}")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Subset length.
        len: usize,
    },

    /// The subset (or one of its audio files) is not on disk.
    #[error("{label} is not prepared: {reason}")]
    NotPrepared {
        /// `dataset/subset`.
        label: String,
        /// What is missing.
        reason: String,
    },

    /// Requested a field no record carries.
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// Audio file could not be decoded.
    #[error("failed to decode {path}: {reason}")]
    Decode {
        /// Audio file.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// Resampler setup or processing failed.
    #[error("resampling failed: {0}")]
    Resample(String),

    /// Persisted index could not be loaded.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Convenience alias for access results.
pub type Result<T> = std::result::Result<T, AccessError>;
