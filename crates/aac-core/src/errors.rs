//! Error types for catalog lookups and index tables.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving a dataset description.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The dataset name is not part of the catalog.
    #[error("unknown dataset '{0}'")]
    UnknownDataset(String),

    /// The subset does not exist for this dataset.
    #[error("unknown subset '{subset}' for dataset {dataset} (expected one of: {expected})")]
    UnknownSubset {
        /// Dataset pretty name.
        dataset: String,
        /// Requested subset.
        subset: String,
        /// Comma-separated valid subsets.
        expected: String,
    },
}

/// Errors raised while building, loading, or saving an index table.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Filesystem failure on the table or a metadata file.
    #[error("index io error on {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A metadata file could not be parsed.
    #[error("malformed metadata {path}: {reason}")]
    Malformed {
        /// Metadata file.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// The persisted table does not match the current schema.
    #[error("index schema mismatch in {path}: found {found}, expected {expected}")]
    SchemaMismatch {
        /// Table file.
        path: PathBuf,
        /// Version found on disk (0 when unreadable).
        found: u32,
        /// Version this build writes.
        expected: u32,
    },

    /// The persisted table belongs to another dataset or subset.
    #[error("index {path} describes {found}, expected {expected}")]
    WrongSubset {
        /// Table file.
        path: PathBuf,
        /// `dataset/subset` on disk.
        found: String,
        /// `dataset/subset` requested.
        expected: String,
    },

    /// Metadata parsed but produced no records.
    #[error("metadata produced an empty index")]
    Empty,
}

impl IndexError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Build a [`IndexError::Malformed`] error.
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the persisted table should be discarded and rebuilt.
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            Self::SchemaMismatch { .. } | Self::WrongSubset { .. } | Self::Malformed { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
