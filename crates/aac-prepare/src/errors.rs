//! Error types for fetching, extraction, and preparation.
//!
//! Per-clip [`FetchError`]s are collected into batch reports; only failures
//! on metadata or archive files escalate into a [`PrepareError`].

use std::path::PathBuf;

use aac_core::IndexError;
use thiserror::Error;

use crate::prepare::PrepareState;

/// Failure to retrieve one remote resource.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, TLS, or body-stream failure.
    #[error("network error fetching {resource}: {message}")]
    Network {
        /// Resource description.
        resource: String,
        /// Transport error message.
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} fetching {resource}")]
    Http {
        /// Resource description.
        resource: String,
        /// Status code.
        status: u16,
        /// Server-requested delay before retrying.
        retry_after_ms: Option<u64>,
    },

    /// The source no longer exists, is private, or is blocked.
    #[error("source {source_id} unavailable: {reason}")]
    Unavailable {
        /// Upstream source id.
        source_id: String,
        /// Tool output explaining why.
        reason: String,
    },

    /// An external tool failed in a way that may succeed on retry.
    #[error("{tool} failed for {source_id}: {reason}")]
    Tool {
        /// Program name.
        tool: String,
        /// Upstream source id.
        source_id: String,
        /// Exit status and stderr excerpt.
        reason: String,
    },

    /// The hub client failed.
    #[error("hub error fetching {resource}: {message}")]
    Hub {
        /// Resource description.
        resource: String,
        /// Client error message.
        message: String,
    },

    /// The hub has no such repository, revision, or file, or refuses access.
    #[error("hub file {resource} not found: {message}")]
    HubMissing {
        /// Resource description.
        resource: String,
        /// Client error message.
        message: String,
    },

    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The retrieval finished but produced no bytes.
    #[error("fetched file {0} is empty")]
    Empty(PathBuf),

    /// No strategy handles this kind of resource.
    #[error("no fetch strategy for {0}")]
    Unsupported(String),

    /// The operation was cancelled.
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Tool { .. } | Self::Hub { .. } | Self::Empty(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Unavailable { .. }
            | Self::HubMissing { .. }
            | Self::Io(_)
            | Self::Unsupported(_)
            | Self::Cancelled => false,
        }
    }

    /// Delay the server asked for before retrying, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Http { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

/// Failure to extract an archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Filesystem failure while reading parts or writing entries.
    #[error("io error on {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The archive is corrupt or truncated.
    #[error("corrupt archive {archive}: {reason}")]
    Corrupt {
        /// Archive (first part) path.
        archive: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// The external merge tool failed.
    #[error("{tool} failed merging {archive}: {reason}")]
    Tool {
        /// Program name.
        tool: String,
        /// Archive being merged.
        archive: PathBuf,
        /// Exit status and stderr excerpt.
        reason: String,
    },

    /// An entry would be written outside the destination directory.
    #[error("archive entry escapes destination: {0}")]
    UnsafePath(String),

    /// No parts were given.
    #[error("archive has no parts")]
    NoParts,
}

impl ExtractError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Fatal failure preparing one (dataset, subset).
#[derive(Debug, Error)]
pub enum PrepareError {
    /// A required metadata or archive file could not be fetched.
    #[error("[{stage}] failed to fetch {file}: {source}")]
    Fetch {
        /// Stage the failure happened in.
        stage: PrepareState,
        /// Relative path of the file.
        file: String,
        /// Underlying error.
        #[source]
        source: FetchError,
    },

    /// An archive could not be merged or extracted.
    #[error("[{stage}] failed to extract {archive}: {source}")]
    Extract {
        /// Stage the failure happened in.
        stage: PrepareState,
        /// Archive set name.
        archive: String,
        /// Underlying error.
        #[source]
        source: ExtractError,
    },

    /// Metadata could not be indexed or the table could not be written.
    #[error("[{stage}] index error: {source}")]
    Index {
        /// Stage the failure happened in.
        stage: PrepareState,
        /// Underlying error.
        #[source]
        source: IndexError,
    },

    /// Too much audio is unavailable for the partial-availability policy.
    #[error("{missing} of {total} audio files unavailable")]
    Incomplete {
        /// Files not passing verification.
        missing: usize,
        /// Files referenced by the metadata.
        total: usize,
    },

    /// Local filesystem failure outside fetch and extraction.
    #[error("io error on {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Preparation was cancelled.
    #[error("preparation cancelled")]
    Cancelled,
}

impl PrepareError {
    /// Stage this error is attributed to, when known.
    pub fn stage(&self) -> Option<PrepareState> {
        match self {
            Self::Fetch { stage, .. } | Self::Extract { stage, .. } | Self::Index { stage, .. } => {
                Some(*stage)
            }
            Self::Incomplete { .. } => Some(PrepareState::Indexing),
            Self::Io { .. } | Self::Cancelled => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
