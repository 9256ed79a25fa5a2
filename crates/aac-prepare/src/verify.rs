//! Presence, size, and checksum verification of expected files.
//!
//! Verification never modifies the filesystem and never fails as a whole:
//! a file that cannot be read is reported as [`FileStatus::PresentInvalid`].

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use aac_core::{ExpectedFile, FileStatus};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Per-file statuses in the order the files were expected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    statuses: IndexMap<String, FileStatus>,
}

/// Status counts of a [`VerifyReport`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Files that do not exist.
    pub missing: usize,
    /// Files that exist and match.
    pub valid: usize,
    /// Files that exist but do not match (or cannot be read).
    pub invalid: usize,
}

impl StatusCounts {
    /// Total number of files counted.
    pub fn total(&self) -> usize {
        self.missing + self.valid + self.invalid
    }
}

impl VerifyReport {
    /// Status of one relative path.
    pub fn status(&self, relpath: &str) -> Option<FileStatus> {
        self.statuses.get(relpath).copied()
    }

    /// Iterate `(relpath, status)` in expected order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FileStatus)> {
        self.statuses.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Counts per status.
    pub fn counts(&self) -> StatusCounts {
        self.statuses
            .values()
            .fold(StatusCounts::default(), |mut acc, s| {
                match s {
                    FileStatus::Missing => acc.missing += 1,
                    FileStatus::PresentValid => acc.valid += 1,
                    FileStatus::PresentInvalid => acc.invalid += 1,
                }
                acc
            })
    }

    /// Relative paths that are missing or invalid, in expected order.
    pub fn needing_work(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, s)| s.needs_work())
            .map(|(p, _)| p)
            .collect()
    }

    /// Whether every expected file is valid.
    pub fn is_complete(&self) -> bool {
        self.statuses.values().all(|s| *s == FileStatus::PresentValid)
    }

    /// Number of files in the report.
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    /// Whether the report is empty.
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

/// Verify every expected file relative to `dir`.
pub fn verify(dir: &Path, expected: &[ExpectedFile]) -> VerifyReport {
    let statuses = expected
        .iter()
        .map(|file| (file.relpath.clone(), verify_one(dir, file)))
        .collect();
    VerifyReport { statuses }
}

/// Verify a single expected file relative to `dir`.
pub fn verify_one(dir: &Path, file: &ExpectedFile) -> FileStatus {
    let path = file
        .relpath
        .split('/')
        .filter(|c| !c.is_empty())
        .fold(dir.to_path_buf(), |acc, c| acc.join(c));

    let meta = match std::fs::metadata(&path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return FileStatus::Missing,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "stat failed");
            return FileStatus::PresentInvalid;
        }
    };
    if !meta.is_file() {
        return FileStatus::PresentInvalid;
    }
    if let Some(size) = file.size {
        if meta.len() != size {
            debug!(path = %path.display(), expected = size, found = meta.len(), "size mismatch");
            return FileStatus::PresentInvalid;
        }
    }
    if let Some(expected) = &file.sha256 {
        match sha256_file(&path) {
            Ok(digest) if digest == *expected => {}
            Ok(digest) => {
                debug!(path = %path.display(), %expected, found = %digest, "checksum mismatch");
                return FileStatus::PresentInvalid;
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "hashing failed");
                return FileStatus::PresentInvalid;
            }
        }
    }
    FileStatus::PresentValid
}

/// Lowercase hex SHA-256 of a file, streamed.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let _ = io::copy(&mut reader, &mut hasher)?;
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
