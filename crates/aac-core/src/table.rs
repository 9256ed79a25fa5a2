//! Persisted per-subset record table.
//!
//! The table is one JSON file written atomically (temp file + rename). A file
//! written by a different schema version is never partially read; loading
//! reports [`IndexError::SchemaMismatch`] and the caller rebuilds.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::IndexError;
use crate::types::SampleRecord;

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Ordered records of one (dataset, subset, version).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexTable {
    /// Schema version of this file.
    pub schema_version: u32,
    /// Dataset machine name.
    pub dataset: String,
    /// Subset identifier.
    pub subset: String,
    /// Dataset version directory name.
    pub version: String,
    /// Sample rate of the audio files.
    pub sample_rate: u32,
    /// Records; position is the sample id.
    pub records: Vec<SampleRecord>,
}

/// Only the header, used to detect schema changes before a full parse.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableHeader {
    #[serde(default)]
    schema_version: u32,
}

impl IndexTable {
    /// New table at the current schema version.
    pub fn new(
        dataset: impl Into<String>,
        subset: impl Into<String>,
        version: impl Into<String>,
        sample_rate: u32,
        records: Vec<SampleRecord>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            dataset: dataset.into(),
            subset: subset.into(),
            version: version.into(),
            sample_rate,
            records,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load a table and check it describes `dataset/subset`.
    pub fn load(path: &Path, dataset: &str, subset: &str) -> Result<Self, IndexError> {
        let content = std::fs::read_to_string(path).map_err(|e| IndexError::io(path, e))?;

        let header: TableHeader = serde_json::from_str(&content)
            .map_err(|e| IndexError::malformed(path, e.to_string()))?;
        if header.schema_version != SCHEMA_VERSION {
            return Err(IndexError::SchemaMismatch {
                path: path.to_path_buf(),
                found: header.schema_version,
                expected: SCHEMA_VERSION,
            });
        }

        let table: Self = serde_json::from_str(&content)
            .map_err(|e| IndexError::malformed(path, e.to_string()))?;
        if table.dataset != dataset || table.subset != subset {
            return Err(IndexError::WrongSubset {
                path: path.to_path_buf(),
                found: format!("{}/{}", table.dataset, table.subset),
                expected: format!("{dataset}/{subset}"),
            });
        }
        debug!(path = %path.display(), records = table.len(), "loaded index table");
        Ok(table)
    }

    /// Write the table atomically.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| IndexError::malformed(path, e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| IndexError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| IndexError::io(path, e))?;
        debug!(path = %path.display(), records = self.len(), "saved index table");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
