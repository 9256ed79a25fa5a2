//! On-disk directory conventions.
//!
//! ```text
//! {root}
//! └── {PrettyName}
//!     └── {version}
//!         ├── archives/
//!         ├── audio/
//!         └── metadata/
//!             ├── {subset}_index.json
//!             └── {subset}_fetch_failures.json
//! ```

use std::path::{Path, PathBuf};

use crate::spec::DatasetSpec;

/// Resolved paths of one dataset version under a root directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
    version_dir: PathBuf,
}

impl DatasetLayout {
    /// Layout for `spec` under `root`.
    pub fn new(root: impl AsRef<Path>, spec: &DatasetSpec) -> Self {
        let root = root.as_ref().to_path_buf();
        let version_dir = root.join(&spec.pretty_name).join(&spec.version);
        Self { root, version_dir }
    }

    /// Root directory shared by all datasets.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{PrettyName}/{version}`; all relative paths resolve against it.
    pub fn version_dir(&self) -> &Path {
        &self.version_dir
    }

    /// Directory holding audio files.
    pub fn audio_dir(&self) -> PathBuf {
        self.version_dir.join("audio")
    }

    /// Directory holding metadata and index files.
    pub fn metadata_dir(&self) -> PathBuf {
        self.version_dir.join("metadata")
    }

    /// Directory holding downloaded archives.
    pub fn archives_dir(&self) -> PathBuf {
        self.version_dir.join("archives")
    }

    /// Persisted index table of `subset`.
    pub fn index_path(&self, subset: &str) -> PathBuf {
        self.metadata_dir().join(format!("{subset}_index.json"))
    }

    /// Failed per-clip fetches of the last preparation run of `subset`.
    pub fn failures_path(&self, subset: &str) -> PathBuf {
        self.metadata_dir()
            .join(format!("{subset}_fetch_failures.json"))
    }

    /// Resolve a `/`-separated relative path.
    pub fn resolve(&self, relpath: &str) -> PathBuf {
        relpath
            .split('/')
            .filter(|c| !c.is_empty())
            .fold(self.version_dir.clone(), |acc, c| acc.join(c))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
