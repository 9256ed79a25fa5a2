//! Immutable description of one (dataset, subset) pair.

use serde::{Deserialize, Serialize};

use crate::types::{ExpectedFile, FileTag};

/// Licensing, citation, and descriptive metadata of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetCard {
    /// `BibTeX` citation.
    pub citation: String,
    /// Project homepage.
    pub homepage: String,
    /// One-sentence description.
    pub description: String,
    /// License identifier or statement.
    pub license: String,
    /// Nominal number of captions per audio clip.
    pub captions_per_audio: usize,
}

/// Structured format of a metadata file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "camelCase")]
pub enum MetadataFormat {
    /// CSV with one caption per row: `audiocap_id, youtube_id, start_time, caption`.
    AudioCapsCsv {
        /// Audio file extension used to derive `fname`.
        audio_ext: String,
        /// Audio directory relative to the version directory.
        audio_dir: String,
    },
    /// JSON object `{"data": [...]}` with one caption per clip.
    WavCapsJson {
        /// Source name (`AudioSet_SL`, `BBC_Sound_Effects`, ...).
        source: String,
        /// Audio directory relative to the version directory.
        audio_dir: String,
    },
}

impl MetadataFormat {
    /// Audio directory the parsed records point into.
    pub fn audio_dir(&self) -> &str {
        match self {
            Self::AudioCapsCsv { audio_dir, .. } | Self::WavCapsJson { audio_dir, .. } => audio_dir,
        }
    }
}

/// One metadata file and how to parse it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSource {
    /// Path relative to the version directory.
    pub relpath: String,
    /// Parser to use.
    pub format: MetadataFormat,
}

/// How the parts of an archive set relate to each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArchiveKind {
    /// A single self-contained zip file.
    Single,
    /// A zip file cut into byte ranges; parts concatenate into the archive.
    Concatenated,
    /// A zip-native spanned set (`.z01 … .zNN` then `.zip`) needing a merge.
    Spanned,
}

/// One logical archive, possibly split across several files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSet {
    /// Name used for logs and merged-file naming.
    pub name: String,
    /// Part paths relative to the version directory, in stream order.
    pub parts: Vec<String>,
    /// Part relationship.
    pub kind: ArchiveKind,
    /// Output directory relative to the version directory.
    pub audio_dir: String,
    /// Only entries with this suffix are extracted.
    pub entry_suffix: String,
}

impl ArchiveSet {
    /// Path (relative to the version directory) of the merged archive for
    /// spanned sets, or of the single archive otherwise.
    pub fn merged_relpath(&self) -> Option<String> {
        match self.kind {
            ArchiveKind::Spanned => {
                let last = self.parts.last()?;
                let stem = last.strip_suffix(".zip").unwrap_or(last);
                Some(format!("{stem}_merged.zip"))
            }
            ArchiveKind::Single => self.parts.first().cloned(),
            ArchiveKind::Concatenated => None,
        }
    }
}

/// Where the audio of a subset comes from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AudioSource {
    /// Audio extracted from downloaded archives.
    Archives {
        /// Archive sets, extracted in order.
        sets: Vec<ArchiveSet>,
    },
    /// Audio retrieved per clip through external tools.
    Clips {
        /// Audio container/codec produced for each clip (e.g. `flac`).
        format: String,
    },
}

/// Immutable description of one (dataset, subset) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSpec {
    /// Machine name (`audiocaps`, `wavcaps`).
    pub name: String,
    /// Directory name under the root (`AudioCaps`, `WavCaps`).
    pub pretty_name: String,
    /// Subset identifier.
    pub subset: String,
    /// On-disk version directory name.
    pub version: String,
    /// Target sample rate in Hz.
    pub sample_rate: u32,
    /// Metadata and archive files, relative to the version directory.
    pub files: Vec<ExpectedFile>,
    /// Metadata files fed to the indexer, in index order.
    pub metadata: Vec<MetadataSource>,
    /// Audio origin.
    pub audio: AudioSource,
    /// Number of audio files the upstream release is known to contain.
    pub expected_audio_count: Option<usize>,
    /// Descriptive metadata.
    pub card: DatasetCard,
}

impl DatasetSpec {
    /// Expected files with the given tag.
    pub fn files_tagged(&self, tag: FileTag) -> impl Iterator<Item = &ExpectedFile> {
        self.files.iter().filter(move |f| f.tag == tag)
    }

    /// Expected metadata files.
    pub fn metadata_files(&self) -> Vec<ExpectedFile> {
        self.files_tagged(FileTag::Metadata).cloned().collect()
    }

    /// Expected archive parts.
    pub fn archive_files(&self) -> Vec<ExpectedFile> {
        self.files_tagged(FileTag::Archive).cloned().collect()
    }

    /// Whether audio is fetched per clip rather than extracted.
    pub fn uses_clips(&self) -> bool {
        matches!(self.audio, AudioSource::Clips { .. })
    }

    /// Whether preparing `self` and `other` writes any common path.
    ///
    /// Subsets built from the same upstream sources share metadata, archive
    /// parts, and audio directories, so they must not be prepared at once.
    pub fn shares_files_with(&self, other: &DatasetSpec) -> bool {
        if self.pretty_name != other.pretty_name || self.version != other.version {
            return false;
        }
        let same_file = self
            .files
            .iter()
            .any(|a| other.files.iter().any(|b| a.relpath == b.relpath));
        let same_audio = self.metadata.iter().any(|a| {
            other
                .metadata
                .iter()
                .any(|b| a.format.audio_dir() == b.format.audio_dir())
        });
        same_file || same_audio
    }

    /// `name/subset` label for logs.
    pub fn label(&self) -> String {
        format!("{}/{}", self.name, self.subset)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
