//! Expected files, verification statuses, and sample records.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Field holding the ordered caption list of a record.
pub const CAPTIONS_FIELD: &str = "captions";
/// Field holding the audio file name of a record.
pub const FNAME_FIELD: &str = "fname";
/// Field holding the audio path relative to the dataset version directory.
pub const FPATH_FIELD: &str = "fpath";
/// Field holding the clip duration in seconds.
pub const DURATION_FIELD: &str = "duration";

// ─────────────────────────────────────────────────────────────────────────────
// Expected files
// ─────────────────────────────────────────────────────────────────────────────

/// Role of an expected file in the preparation pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileTag {
    /// Caption/metadata file consumed by the indexer.
    Metadata,
    /// One part of a compressed archive.
    Archive,
    /// A single audio clip.
    Audio,
}

impl fmt::Display for FileTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Metadata => "metadata",
            Self::Archive => "archive",
            Self::Audio => "audio",
        })
    }
}

/// Where an expected file comes from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResourceRef {
    /// A file in a dataset repository on the Hugging Face hub.
    Hub {
        /// Repository id, e.g. `cvssp/WavCaps`.
        repo_id: String,
        /// Path of the file inside the repository.
        filename: String,
        /// Commit or branch; `None` means the default branch.
        revision: Option<String>,
    },
    /// A plain HTTP(S) URL.
    Url {
        /// Absolute URL.
        url: String,
    },
    /// A time window of a remote media source, fetched through external tools.
    Clip {
        /// Source id (a `YouTube` video id for `AudioCaps`).
        source_id: String,
        /// Window start in seconds.
        start_s: f64,
        /// Window length in seconds.
        duration_s: f64,
    },
    /// Produced locally by extraction; cannot be fetched directly.
    Extracted,
}

impl ResourceRef {
    /// Short human-readable description for logs and reports.
    pub fn describe(&self) -> String {
        match self {
            Self::Hub {
                repo_id, filename, ..
            } => format!("hub:{repo_id}/{filename}"),
            Self::Url { url } => url.clone(),
            Self::Clip {
                source_id, start_s, ..
            } => format!("clip:{source_id}@{start_s}"),
            Self::Extracted => "extracted".to_string(),
        }
    }
}

/// One file the verifier expects to find under a directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpectedFile {
    /// Path relative to the verified directory, `/`-separated.
    pub relpath: String,
    /// Exact byte size, when the upstream host publishes one.
    pub size: Option<u64>,
    /// Lowercase hex SHA-256, when the upstream host publishes one.
    pub sha256: Option<String>,
    /// Role in the pipeline.
    pub tag: FileTag,
    /// Where to fetch it from.
    pub source: ResourceRef,
}

impl ExpectedFile {
    /// Expected file with no size or checksum (existence-only check).
    pub fn new(relpath: impl Into<String>, tag: FileTag, source: ResourceRef) -> Self {
        Self {
            relpath: relpath.into(),
            size: None,
            sha256: None,
            tag,
            source,
        }
    }

    /// Attach an expected byte size.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Attach an expected SHA-256 digest (hex, any case).
    #[must_use]
    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.sha256 = Some(digest.into().to_ascii_lowercase());
        self
    }
}

/// Verification outcome for one expected file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    /// Not on disk.
    Missing,
    /// On disk and every configured check passed.
    PresentValid,
    /// On disk but unreadable or failing a size/checksum check.
    PresentInvalid,
}

impl FileStatus {
    /// Whether the file needs to be (re)fetched or (re)extracted.
    pub fn needs_work(self) -> bool {
        !matches!(self, Self::PresentValid)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Missing => "MISSING",
            Self::PresentValid => "PRESENT_VALID",
            Self::PresentInvalid => "PRESENT_INVALID",
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Value of one record field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Absent value.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Integer value (ids, offsets).
    Int(i64),
    /// Floating-point value (durations).
    Float(f64),
    /// Text value.
    Text(String),
    /// Ordered list of strings (captions, tags).
    List(Vec<String>),
}

impl FieldValue {
    /// Borrow as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as a string list.
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// Read as a float; integers are widened.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// One row of a subset's index: an ordered field map.
///
/// `captions` is always a list whose first element is the canonical caption.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleRecord {
    fields: IndexMap<String, FieldValue>,
}

impl SampleRecord {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a field, keeping its original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let _ = self.fields.insert(name.into(), value.into());
    }

    /// Insert a field only if it is not present yet.
    pub fn insert_if_absent(&mut self, name: &str, value: FieldValue) {
        let _ = self.fields.entry(name.to_string()).or_insert(value);
    }

    /// Look up a field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Whether the field exists.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Ordered captions; empty when the field is missing or not a list.
    pub fn captions(&self) -> &[String] {
        self.get(CAPTIONS_FIELD)
            .and_then(FieldValue::as_list)
            .unwrap_or(&[])
    }

    /// Mutable caption list, created on first use.
    pub fn captions_mut(&mut self) -> &mut Vec<String> {
        let entry = self
            .fields
            .entry(CAPTIONS_FIELD.to_string())
            .or_insert_with(|| FieldValue::List(Vec::new()));
        if !matches!(entry, FieldValue::List(_)) {
            *entry = FieldValue::List(Vec::new());
        }
        match entry {
            FieldValue::List(v) => v,
            _ => unreachable!("caption field normalized to a list above"),
        }
    }

    /// Audio file name.
    pub fn fname(&self) -> Option<&str> {
        self.get(FNAME_FIELD).and_then(FieldValue::as_str)
    }

    /// Audio path relative to the dataset version directory.
    pub fn fpath(&self) -> Option<&str> {
        self.get(FPATH_FIELD).and_then(FieldValue::as_str)
    }

    /// Iterate fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_file_normalizes_checksum_case() {
        let f = ExpectedFile::new("a.zip", FileTag::Archive, ResourceRef::Extracted)
            .with_size(10)
            .with_sha256("ABCDEF");
        assert_eq!(f.sha256.as_deref(), Some("abcdef"));
        assert_eq!(f.size, Some(10));
    }

    #[test]
    fn status_display_matches_report_names() {
        assert_eq!(FileStatus::Missing.to_string(), "MISSING");
        assert_eq!(FileStatus::PresentValid.to_string(), "PRESENT_VALID");
        assert_eq!(FileStatus::PresentInvalid.to_string(), "PRESENT_INVALID");
        assert!(FileStatus::PresentInvalid.needs_work());
        assert!(!FileStatus::PresentValid.needs_work());
    }

    #[test]
    fn record_keeps_field_order() {
        let record = SampleRecord::new()
            .with("fname", "a.flac")
            .with("captions", vec!["x".to_string()])
            .with("duration", 10.0);
        let names: Vec<&str> = record.fields().map(|(k, _)| k).collect();
        assert_eq!(names, ["fname", "captions", "duration"]);
    }

    #[test]
    fn captions_mut_creates_list() {
        let mut record = SampleRecord::new();
        record.captions_mut().push("hello".into());
        record.captions_mut().push("world".into());
        assert_eq!(record.captions(), ["hello", "world"]);
    }

    #[test]
    fn insert_if_absent_keeps_first_value() {
        let mut record = SampleRecord::new().with("author", "first");
        record.insert_if_absent("author", FieldValue::from("second"));
        assert_eq!(record.get("author").and_then(FieldValue::as_str), Some("first"));
    }

    #[test]
    fn record_json_is_a_plain_object() {
        let record = SampleRecord::new()
            .with("fname", "a.flac")
            .with("start_time", 30_i64)
            .with("duration", 9.5)
            .with("captions", vec!["a dog barks".to_string()])
            .with("author", FieldValue::Null);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["fname"], "a.flac");
        assert_eq!(json["start_time"], 30);
        assert_eq!(json["captions"][0], "a dog barks");
        assert!(json["author"].is_null());

        let back: SampleRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn field_value_widens_ints() {
        assert_eq!(FieldValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(FieldValue::Text("3".into()).as_f64(), None);
    }

    #[test]
    fn resource_describe() {
        let hub = ResourceRef::Hub {
            repo_id: "cvssp/WavCaps".into(),
            filename: "json_files/SoundBible/sb_final.json".into(),
            revision: None,
        };
        assert_eq!(
            hub.describe(),
            "hub:cvssp/WavCaps/json_files/SoundBible/sb_final.json"
        );
        let clip = ResourceRef::Clip {
            source_id: "abc".into(),
            start_s: 30.0,
            duration_s: 10.0,
        };
        assert_eq!(clip.describe(), "clip:abc@30");
    }
}
