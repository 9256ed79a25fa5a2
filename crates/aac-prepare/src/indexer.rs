//! Metadata parsing and caption aggregation.
//!
//! Every metadata format is first turned into rows holding one caption each,
//! then [`aggregate`] merges rows that point at the same audio file. Output
//! order is the order in which audio files are first encountered, reading
//! the metadata files in their configured order.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use aac_core::spec::{MetadataFormat, MetadataSource};
use aac_core::types::{CAPTIONS_FIELD, DURATION_FIELD, FNAME_FIELD, FPATH_FIELD};
use aac_core::{FieldValue, IndexError, SampleRecord};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

/// Per-row id list of `AudioCaps`; concatenated like captions.
pub const AUDIOCAPS_IDS_FIELD: &str = "audiocaps_ids";

/// Fields whose lists are concatenated when rows are aggregated.
pub const LIST_FIELDS: &[&str] = &[CAPTIONS_FIELD, AUDIOCAPS_IDS_FIELD];

/// Columns `WavCaps` sources may omit, with their defaults.
const WAVCAPS_OPTIONAL_TEXT: &[&str] = &["author", "description", "download_link", "href"];

/// Parse every metadata source and aggregate the rows into records.
pub fn build_index(
    version_dir: &Path,
    sources: &[MetadataSource],
) -> Result<Vec<SampleRecord>, IndexError> {
    let mut rows = Vec::new();
    for source in sources {
        let parsed = parse_metadata(version_dir, source)?;
        debug!(file = %source.relpath, rows = parsed.len(), "parsed metadata");
        rows.extend(parsed);
    }
    let records = aggregate(rows, LIST_FIELDS);
    if records.is_empty() {
        return Err(IndexError::Empty);
    }
    info!(records = records.len(), "metadata indexed");
    Ok(records)
}

/// Parse one metadata file into single-caption rows.
pub fn parse_metadata(
    version_dir: &Path,
    source: &MetadataSource,
) -> Result<Vec<SampleRecord>, IndexError> {
    let path = source
        .relpath
        .split('/')
        .fold(version_dir.to_path_buf(), |acc, c| acc.join(c));
    let file = File::open(&path).map_err(|e| IndexError::io(&path, e))?;
    let reader = BufReader::new(file);

    match &source.format {
        MetadataFormat::AudioCapsCsv {
            audio_ext,
            audio_dir,
        } => parse_audiocaps_csv(reader, &path, audio_ext, audio_dir),
        MetadataFormat::WavCapsJson {
            source: name,
            audio_dir,
        } => parse_wavcaps_json(reader, &path, name, audio_dir),
    }
}

/// Merge rows sharing an audio file.
///
/// The key is `fpath` (falling back to `fname`). Fields in `list_fields`
/// are concatenated in encounter order; for every other field the first
/// value seen wins. Rows without a key are kept as they are.
pub fn aggregate(rows: Vec<SampleRecord>, list_fields: &[&str]) -> Vec<SampleRecord> {
    let mut merged: IndexMap<String, SampleRecord> = IndexMap::new();
    let mut unkeyed = Vec::new();

    for row in rows {
        let Some(key) = row.fpath().or_else(|| row.fname()).map(ToOwned::to_owned) else {
            unkeyed.push(row);
            continue;
        };
        match merged.get_mut(&key) {
            None => {
                let _ = merged.insert(key, row);
            }
            Some(existing) => {
                for (name, value) in row.fields() {
                    if let (true, FieldValue::List(items)) = (list_fields.contains(&name), value) {
                        append_list(existing, name, items);
                    } else {
                        existing.insert_if_absent(name, value.clone());
                    }
                }
            }
        }
    }

    merged.into_values().chain(unkeyed).collect()
}

fn append_list(record: &mut SampleRecord, name: &str, items: &[String]) {
    if name == CAPTIONS_FIELD {
        record.captions_mut().extend_from_slice(items);
        return;
    }
    let mut list = record
        .get(name)
        .and_then(FieldValue::as_list)
        .map(<[String]>::to_vec)
        .unwrap_or_default();
    list.extend_from_slice(items);
    record.insert(name, FieldValue::List(list));
}

// ─────────────────────────────────────────────────────────────────────────────
// AudioCaps CSV
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AudioCapsRow {
    audiocap_id: String,
    youtube_id: String,
    start_time: f64,
    caption: String,
}

/// Audio file name of an `AudioCaps` clip.
pub fn audiocaps_fname(youtube_id: &str, start_time: f64, ext: &str) -> String {
    format!("{youtube_id}_{}.{ext}", format_seconds(start_time))
}

#[allow(clippy::cast_possible_truncation)]
fn format_seconds(seconds: f64) -> String {
    if seconds.fract() == 0.0 && seconds.abs() < 1e15 {
        format!("{}", seconds as i64)
    } else {
        format!("{seconds}")
    }
}

#[allow(clippy::cast_possible_truncation)]
fn start_time_value(seconds: f64) -> FieldValue {
    if seconds.fract() == 0.0 && seconds.abs() < 1e15 {
        FieldValue::Int(seconds as i64)
    } else {
        FieldValue::Float(seconds)
    }
}

fn parse_audiocaps_csv(
    reader: impl std::io::Read,
    path: &Path,
    audio_ext: &str,
    audio_dir: &str,
) -> Result<Vec<SampleRecord>, IndexError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut rows = Vec::new();
    for (line, result) in csv.deserialize::<AudioCapsRow>().enumerate() {
        let row = result.map_err(|e| IndexError::malformed(path, format!("row {}: {e}", line + 1)))?;
        let fname = audiocaps_fname(&row.youtube_id, row.start_time, audio_ext);
        rows.push(
            SampleRecord::new()
                .with(CAPTIONS_FIELD, vec![row.caption])
                .with(FPATH_FIELD, format!("{audio_dir}/{fname}"))
                .with(FNAME_FIELD, fname)
                .with("youtube_id", row.youtube_id)
                .with("start_time", start_time_value(row.start_time))
                .with(AUDIOCAPS_IDS_FIELD, vec![row.audiocap_id]),
        );
    }
    Ok(rows)
}

// ─────────────────────────────────────────────────────────────────────────────
// WavCaps JSON
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WavCapsFile {
    data: Vec<serde_json::Map<String, Value>>,
}

/// Audio file name of a `WavCaps` entry of `source`.
pub fn wavcaps_fname(source: &str, id: &str) -> String {
    if source == "AudioSet_SL" {
        id.replace(".wav", ".flac")
    } else {
        format!("{id}.flac")
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_wavcaps_json(
    reader: impl std::io::Read,
    path: &Path,
    source: &str,
    audio_dir: &str,
) -> Result<Vec<SampleRecord>, IndexError> {
    let file: WavCapsFile = serde_json::from_reader(reader)
        .map_err(|e| IndexError::malformed(path, e.to_string()))?;

    let mut rows = Vec::with_capacity(file.data.len());
    for (i, entry) in file.data.iter().enumerate() {
        let missing = |column: &str| IndexError::malformed(path, format!("entry {i}: missing '{column}'"));

        let id = entry.get("id").map(value_to_string).ok_or_else(|| missing("id"))?;
        let caption = entry
            .get("caption")
            .and_then(Value::as_str)
            .ok_or_else(|| missing("caption"))?;
        let duration = match entry.get(DURATION_FIELD) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| missing(DURATION_FIELD))?;

        let fname = wavcaps_fname(source, &id);
        let mut record = SampleRecord::new()
            .with(CAPTIONS_FIELD, vec![caption.to_string()])
            .with(FPATH_FIELD, format!("{audio_dir}/{fname}"))
            .with(FNAME_FIELD, fname)
            .with("id", id)
            .with("source", source)
            .with(DURATION_FIELD, duration);
        for column in WAVCAPS_OPTIONAL_TEXT {
            let text = entry.get(*column).map(value_to_string).unwrap_or_default();
            record.insert(*column, text);
        }
        let tags: Vec<String> = entry
            .get("tags")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(value_to_string).collect())
            .unwrap_or_default();
        record.insert("tags", tags);
        rows.push(record);
    }
    Ok(rows)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
