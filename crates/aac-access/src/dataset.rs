//! Index-based access to a prepared subset.
//!
//! Opening a subset only loads its persisted index. Cheap fields come straight
//! from the record; the waveform (and a duration the metadata does not carry)
//! is decoded from disk on request.

use std::path::{Path, PathBuf};

use aac_core::types::{CAPTIONS_FIELD, DURATION_FIELD, FNAME_FIELD, FPATH_FIELD};
use aac_core::{DatasetLayout, DatasetSpec, FieldValue, IndexError, IndexTable, SampleRecord};
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::audio::{Waveform, load_audio};
use crate::errors::{AccessError, Result};

/// Decoded waveform field.
pub const AUDIO_FIELD: &str = "audio";
/// Position of the sample in the subset.
pub const INDEX_FIELD: &str = "index";
/// Dataset machine name.
pub const DATASET_FIELD: &str = "dataset";
/// Subset identifier.
pub const SUBSET_FIELD: &str = "subset";
/// Sample rate of served audio.
pub const SR_FIELD: &str = "sr";

/// Fields computed per item rather than stored in the record.
const VIRTUAL_FIELDS: &[&str] = &[INDEX_FIELD, DATASET_FIELD, SUBSET_FIELD, SR_FIELD];

/// One value of an [`Item`].
#[derive(Clone, Debug, PartialEq)]
pub enum ItemValue {
    /// Stored or computed scalar/list field.
    Field(FieldValue),
    /// Decoded audio.
    Audio(Waveform),
}

impl ItemValue {
    /// Borrow as a field value.
    pub fn as_field(&self) -> Option<&FieldValue> {
        match self {
            Self::Field(v) => Some(v),
            Self::Audio(_) => None,
        }
    }

    /// Borrow as a waveform.
    pub fn as_audio(&self) -> Option<&Waveform> {
        match self {
            Self::Audio(w) => Some(w),
            Self::Field(_) => None,
        }
    }
}

/// Requested fields of one sample, in request order.
pub type Item = IndexMap<String, ItemValue>;

/// Read-only view of one prepared (dataset, subset).
#[derive(Clone, Debug)]
pub struct CaptionDataset {
    spec: DatasetSpec,
    layout: DatasetLayout,
    table: IndexTable,
}

impl CaptionDataset {
    /// Open the prepared subset described by `spec` under `root`.
    ///
    /// Fails with [`AccessError::NotPrepared`] when the index is missing and
    /// with [`AccessError::Index`] when it is unreadable or stale.
    pub fn open(root: impl AsRef<Path>, spec: DatasetSpec) -> Result<Self> {
        let layout = DatasetLayout::new(root, &spec);
        let path = layout.index_path(&spec.subset);
        let table = match IndexTable::load(&path, &spec.name, &spec.subset) {
            Ok(table) => table,
            Err(IndexError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(AccessError::NotPrepared {
                    label: spec.label(),
                    reason: format!("index {} not found", path.display()),
                });
            }
            Err(e) => return Err(e.into()),
        };
        if table.version != spec.version || table.sample_rate != spec.sample_rate {
            return Err(AccessError::NotPrepared {
                label: spec.label(),
                reason: format!(
                    "index was built for {}@{}Hz, expected {}@{}Hz",
                    table.version, table.sample_rate, spec.version, spec.sample_rate
                ),
            });
        }
        info!(subset = %spec.label(), records = table.len(), "opened subset");
        Ok(Self {
            spec,
            layout,
            table,
        })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the subset has no samples.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Description of the subset.
    pub fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    /// Sample rate of served audio.
    pub fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    /// Every field name `get` accepts, record fields first.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: IndexMap<String, ()> = IndexMap::new();
        let _ = names.insert(AUDIO_FIELD.to_string(), ());
        for record in &self.table.records {
            for (name, _) in record.fields() {
                if !names.contains_key(name) {
                    let _ = names.insert(name.to_string(), ());
                }
            }
        }
        for name in VIRTUAL_FIELDS.iter().chain([&DURATION_FIELD]) {
            let _ = names.entry((*name).to_string()).or_insert(());
        }
        names.into_keys().collect()
    }

    /// Fields returned by [`Self::get_default`].
    pub fn default_fields(&self) -> Vec<String> {
        let mut fields = vec![
            AUDIO_FIELD.to_string(),
            CAPTIONS_FIELD.to_string(),
            INDEX_FIELD.to_string(),
            SR_FIELD.to_string(),
        ];
        if let Some(first) = self.table.records.first() {
            for name in [FNAME_FIELD, DURATION_FIELD] {
                if first.contains(name) {
                    fields.push(name.to_string());
                }
            }
        }
        fields
    }

    /// Sample `index` with the requested fields.
    pub fn get(&self, index: usize, fields: &[&str]) -> Result<Item> {
        let record = self.record(index)?;
        let mut waveform: Option<Waveform> = None;
        let mut item = Item::with_capacity(fields.len());

        for &name in fields {
            let value = match name {
                AUDIO_FIELD => {
                    let wave = match waveform.take() {
                        Some(w) => w,
                        None => self.decode(record)?,
                    };
                    waveform = Some(wave.clone());
                    ItemValue::Audio(wave)
                }
                DURATION_FIELD if !record.contains(DURATION_FIELD) => {
                    let wave = match waveform.take() {
                        Some(w) => w,
                        None => self.decode(record)?,
                    };
                    let secs = wave.duration_secs();
                    waveform = Some(wave);
                    ItemValue::Field(FieldValue::Float(secs))
                }
                _ => ItemValue::Field(self.cheap_field(index, record, name)?),
            };
            let _ = item.insert(name.to_string(), value);
        }
        Ok(item)
    }

    /// Sample `index` with [`Self::default_fields`].
    pub fn get_default(&self, index: usize) -> Result<Item> {
        let fields = self.default_fields();
        let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        self.get(index, &refs)
    }

    /// Captions of sample `index`, canonical caption first.
    pub fn captions(&self, index: usize) -> Result<&[String]> {
        Ok(self.record(index)?.captions())
    }

    /// Decoded audio of sample `index`.
    pub fn audio(&self, index: usize) -> Result<Waveform> {
        self.decode(self.record(index)?)
    }

    /// Absolute audio path of sample `index`.
    pub fn audio_path(&self, index: usize) -> Result<PathBuf> {
        let record = self.record(index)?;
        let fpath = record
            .fpath()
            .ok_or_else(|| AccessError::UnknownField(FPATH_FIELD.into()))?;
        Ok(self.layout.resolve(fpath))
    }

    /// One field across all samples, without decoding audio.
    pub fn column(&self, name: &str) -> Result<Vec<FieldValue>> {
        if name == AUDIO_FIELD {
            return Err(AccessError::UnknownField(format!(
                "{name} (audio is not available as a column)"
            )));
        }
        self.table
            .records
            .iter()
            .enumerate()
            .map(|(i, record)| self.cheap_field(i, record, name))
            .collect()
    }

    fn record(&self, index: usize) -> Result<&SampleRecord> {
        self.table
            .records
            .get(index)
            .ok_or(AccessError::IndexOutOfRange {
                index,
                len: self.table.len(),
            })
    }

    #[allow(clippy::cast_possible_wrap)]
    fn cheap_field(&self, index: usize, record: &SampleRecord, name: &str) -> Result<FieldValue> {
        let value = match name {
            INDEX_FIELD => FieldValue::Int(index as i64),
            DATASET_FIELD => FieldValue::Text(self.spec.name.clone()),
            SUBSET_FIELD => FieldValue::Text(self.spec.subset.clone()),
            SR_FIELD => FieldValue::Int(i64::from(self.spec.sample_rate)),
            other => record
                .get(other)
                .cloned()
                .ok_or_else(|| AccessError::UnknownField(other.to_string()))?,
        };
        Ok(value)
    }

    fn decode(&self, record: &SampleRecord) -> Result<Waveform> {
        let fpath = record
            .fpath()
            .ok_or_else(|| AccessError::UnknownField(FPATH_FIELD.into()))?;
        let path = self.layout.resolve(fpath);
        if !path.is_file() {
            return Err(AccessError::NotPrepared {
                label: self.spec.label(),
                reason: format!("audio file {fpath} missing"),
            });
        }
        debug!(path = %path.display(), "decoding audio");
        load_audio(&path, self.spec.sample_rate)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
