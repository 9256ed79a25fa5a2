//! Built-in dataset descriptions.
//!
//! Every description is constructed on demand from static tables and returned
//! as an owned, immutable [`DatasetSpec`].

use std::fmt;
use std::str::FromStr;

use crate::errors::CatalogError;
use crate::spec::{
    ArchiveKind, ArchiveSet, AudioSource, DatasetCard, DatasetSpec, MetadataFormat,
    MetadataSource,
};
use crate::types::{ExpectedFile, FileTag, ResourceRef};

/// Datasets known to the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DatasetName {
    /// `AudioCaps` (`YouTube` clips, one caption per CSV row).
    AudioCaps,
    /// `WavCaps` (hub-hosted JSON and spanned zip archives).
    WavCaps,
}

impl DatasetName {
    /// All catalog entries.
    pub const ALL: [Self; 2] = [Self::AudioCaps, Self::WavCaps];

    /// Machine name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AudioCaps => "audiocaps",
            Self::WavCaps => "wavcaps",
        }
    }

    /// Valid subsets.
    pub fn subsets(self) -> &'static [&'static str] {
        match self {
            Self::AudioCaps => AUDIOCAPS_SUBSETS,
            Self::WavCaps => WAVCAPS_SUBSETS,
        }
    }

    /// Subset prepared when none is given.
    pub fn default_subset(self) -> &'static str {
        match self {
            Self::AudioCaps => "train",
            Self::WavCaps => "as",
        }
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetName {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audiocaps" => Ok(Self::AudioCaps),
            "wavcaps" => Ok(Self::WavCaps),
            _ => Err(CatalogError::UnknownDataset(s.to_string())),
        }
    }
}

/// Build the description of `(name, subset)`.
///
/// `revision` only applies to hub-hosted datasets; `None` selects the pinned
/// default revision.
pub fn dataset_spec(
    name: DatasetName,
    subset: &str,
    revision: Option<&str>,
) -> Result<DatasetSpec, CatalogError> {
    if !name.subsets().contains(&subset) {
        return Err(CatalogError::UnknownSubset {
            dataset: name.to_string(),
            subset: subset.to_string(),
            expected: name.subsets().join(", "),
        });
    }
    Ok(match name {
        DatasetName::AudioCaps => audiocaps(subset),
        DatasetName::WavCaps => wavcaps(subset, revision.unwrap_or(WAVCAPS_DEFAULT_REVISION)),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// AudioCaps
// ─────────────────────────────────────────────────────────────────────────────

const AUDIOCAPS_SUBSETS: &[&str] = &["train", "val", "test"];
const AUDIOCAPS_URL_BASE: &str = "https://raw.githubusercontent.com/cdjkim/audiocaps/master/dataset";
const AUDIOCAPS_CITATION: &str = r"@inproceedings{kim2019audiocaps,
    title     = {{AudioCaps}: Generating Captions for Audios in The Wild},
    author    = {Kim, Chris Dongjoo and Kim, Byeongchang and Lee, Hyunmin and Kim, Gunhee},
    booktitle = {NAACL-HLT},
    year      = 2019
}";

fn audiocaps(subset: &str) -> DatasetSpec {
    let csv_relpath = format!("metadata/{subset}.csv");
    let audio_dir = format!("audio/{subset}");
    let (captions_per_audio, expected) = match subset {
        "train" => (1, 49_838),
        "val" => (5, 495),
        _ => (5, 975),
    };

    DatasetSpec {
        name: DatasetName::AudioCaps.as_str().to_string(),
        pretty_name: "AudioCaps".to_string(),
        subset: subset.to_string(),
        version: "v1".to_string(),
        sample_rate: 32_000,
        files: vec![ExpectedFile::new(
            csv_relpath.clone(),
            FileTag::Metadata,
            ResourceRef::Url {
                url: format!("{AUDIOCAPS_URL_BASE}/{subset}.csv"),
            },
        )],
        metadata: vec![MetadataSource {
            relpath: csv_relpath,
            format: MetadataFormat::AudioCapsCsv {
                audio_ext: "flac".to_string(),
                audio_dir,
            },
        }],
        audio: AudioSource::Clips {
            format: "flac".to_string(),
        },
        expected_audio_count: Some(expected),
        card: DatasetCard {
            citation: AUDIOCAPS_CITATION.to_string(),
            homepage: "https://audiocaps.github.io/".to_string(),
            description: "AudioCaps: a large-scale dataset of audio clips from AudioSet with human-written captions.".to_string(),
            license: "MIT (annotations); audio subject to YouTube terms".to_string(),
            captions_per_audio,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WavCaps
// ─────────────────────────────────────────────────────────────────────────────

/// Hub repository of `WavCaps`.
pub const WAVCAPS_REPO_ID: &str = "cvssp/WavCaps";
/// Pinned `WavCaps` revision.
pub const WAVCAPS_DEFAULT_REVISION: &str = "85a0c21e26fa7696a5a74ce54fada99a9b43c6de";

const WAVCAPS_SUBSETS: &[&str] = &["as", "bbc", "fsd", "sb", "as_bbc_sb"];
const WAVCAPS_CITATION: &str = r"@article{mei2023WavCaps,
    title   = {Wav{C}aps: A {ChatGPT}-Assisted Weakly-Labelled Audio Captioning Dataset for Audio-Language Multimodal Research},
    author  = {Xinhao Mei and Chutong Meng and Haohe Liu and Qiuqiang Kong and Tom Ko and Chengqi Zhao and Mark D. Plumbley and Yuexian Zou and Wenwu Wang},
    year    = 2023,
    journal = {arXiv preprint arXiv:2303.17395}
}";

/// One upstream source of `WavCaps`.
struct WavCapsSource {
    name: &'static str,
    json: &'static str,
    /// Number of `.zNN` volumes before the final `.zip`; 0 means a single zip.
    spanned_volumes: usize,
    audio_count: usize,
}

const WAVCAPS_SOURCES: &[WavCapsSource] = &[
    WavCapsSource {
        name: "AudioSet_SL",
        json: "as_final.json",
        spanned_volumes: 7,
        audio_count: 108_317,
    },
    WavCapsSource {
        name: "BBC_Sound_Effects",
        json: "bbc_final.json",
        spanned_volumes: 25,
        audio_count: 31_201,
    },
    WavCapsSource {
        name: "FreeSound",
        json: "fsd_final.json",
        spanned_volumes: 99,
        audio_count: 262_300,
    },
    WavCapsSource {
        name: "SoundBible",
        json: "sb_final.json",
        spanned_volumes: 0,
        // The archive holds more files than the JSON lists (1232).
        audio_count: 1_320,
    },
];

fn wavcaps_uses_source(source: &str, subset: &str) -> bool {
    match source {
        "AudioSet_SL" => matches!(subset, "as" | "as_bbc_sb"),
        "BBC_Sound_Effects" => matches!(subset, "bbc" | "as_bbc_sb"),
        "FreeSound" => subset == "fsd",
        "SoundBible" => matches!(subset, "sb" | "as_bbc_sb"),
        _ => false,
    }
}

fn wavcaps(subset: &str, revision: &str) -> DatasetSpec {
    let hub = |filename: String| ResourceRef::Hub {
        repo_id: WAVCAPS_REPO_ID.to_string(),
        filename,
        revision: Some(revision.to_string()),
    };

    let mut files = Vec::new();
    let mut metadata = Vec::new();
    let mut sets = Vec::new();
    let mut expected = 0;

    for source in WAVCAPS_SOURCES
        .iter()
        .filter(|s| wavcaps_uses_source(s.name, subset))
    {
        let name = source.name;
        let audio_dir = format!("audio/{name}");
        let json_relpath = format!("metadata/{name}/{}", source.json);
        files.push(ExpectedFile::new(
            json_relpath.clone(),
            FileTag::Metadata,
            hub(format!("json_files/{name}/{}", source.json)),
        ));
        metadata.push(MetadataSource {
            relpath: json_relpath,
            format: MetadataFormat::WavCapsJson {
                source: name.to_string(),
                audio_dir: audio_dir.clone(),
            },
        });

        let mut parts: Vec<String> = (1..=source.spanned_volumes)
            .map(|i| format!("{name}.z{i:02}"))
            .collect();
        parts.push(format!("{name}.zip"));
        let part_relpaths: Vec<String> = parts
            .iter()
            .map(|p| format!("archives/{name}/{p}"))
            .collect();
        for (part, relpath) in parts.iter().zip(&part_relpaths) {
            files.push(ExpectedFile::new(
                relpath.clone(),
                FileTag::Archive,
                hub(format!("Zip_files/{name}/{part}")),
            ));
        }
        sets.push(ArchiveSet {
            name: name.to_string(),
            parts: part_relpaths,
            kind: if source.spanned_volumes > 0 {
                ArchiveKind::Spanned
            } else {
                ArchiveKind::Single
            },
            audio_dir,
            entry_suffix: ".flac".to_string(),
        });
        expected += source.audio_count;
    }

    DatasetSpec {
        name: DatasetName::WavCaps.as_str().to_string(),
        pretty_name: "WavCaps".to_string(),
        subset: subset.to_string(),
        version: revision.to_string(),
        sample_rate: 32_000,
        files,
        metadata,
        audio: AudioSource::Archives { sets },
        expected_audio_count: Some(expected),
        card: DatasetCard {
            citation: WAVCAPS_CITATION.to_string(),
            homepage: "https://huggingface.co/datasets/cvssp/WavCaps".to_string(),
            description: "WavCaps: A ChatGPT-Assisted Weakly-Labelled Audio Captioning Dataset for Audio-Language Multimodal Research.".to_string(),
            license: "CC BY 4.0 (academic use only)".to_string(),
            captions_per_audio: 1,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
