#![allow(missing_docs, unused_results)]

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use aac_core::retry::RetryConfig;
use aac_core::spec::{
    ArchiveKind, ArchiveSet, AudioSource, DatasetCard, MetadataFormat, MetadataSource,
};
use aac_core::{
    DatasetLayout, DatasetSpec, ExpectedFile, FieldValue, FileTag, IndexTable, ResourceRef,
};
use aac_prepare::{
    FetchError, FetchStrategy, PrepareError, PrepareOptions, PrepareState, Preparer,
    ProcessOptions, ProcessOutput, ProcessRunner, TokioProcessRunner,
};
use aac_settings::{PartialPolicy, ToolPaths};
use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

const CSV_URL: &str = "https://data.test/val.csv";
const JSON_URL: &str = "https://data.test/mini.json";
const ZIP_URL: &str = "https://data.test/mini.zip";
const SPAN_Z01_URL: &str = "https://data.test/Span.z01";
const SPAN_ZIP_URL: &str = "https://data.test/Span.zip";

// Two captions for the first clip, one for each of the others.
const VAL_CSV: &str = "\
audiocap_id,youtube_id,start_time,caption
1,aaa,0,A dog barks
2,bbb,30,Rain falls
3,aaa,0,A dog is barking loudly
4,ccc,10,Birds chirp
5,ddd,20,A car passes
6,eee,40,Wind blows
";

/// Serves URLs from memory and synthesizes clips.
#[derive(Default)]
struct FakeSources {
    urls: HashMap<String, Vec<u8>>,
    unavailable: HashSet<String>,
    cancel_after: Option<(usize, CancellationToken)>,
    url_calls: AtomicUsize,
    clip_calls: AtomicUsize,
}

impl FakeSources {
    fn with_url(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.urls.insert(url.to_string(), body.into());
        self
    }

    fn unavailable(mut self, ids: &[&str]) -> Self {
        self.unavailable = ids.iter().map(ToString::to_string).collect();
        self
    }

    fn cancel_after(mut self, clips: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((clips, token));
        self
    }

    fn calls(&self) -> (usize, usize) {
        (
            self.url_calls.load(Ordering::SeqCst),
            self.clip_calls.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl FetchStrategy for FakeSources {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn supports(&self, resource: &ResourceRef) -> bool {
        matches!(resource, ResourceRef::Url { .. } | ResourceRef::Clip { .. })
    }

    async fn retrieve(
        &self,
        resource: &ResourceRef,
        tmp: &Path,
        _cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        match resource {
            ResourceRef::Url { url } => {
                self.url_calls.fetch_add(1, Ordering::SeqCst);
                let Some(body) = self.urls.get(url) else {
                    return Err(FetchError::Http {
                        resource: url.clone(),
                        status: 404,
                        retry_after_ms: None,
                    });
                };
                std::fs::write(tmp, body)?;
                Ok(())
            }
            ResourceRef::Clip { source_id, .. } => {
                let n = self.clip_calls.fetch_add(1, Ordering::SeqCst) + 1;
                if self.unavailable.contains(source_id) {
                    return Err(FetchError::Unavailable {
                        source_id: source_id.clone(),
                        reason: "Video unavailable".into(),
                    });
                }
                std::fs::write(tmp, format!("clip:{source_id}"))?;
                if let Some((after, token)) = &self.cancel_after {
                    if n >= *after {
                        token.cancel();
                    }
                }
                Ok(())
            }
            other => Err(FetchError::Unsupported(other.describe())),
        }
    }
}

fn card() -> DatasetCard {
    DatasetCard {
        citation: String::new(),
        homepage: "https://data.test".into(),
        description: "test dataset".into(),
        license: "CC-BY-4.0".into(),
        captions_per_audio: 1,
    }
}

fn clip_spec() -> DatasetSpec {
    DatasetSpec {
        name: "audiocaps".into(),
        pretty_name: "AudioCaps".into(),
        subset: "val".into(),
        version: "v1".into(),
        sample_rate: 32_000,
        files: vec![ExpectedFile::new(
            "metadata/val.csv",
            FileTag::Metadata,
            ResourceRef::Url { url: CSV_URL.into() },
        )],
        metadata: vec![MetadataSource {
            relpath: "metadata/val.csv".into(),
            format: MetadataFormat::AudioCapsCsv {
                audio_ext: "flac".into(),
                audio_dir: "audio/val".into(),
            },
        }],
        audio: AudioSource::Clips {
            format: "flac".into(),
        },
        expected_audio_count: Some(5),
        card: card(),
    }
}

fn archive_spec() -> DatasetSpec {
    DatasetSpec {
        name: "wavcaps".into(),
        pretty_name: "WavCaps".into(),
        subset: "mini".into(),
        version: "v1".into(),
        sample_rate: 32_000,
        files: vec![
            ExpectedFile::new(
                "metadata/mini.json",
                FileTag::Metadata,
                ResourceRef::Url { url: JSON_URL.into() },
            ),
            ExpectedFile::new(
                "archives/Mini/Mini.zip",
                FileTag::Archive,
                ResourceRef::Url { url: ZIP_URL.into() },
            ),
        ],
        metadata: vec![MetadataSource {
            relpath: "metadata/mini.json".into(),
            format: MetadataFormat::WavCapsJson {
                source: "Mini".into(),
                audio_dir: "audio/Mini".into(),
            },
        }],
        audio: AudioSource::Archives {
            sets: vec![ArchiveSet {
                name: "Mini".into(),
                parts: vec!["archives/Mini/Mini.zip".into()],
                kind: ArchiveKind::Single,
                audio_dir: "audio/Mini".into(),
                entry_suffix: ".flac".into(),
            }],
        },
        expected_audio_count: Some(2),
        card: card(),
    }
}

fn options() -> PrepareOptions {
    PrepareOptions {
        retry: RetryConfig::none(),
        concurrency: 2,
        ..PrepareOptions::default()
    }
}

fn preparer(
    root: &Path,
    spec: DatasetSpec,
    sources: &Arc<FakeSources>,
    opts: PrepareOptions,
) -> Preparer {
    Preparer::new(
        root,
        spec,
        Arc::clone(sources) as Arc<dyn FetchStrategy>,
        Arc::new(TokioProcessRunner),
        opts,
    )
}

fn load_index(root: &Path, spec: &DatasetSpec) -> IndexTable {
    let layout = DatasetLayout::new(root, spec);
    IndexTable::load(&layout.index_path(&spec.subset), &spec.name, &spec.subset).unwrap()
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let opts = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in entries {
        zip.start_file(*name, opts).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

// ─────────────────────────────────────────────────────────────────────────────
// Clip-based subsets
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn prepares_clip_subset_and_aggregates_captions() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(FakeSources::default().with_url(CSV_URL, VAL_CSV));
    let mut prep = preparer(root.path(), clip_spec(), &sources, options());

    let report = prep.prepare().await.unwrap();
    assert_eq!(report.state, PrepareState::Ready);
    assert_eq!(
        report.transitions,
        [
            PrepareState::Unchecked,
            PrepareState::Downloading,
            PrepareState::Extracting,
            PrepareState::Indexing,
            PrepareState::Ready,
        ]
    );
    assert_eq!(report.counts.metadata_fetched, 1);
    assert_eq!(report.counts.records_indexed, 5);
    assert_eq!(sources.calls(), (1, 5));

    let table = load_index(root.path(), &clip_spec());
    assert_eq!(table.len(), 5);
    let first = &table.records[0];
    assert_eq!(first.fname(), Some("aaa_0.flac"));
    assert_eq!(first.captions(), ["A dog barks", "A dog is barking loudly"]);
    assert_eq!(table.records[1].fname(), Some("bbb_30.flac"));
    assert_eq!(
        std::fs::read_to_string(root.path().join("AudioCaps/v1/audio/val/ccc_10.flac")).unwrap(),
        "clip:ccc"
    );
}

#[tokio::test]
async fn second_run_on_ready_subset_does_nothing() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(FakeSources::default().with_url(CSV_URL, VAL_CSV));

    preparer(root.path(), clip_spec(), &sources, options())
        .prepare()
        .await
        .unwrap();
    let before = load_index(root.path(), &clip_spec());
    let calls = sources.calls();

    let report = preparer(root.path(), clip_spec(), &sources, options())
        .prepare()
        .await
        .unwrap();
    assert_eq!(report.transitions, [PrepareState::Unchecked, PrepareState::Ready]);
    assert_eq!(report.counts.work_done(), 0);
    assert_eq!(report.audio.valid, 5);
    assert_eq!(sources.calls(), calls);
    assert_eq!(load_index(root.path(), &clip_spec()), before);
}

#[tokio::test]
async fn check_reflects_prepared_subset() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(FakeSources::default().with_url(CSV_URL, VAL_CSV));
    let mut prep = preparer(root.path(), clip_spec(), &sources, options());

    assert!(!prep.check().await.unwrap().ready);
    prep.prepare().await.unwrap();

    let check = prep.check().await.unwrap();
    assert!(check.ready, "{check:?}");
    assert_eq!(check.indexed, Some(5));
    assert_eq!(check.label, "audiocaps/val");

    std::fs::remove_file(root.path().join("AudioCaps/v1/audio/val/ddd_20.flac")).unwrap();
    let check = prep.check().await.unwrap();
    assert!(!check.ready);
    assert_eq!(check.audio.unwrap().missing, 1);
}

#[tokio::test]
async fn tolerant_policy_drops_unavailable_clips() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(
        FakeSources::default()
            .with_url(CSV_URL, VAL_CSV)
            .unavailable(&["bbb", "eee"]),
    );
    let opts = PrepareOptions {
        partial: PartialPolicy::tolerant(0.5),
        ..options()
    };

    let report = preparer(root.path(), clip_spec(), &sources, opts)
        .prepare()
        .await
        .unwrap();
    assert_eq!(report.counts.records_indexed, 3);
    assert_eq!(report.counts.records_dropped, 2);
    let clips = report.clips.unwrap();
    assert_eq!(clips.succeeded.len(), 3);
    assert_eq!(clips.failed.len(), 2);
    assert!(clips.failed.iter().all(|f| f.permanent));

    let table = load_index(root.path(), &clip_spec());
    let names: Vec<&str> = table.records.iter().filter_map(|r| r.fname()).collect();
    assert_eq!(names, ["aaa_0.flac", "ccc_10.flac", "ddd_20.flac"]);

    let failures = root.path().join("AudioCaps/v1/metadata/val_fetch_failures.json");
    let text = std::fs::read_to_string(failures).unwrap();
    assert!(text.contains("bbb_30.flac"), "{text}");
}

#[tokio::test]
async fn strict_policy_fails_on_unavailable_clips() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(
        FakeSources::default()
            .with_url(CSV_URL, VAL_CSV)
            .unavailable(&["bbb", "eee"]),
    );
    let mut prep = preparer(root.path(), clip_spec(), &sources, options());

    let err = prep.prepare().await.unwrap_err();
    assert_matches!(err, PrepareError::Incomplete { missing: 2, total: 5 });
    assert_eq!(prep.state(), PrepareState::Failed);
    assert!(prep.report().error.is_some());
    let layout = DatasetLayout::new(root.path(), &clip_spec());
    assert!(!layout.index_path("val").exists());
    assert!(layout.failures_path("val").exists());
}

#[tokio::test]
async fn cancelled_run_resumes_without_refetching() {
    let root = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let first = Arc::new(
        FakeSources::default()
            .with_url(CSV_URL, VAL_CSV)
            .cancel_after(2, token.clone()),
    );
    let opts = PrepareOptions {
        concurrency: 1,
        cancel: token,
        ..options()
    };

    let err = preparer(root.path(), clip_spec(), &first, opts)
        .prepare()
        .await
        .unwrap_err();
    assert_matches!(err, PrepareError::Cancelled);
    assert_eq!(first.calls(), (1, 2));

    let second = Arc::new(FakeSources::default().with_url(CSV_URL, VAL_CSV));
    let report = preparer(root.path(), clip_spec(), &second, options())
        .prepare()
        .await
        .unwrap();
    assert_eq!(report.state, PrepareState::Ready);
    assert_eq!(report.counts.metadata_fetched, 0);
    assert_eq!(second.calls(), (0, 3));
}

#[tokio::test]
async fn missing_metadata_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(FakeSources::default());
    let mut prep = preparer(root.path(), clip_spec(), &sources, options());

    let err = prep.prepare().await.unwrap_err();
    match err {
        PrepareError::Fetch { stage, file, .. } => {
            assert_eq!(stage, PrepareState::Downloading);
            assert_eq!(file, "metadata/val.csv");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(sources.calls(), (1, 0));
}

#[tokio::test]
async fn force_refetches_metadata_and_rebuilds() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(FakeSources::default().with_url(CSV_URL, VAL_CSV));
    preparer(root.path(), clip_spec(), &sources, options())
        .prepare()
        .await
        .unwrap();

    let opts = PrepareOptions {
        force: true,
        ..options()
    };
    let report = preparer(root.path(), clip_spec(), &sources, opts)
        .prepare()
        .await
        .unwrap();
    assert_eq!(report.counts.metadata_fetched, 1);
    assert_eq!(report.counts.records_indexed, 5);
    // audio already on disk is kept
    assert_eq!(sources.calls(), (2, 5));
}

// ─────────────────────────────────────────────────────────────────────────────
// Archive-based subsets
// ─────────────────────────────────────────────────────────────────────────────

fn archive_sources() -> FakeSources {
    let json = serde_json::json!({
        "data": [
            {"id": "1", "caption": "A bell rings", "duration": 2.5, "tags": ["bell"]},
            {"id": 2, "caption": "Water drips", "duration": "4.0"},
        ]
    });
    let zip = zip_bytes(&[
        ("Mini/1.flac", &b"one"[..]),
        ("Mini/2.flac", &b"two"[..]),
        ("Mini/readme.txt", &b"ignored"[..]),
    ]);
    FakeSources::default()
        .with_url(JSON_URL, json.to_string())
        .with_url(ZIP_URL, zip)
}

#[tokio::test]
async fn prepares_archive_subset() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(archive_sources());
    let report = preparer(root.path(), archive_spec(), &sources, options())
        .prepare()
        .await
        .unwrap();

    assert_eq!(report.counts.metadata_fetched, 1);
    assert_eq!(report.counts.archives_fetched, 1);
    assert_eq!(report.counts.entries_extracted, 2);
    assert!(report.clips.is_none());

    let audio = root.path().join("WavCaps/v1/audio/Mini");
    assert_eq!(std::fs::read(audio.join("1.flac")).unwrap(), b"one");
    assert_eq!(std::fs::read(audio.join("2.flac")).unwrap(), b"two");
    assert!(!audio.join("readme.txt").exists());

    let table = load_index(root.path(), &archive_spec());
    assert_eq!(table.len(), 2);
    assert_eq!(
        table.records[1].get("duration").and_then(FieldValue::as_f64),
        Some(4.0)
    );
}

#[tokio::test]
async fn clean_archives_removes_parts_after_success() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(archive_sources());
    let opts = PrepareOptions {
        clean_archives: true,
        ..options()
    };
    preparer(root.path(), archive_spec(), &sources, opts)
        .prepare()
        .await
        .unwrap();

    assert!(!root.path().join("WavCaps/v1/archives/Mini/Mini.zip").exists());
    assert!(root.path().join("WavCaps/v1/audio/Mini/1.flac").exists());

    // Audio is intact, so the subset stays ready without its archives.
    let calls = sources.calls();
    let report = preparer(root.path(), archive_spec(), &sources, options())
        .prepare()
        .await
        .unwrap();
    assert_eq!(report.transitions, [PrepareState::Unchecked, PrepareState::Ready]);
    assert_eq!(sources.calls(), calls);
}

#[tokio::test]
async fn corrupt_archive_fails_in_extracting() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(archive_sources().with_url(ZIP_URL, b"not a zip".to_vec()));
    let mut prep = preparer(root.path(), archive_spec(), &sources, options());

    let err = prep.prepare().await.unwrap_err();
    assert_eq!(err.stage(), Some(PrepareState::Extracting), "{err}");
    assert_matches!(err, PrepareError::Extract { .. });
}

#[tokio::test]
async fn stale_index_schema_triggers_rebuild() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(FakeSources::default().with_url(CSV_URL, VAL_CSV));
    preparer(root.path(), clip_spec(), &sources, options())
        .prepare()
        .await
        .unwrap();
    let fresh = load_index(root.path(), &clip_spec());
    let calls = sources.calls();

    let index_path = DatasetLayout::new(root.path(), &clip_spec()).index_path("val");
    let mut json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&index_path).unwrap()).unwrap();
    json["schemaVersion"] = serde_json::json!(0);
    std::fs::write(&index_path, json.to_string()).unwrap();

    let mut prep = preparer(root.path(), clip_spec(), &sources, options());
    assert!(!prep.check().await.unwrap().ready);
    let report = prep.prepare().await.unwrap();
    assert_eq!(
        report.transitions,
        [
            PrepareState::Unchecked,
            PrepareState::Downloading,
            PrepareState::Extracting,
            PrepareState::Indexing,
            PrepareState::Ready,
        ]
    );
    assert_eq!(report.counts.records_indexed, 5);
    // metadata and audio were valid, only the table is rewritten
    assert_eq!(sources.calls(), calls);

    let rebuilt = load_index(root.path(), &clip_spec());
    assert_eq!(rebuilt.schema_version, aac_core::table::SCHEMA_VERSION);
    assert_eq!(rebuilt, fresh);
}

// ─────────────────────────────────────────────────────────────────────────────
// Spanned archives
// ─────────────────────────────────────────────────────────────────────────────

/// Stands in for `zip -FF`: copies the main volume to the output path.
#[derive(Default)]
struct RecordingZip {
    timeouts: parking_lot::Mutex<Vec<u64>>,
}

impl RecordingZip {
    fn merges(&self) -> usize {
        self.timeouts.lock().len()
    }
}

#[async_trait]
impl ProcessRunner for RecordingZip {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        opts: &ProcessOptions,
    ) -> std::io::Result<ProcessOutput> {
        assert_eq!(program, "/opt/bin/zip");
        assert_eq!(args[0], "-FF");
        self.timeouts.lock().push(opts.timeout_ms);
        std::fs::copy(&args[1], &args[3])?;
        Ok(ProcessOutput::default())
    }
}

fn spanned_spec() -> DatasetSpec {
    let parts = ["archives/Span/Span.z01", "archives/Span/Span.zip"];
    DatasetSpec {
        subset: "span".into(),
        files: vec![
            ExpectedFile::new(
                "metadata/mini.json",
                FileTag::Metadata,
                ResourceRef::Url { url: JSON_URL.into() },
            ),
            ExpectedFile::new(
                parts[0],
                FileTag::Archive,
                ResourceRef::Url {
                    url: SPAN_Z01_URL.into(),
                },
            ),
            ExpectedFile::new(
                parts[1],
                FileTag::Archive,
                ResourceRef::Url {
                    url: SPAN_ZIP_URL.into(),
                },
            ),
        ],
        metadata: vec![MetadataSource {
            relpath: "metadata/mini.json".into(),
            format: MetadataFormat::WavCapsJson {
                source: "Span".into(),
                audio_dir: "audio/Span".into(),
            },
        }],
        audio: AudioSource::Archives {
            sets: vec![ArchiveSet {
                name: "Span".into(),
                parts: parts.iter().map(ToString::to_string).collect(),
                kind: ArchiveKind::Spanned,
                audio_dir: "audio/Span".into(),
                entry_suffix: ".flac".into(),
            }],
        },
        ..archive_spec()
    }
}

fn spanned_sources() -> FakeSources {
    let json = serde_json::json!({
        "data": [
            {"id": "1", "caption": "A bell rings", "duration": 2.5},
            {"id": "2", "caption": "Water drips", "duration": 4.0},
        ]
    });
    let zip = zip_bytes(&[("Span/1.flac", &b"one"[..]), ("Span/2.flac", &b"two"[..])]);
    FakeSources::default()
        .with_url(JSON_URL, json.to_string())
        .with_url(SPAN_Z01_URL, b"volume one".to_vec())
        .with_url(SPAN_ZIP_URL, zip)
}

fn spanned_options() -> PrepareOptions {
    PrepareOptions {
        tools: Some(ToolPaths {
            zip_path: "/opt/bin/zip".into(),
            timeout_ms: 1000,
            merge_timeout_ms: 6 * 60 * 60 * 1000,
            ..ToolPaths::default()
        }),
        ..options()
    }
}

fn spanned_preparer(
    root: &Path,
    sources: &Arc<FakeSources>,
    zip: &Arc<RecordingZip>,
    opts: PrepareOptions,
) -> Preparer {
    Preparer::new(
        root,
        spanned_spec(),
        Arc::clone(sources) as Arc<dyn FetchStrategy>,
        Arc::clone(zip) as Arc<dyn ProcessRunner>,
        opts,
    )
}

#[tokio::test]
async fn spanned_set_is_merged_then_extracted() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(spanned_sources());
    let zip = Arc::new(RecordingZip::default());

    let report = spanned_preparer(root.path(), &sources, &zip, spanned_options())
        .prepare()
        .await
        .unwrap();
    assert_eq!(report.state, PrepareState::Ready);
    assert_eq!(report.counts.archives_fetched, 2);
    assert_eq!(report.counts.archives_merged, 1);
    assert_eq!(report.counts.entries_extracted, 2);

    let archives = root.path().join("WavCaps/v1/archives/Span");
    assert!(archives.join("Span_merged.zip").exists());
    assert!(!archives.join("Span_merged.tmp.zip").exists());
    let audio = root.path().join("WavCaps/v1/audio/Span");
    assert_eq!(std::fs::read(audio.join("1.flac")).unwrap(), b"one");
    assert_eq!(load_index(root.path(), &spanned_spec()).len(), 2);
}

#[tokio::test]
async fn merge_uses_its_own_timeout() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(spanned_sources());
    let zip = Arc::new(RecordingZip::default());

    spanned_preparer(root.path(), &sources, &zip, spanned_options())
        .prepare()
        .await
        .unwrap();
    assert_eq!(*zip.timeouts.lock(), [6 * 60 * 60 * 1000]);
}

#[tokio::test]
async fn merged_archive_spares_refetching_parts() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(spanned_sources());
    let zip = Arc::new(RecordingZip::default());
    spanned_preparer(root.path(), &sources, &zip, spanned_options())
        .prepare()
        .await
        .unwrap();
    let calls = sources.calls();

    let version = root.path().join("WavCaps/v1");
    std::fs::remove_file(version.join("archives/Span/Span.z01")).unwrap();
    std::fs::remove_file(version.join("archives/Span/Span.zip")).unwrap();
    std::fs::remove_file(version.join("audio/Span/2.flac")).unwrap();

    let report = spanned_preparer(root.path(), &sources, &zip, spanned_options())
        .prepare()
        .await
        .unwrap();
    assert_eq!(report.state, PrepareState::Ready);
    assert_eq!(report.counts.archives_fetched, 0);
    assert_eq!(report.counts.archives_merged, 0);
    assert_eq!(report.counts.entries_extracted, 1);
    assert_eq!(sources.calls(), calls);
    assert_eq!(zip.merges(), 1);
    assert_eq!(std::fs::read(version.join("audio/Span/2.flac")).unwrap(), b"two");
}

#[tokio::test]
async fn clean_archives_removes_merged_file() {
    let root = tempfile::tempdir().unwrap();
    let sources = Arc::new(spanned_sources());
    let zip = Arc::new(RecordingZip::default());
    let opts = PrepareOptions {
        clean_archives: true,
        ..spanned_options()
    };
    spanned_preparer(root.path(), &sources, &zip, opts)
        .prepare()
        .await
        .unwrap();

    let archives = root.path().join("WavCaps/v1/archives/Span");
    for name in ["Span.z01", "Span.zip", "Span_merged.zip"] {
        assert!(!archives.join(name).exists(), "{name} left behind");
    }
    assert!(root.path().join("WavCaps/v1/audio/Span/1.flac").exists());
}
