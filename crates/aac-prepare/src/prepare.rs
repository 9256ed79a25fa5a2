//! Per-(dataset, subset) preparation state machine.
//!
//! ```text
//! Unchecked ──► Downloading ──► Extracting ──► Indexing ──► Ready
//!     │                                                       ▲
//!     └──────────── everything already verified ─────────────┘
//! any stage ──► Failed
//! ```
//!
//! Each run starts from what the verifier finds on disk, so an interrupted
//! preparation resumes by fetching only what is still missing, and a run on
//! a prepared subset performs no downloads or extractions at all.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aac_core::retry::RetryConfig;
use aac_core::spec::{ArchiveKind, ArchiveSet, AudioSource};
use aac_core::{
    DatasetLayout, DatasetSpec, ExpectedFile, FieldValue, FileTag, IndexError, IndexTable,
    ResourceRef, SampleRecord,
};
use aac_settings::{AacSettings, PartialPolicy, ToolPaths};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{FetchError, PrepareError};
use crate::extract::{ExtractOptions, extract, merge_spanned};
use crate::fetch::{BatchReport, FetchItem, FetchStrategy, Fetcher};
use crate::indexer::build_index;
use crate::process::{ProcessOptions, ProcessRunner};
use crate::verify::{StatusCounts, VerifyReport, verify};

/// Length of every `AudioCaps` clip in seconds.
pub const AUDIOCAPS_CLIP_SECONDS: f64 = 10.0;

// ─────────────────────────────────────────────────────────────────────────────
// State, options, report
// ─────────────────────────────────────────────────────────────────────────────

/// Preparation stage of one (dataset, subset).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrepareState {
    /// Nothing inspected yet.
    Unchecked,
    /// Fetching metadata, archives, or clips.
    Downloading,
    /// Merging and extracting archives.
    Extracting,
    /// Building and persisting the index.
    Indexing,
    /// Index persisted and audio verified.
    Ready,
    /// A fatal error stopped preparation.
    Failed,
}

impl fmt::Display for PrepareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unchecked => "UNCHECKED",
            Self::Downloading => "DOWNLOADING",
            Self::Extracting => "EXTRACTING",
            Self::Indexing => "INDEXING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
        })
    }
}

/// Knobs of one preparation run.
#[derive(Clone, Debug)]
pub struct PrepareOptions {
    /// Tolerance for unavailable audio.
    pub partial: PartialPolicy,
    /// Maximum concurrent per-clip fetches.
    pub concurrency: usize,
    /// Re-fetch metadata and rebuild the index even if the subset is ready.
    pub force: bool,
    /// Delete archive parts once the subset is ready.
    pub clean_archives: bool,
    /// Retry policy for every fetch.
    pub retry: RetryConfig,
    /// Tool locations; `None` reads [`aac_settings::tool_paths`].
    pub tools: Option<ToolPaths>,
    /// Stops the run between items and kills in-flight tools.
    pub cancel: CancellationToken,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            partial: PartialPolicy::strict(),
            concurrency: 8,
            force: false,
            clean_archives: false,
            retry: RetryConfig::default(),
            tools: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl PrepareOptions {
    /// Options taken from loaded settings.
    pub fn from_settings(settings: &AacSettings) -> Self {
        Self {
            partial: settings.partial,
            concurrency: settings.fetch.max_workers,
            clean_archives: settings.clean_archives,
            retry: settings.fetch.retry.clone(),
            ..Self::default()
        }
    }
}

/// Work done per stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCounts {
    /// Metadata files downloaded.
    pub metadata_fetched: usize,
    /// Archive parts downloaded.
    pub archives_fetched: usize,
    /// Spanned archives merged.
    pub archives_merged: usize,
    /// Audio files written by extraction.
    pub entries_extracted: usize,
    /// Records persisted in the index.
    pub records_indexed: usize,
    /// Records dropped because their audio is unavailable.
    pub records_dropped: usize,
}

impl StageCounts {
    /// Downloads and extractions performed, clips excluded.
    pub fn work_done(&self) -> usize {
        self.metadata_fetched + self.archives_fetched + self.archives_merged + self.entries_extracted
    }
}

/// Summary of a preparation run, available on success and failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareReport {
    /// Dataset machine name.
    pub dataset: String,
    /// Subset identifier.
    pub subset: String,
    /// Final state.
    pub state: PrepareState,
    /// Every state entered, in order.
    pub transitions: Vec<PrepareState>,
    /// Work done per stage.
    pub counts: StageCounts,
    /// Verification of the audio referenced by the metadata.
    pub audio: StatusCounts,
    /// Per-clip batch outcome, when clips were fetched.
    pub clips: Option<BatchReport>,
    /// Persisted index file.
    pub index_path: PathBuf,
    /// Failure message, if the run failed.
    pub error: Option<String>,
}

/// Read-only status of one (dataset, subset).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    /// `dataset/subset`.
    pub label: String,
    /// Whether the subset would be served as is.
    pub ready: bool,
    /// Verification of metadata files.
    pub metadata: StatusCounts,
    /// Records in the persisted index, if it loads.
    pub indexed: Option<usize>,
    /// Verification of indexed audio, if the index loads.
    pub audio: Option<StatusCounts>,
    /// Why the subset is not ready.
    pub problem: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Preparer
// ─────────────────────────────────────────────────────────────────────────────

/// Drives verification, fetching, extraction, and indexing of one subset.
pub struct Preparer {
    spec: DatasetSpec,
    layout: DatasetLayout,
    strategies: Arc<dyn FetchStrategy>,
    runner: Arc<dyn ProcessRunner>,
    options: PrepareOptions,
    fetcher: Fetcher,
    state: PrepareState,
    report: PrepareReport,
}

impl Preparer {
    /// Preparer for `spec` under `root`.
    pub fn new(
        root: impl AsRef<Path>,
        spec: DatasetSpec,
        strategies: Arc<dyn FetchStrategy>,
        runner: Arc<dyn ProcessRunner>,
        options: PrepareOptions,
    ) -> Self {
        let layout = DatasetLayout::new(root, &spec);
        let fetcher = Fetcher::new(options.retry.clone(), options.cancel.clone());
        let report = PrepareReport {
            dataset: spec.name.clone(),
            subset: spec.subset.clone(),
            state: PrepareState::Unchecked,
            transitions: vec![PrepareState::Unchecked],
            counts: StageCounts::default(),
            audio: StatusCounts::default(),
            clips: None,
            index_path: layout.index_path(&spec.subset),
            error: None,
        };
        Self {
            spec,
            layout,
            strategies,
            runner,
            options,
            fetcher,
            state: PrepareState::Unchecked,
            report,
        }
    }

    /// Current state.
    pub fn state(&self) -> PrepareState {
        self.state
    }

    /// Report of the last (or current) run.
    pub fn report(&self) -> &PrepareReport {
        &self.report
    }

    /// Directory layout of the subset.
    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    /// Bring the subset to [`PrepareState::Ready`].
    pub async fn prepare(&mut self) -> Result<PrepareReport, PrepareError> {
        self.state = PrepareState::Unchecked;
        self.report.transitions = vec![PrepareState::Unchecked];
        self.report.counts = StageCounts::default();
        self.report.clips = None;
        self.report.error = None;

        info!(subset = %self.spec.label(), root = %self.layout.root().display(), "preparing");
        match self.run().await {
            Ok(()) => {
                self.transition(PrepareState::Ready);
                Ok(self.report.clone())
            }
            Err(e) => {
                error!(subset = %self.spec.label(), stage = ?e.stage(), error = %e, "preparation failed");
                self.report.error = Some(e.to_string());
                self.transition(PrepareState::Failed);
                Err(e)
            }
        }
    }

    /// Inspect the subset without changing anything on disk.
    pub async fn check(&self) -> Result<CheckReport, PrepareError> {
        let label = self.spec.label();
        let metadata = self.verify_files(self.spec.metadata_files()).await?;
        let mut report = CheckReport {
            label,
            ready: false,
            metadata: metadata.counts(),
            indexed: None,
            audio: None,
            problem: None,
        };
        if !metadata.is_complete() {
            report.problem = Some(format!(
                "metadata incomplete: {}",
                metadata.needing_work().join(", ")
            ));
            return Ok(report);
        }

        let table = match self.load_table().await {
            Ok(table) => table,
            Err(e) => {
                report.problem = Some(e.to_string());
                return Ok(report);
            }
        };
        report.indexed = Some(table.len());
        let audio = self.verify_files(self.audio_files(&table.records)).await?;
        report.audio = Some(audio.counts());
        if audio.is_complete() {
            report.ready = true;
        } else {
            report.problem = Some(format!(
                "{} indexed audio files need work",
                audio.counts().missing + audio.counts().invalid
            ));
        }
        Ok(report)
    }

    fn transition(&mut self, next: PrepareState) {
        debug!(subset = %self.spec.label(), from = %self.state, to = %next, "state transition");
        self.state = next;
        self.report.state = next;
        self.report.transitions.push(next);
    }

    fn ensure_not_cancelled(&self) -> Result<(), PrepareError> {
        if self.options.cancel.is_cancelled() {
            return Err(PrepareError::Cancelled);
        }
        Ok(())
    }

    async fn run(&mut self) -> Result<(), PrepareError> {
        if !self.options.force {
            if let Some(audio) = self.ready_shortcut().await? {
                info!(subset = %self.spec.label(), records = audio.valid, "already prepared");
                self.report.audio = audio;
                return Ok(());
            }
        }

        // ── Downloading ─────────────────────────────────────────────
        self.transition(PrepareState::Downloading);
        self.fetch_metadata().await?;
        let records = self.parse_records().await?;
        let audio_files = self.audio_files(&records);
        let audio = self.verify_files(audio_files.clone()).await?;
        let needed: Vec<ExpectedFile> = audio_files
            .iter()
            .filter(|f| audio.status(&f.relpath).is_some_and(|s| s.needs_work()))
            .cloned()
            .collect();
        info!(
            subset = %self.spec.label(),
            expected = audio_files.len(),
            needed = needed.len(),
            "audio verified"
        );

        match self.spec.audio.clone() {
            AudioSource::Clips { .. } => {
                self.fetch_clips(&needed).await?;
                self.transition(PrepareState::Extracting);
            }
            AudioSource::Archives { sets } => {
                let plan = plan_extraction(&sets, &needed);
                for (set, _) in &plan {
                    self.fetch_archive_set(set).await?;
                }
                self.transition(PrepareState::Extracting);
                for (set, names) in plan {
                    self.extract_set(&set, names).await?;
                }
            }
        }
        self.ensure_not_cancelled()?;

        // ── Indexing ────────────────────────────────────────────────
        self.transition(PrepareState::Indexing);
        let audio = self.verify_files(audio_files).await?;
        self.write_failures().await?;
        self.write_index(records, &audio).await?;
        if self.options.clean_archives {
            self.clean_archives().await;
        }
        Ok(())
    }

    /// Counts of indexed audio when nothing needs to be done.
    async fn ready_shortcut(&self) -> Result<Option<StatusCounts>, PrepareError> {
        let metadata = self.verify_files(self.spec.metadata_files()).await?;
        if !metadata.is_complete() {
            debug!(missing = ?metadata.needing_work(), "metadata incomplete");
            return Ok(None);
        }
        let table = match self.load_table().await {
            Ok(table) => table,
            Err(e) => {
                debug!(error = %e, "persisted index unusable");
                return Ok(None);
            }
        };
        let audio = self.verify_files(self.audio_files(&table.records)).await?;
        Ok(audio.is_complete().then(|| audio.counts()))
    }

    async fn load_table(&self) -> Result<IndexTable, IndexError> {
        let path = self.layout.index_path(&self.spec.subset);
        let dataset = self.spec.name.clone();
        let subset = self.spec.subset.clone();
        let table = tokio::task::spawn_blocking(move || IndexTable::load(&path, &dataset, &subset))
            .await
            .map_err(|e| IndexError::io(self.layout.metadata_dir(), std::io::Error::other(e)))??;
        if table.version != self.spec.version || table.sample_rate != self.spec.sample_rate {
            return Err(IndexError::WrongSubset {
                path: self.layout.index_path(&self.spec.subset),
                found: format!("{}@{}Hz", table.version, table.sample_rate),
                expected: format!("{}@{}Hz", self.spec.version, self.spec.sample_rate),
            });
        }
        if table.is_empty() {
            return Err(IndexError::Empty);
        }
        Ok(table)
    }

    async fn verify_files(&self, files: Vec<ExpectedFile>) -> Result<VerifyReport, PrepareError> {
        let dir = self.layout.version_dir().to_path_buf();
        tokio::task::spawn_blocking(move || verify(&dir, &files))
            .await
            .map_err(|e| PrepareError::Io {
                path: self.layout.version_dir().to_path_buf(),
                source: std::io::Error::other(e),
            })
    }

    /// Expected audio for `records`; records without `fpath` are skipped.
    fn audio_files(&self, records: &[SampleRecord]) -> Vec<ExpectedFile> {
        let clips = self.spec.uses_clips();
        records
            .iter()
            .filter_map(|record| {
                let fpath = record.fpath()?;
                let source = if clips {
                    clip_resource(record)?
                } else {
                    ResourceRef::Extracted
                };
                Some(ExpectedFile::new(fpath, FileTag::Audio, source))
            })
            .collect()
    }

    async fn fetch_required(
        &mut self,
        files: Vec<ExpectedFile>,
        force: bool,
    ) -> Result<usize, PrepareError> {
        let report = self.verify_files(files.clone()).await?;
        let mut fetched = 0;
        for file in files {
            let needs = report.status(&file.relpath).is_none_or(|s| s.needs_work());
            if !force && !needs {
                continue;
            }
            let dest = self.layout.resolve(&file.relpath);
            info!(file = %file.relpath, source = %file.source.describe(), "fetching");
            self.fetcher
                .fetch(&file.source, &dest, self.strategies.as_ref())
                .await
                .map_err(|e| match e {
                    FetchError::Cancelled => PrepareError::Cancelled,
                    source => PrepareError::Fetch {
                        stage: PrepareState::Downloading,
                        file: file.relpath.clone(),
                        source,
                    },
                })?;
            fetched += 1;
        }
        Ok(fetched)
    }

    async fn fetch_metadata(&mut self) -> Result<(), PrepareError> {
        let files = self.spec.metadata_files();
        let fetched = self.fetch_required(files, self.options.force).await?;
        self.report.counts.metadata_fetched += fetched;
        Ok(())
    }

    async fn parse_records(&self) -> Result<Vec<SampleRecord>, PrepareError> {
        let dir = self.layout.version_dir().to_path_buf();
        let sources = self.spec.metadata.clone();
        tokio::task::spawn_blocking(move || build_index(&dir, &sources))
            .await
            .map_err(|e| PrepareError::Io {
                path: self.layout.version_dir().to_path_buf(),
                source: std::io::Error::other(e),
            })?
            .map_err(|source| PrepareError::Index {
                stage: PrepareState::Indexing,
                source,
            })
    }

    async fn fetch_clips(&mut self, needed: &[ExpectedFile]) -> Result<(), PrepareError> {
        if needed.is_empty() {
            return Ok(());
        }
        let items: Vec<FetchItem> = needed
            .iter()
            .map(|file| FetchItem {
                id: file
                    .relpath
                    .rsplit('/')
                    .next()
                    .unwrap_or(&file.relpath)
                    .to_string(),
                resource: file.source.clone(),
                dest: self.layout.resolve(&file.relpath),
            })
            .collect();

        let batch = self
            .fetcher
            .fetch_batch(&items, self.strategies.as_ref(), self.options.concurrency)
            .await;
        let cancelled = batch.cancelled > 0 || self.options.cancel.is_cancelled();
        self.report.clips = Some(batch);
        if cancelled {
            return Err(PrepareError::Cancelled);
        }
        Ok(())
    }

    async fn fetch_archive_set(&mut self, set: &ArchiveSet) -> Result<(), PrepareError> {
        if set.kind == ArchiveKind::Spanned {
            if let Some(merged) = set.merged_relpath() {
                if non_empty(&self.layout.resolve(&merged)).await {
                    debug!(archive = %set.name, "merged archive present, parts not needed");
                    return Ok(());
                }
            }
        }
        let parts: Vec<ExpectedFile> = self
            .spec
            .archive_files()
            .into_iter()
            .filter(|f| set.parts.contains(&f.relpath))
            .collect();
        let fetched = self.fetch_required(parts, false).await?;
        self.report.counts.archives_fetched += fetched;
        Ok(())
    }

    async fn extract_set(
        &mut self,
        set: &ArchiveSet,
        names: HashSet<String>,
    ) -> Result<(), PrepareError> {
        self.ensure_not_cancelled()?;
        let extract_err = |source| PrepareError::Extract {
            stage: PrepareState::Extracting,
            archive: set.name.clone(),
            source,
        };

        let parts: Vec<PathBuf> = match set.kind {
            ArchiveKind::Spanned => {
                let (Some(merged_rel), Some(main_rel)) = (set.merged_relpath(), set.parts.last())
                else {
                    return Err(extract_err(crate::errors::ExtractError::NoParts));
                };
                let merged = self.layout.resolve(&merged_rel);
                if !non_empty(&merged).await {
                    let tools = self.tools();
                    let opts = ProcessOptions {
                        cancellation: self.options.cancel.child_token(),
                        ..ProcessOptions::with_timeout(tools.merge_timeout_ms)
                    };
                    merge_spanned(
                        self.runner.as_ref(),
                        &tools.zip_path,
                        &self.layout.resolve(main_rel),
                        &merged,
                        &opts,
                    )
                    .await
                    .map_err(extract_err)?;
                    self.report.counts.archives_merged += 1;
                }
                vec![merged]
            }
            ArchiveKind::Single | ArchiveKind::Concatenated => {
                set.parts.iter().map(|p| self.layout.resolve(p)).collect()
            }
        };

        let dest = self.layout.resolve(&set.audio_dir);
        let opts = ExtractOptions {
            only: Some(names),
            flatten: true,
            suffix: Some(set.entry_suffix.clone()),
        };
        let summary = tokio::task::spawn_blocking(move || extract(&parts, &dest, &opts))
            .await
            .map_err(|e| PrepareError::Io {
                path: self.layout.archives_dir(),
                source: std::io::Error::other(e),
            })?
            .map_err(extract_err)?;
        self.report.counts.entries_extracted += summary.written.len();
        Ok(())
    }

    async fn write_index(
        &mut self,
        records: Vec<SampleRecord>,
        audio: &VerifyReport,
    ) -> Result<(), PrepareError> {
        let total = records.len();
        let valid = |record: &SampleRecord| {
            record
                .fpath()
                .and_then(|p| audio.status(p))
                .is_some_and(|s| !s.needs_work())
        };
        let missing = records.iter().filter(|r| !valid(r)).count();
        self.report.audio = audio.counts();

        if !self.options.partial.accepts(missing, total) {
            return Err(PrepareError::Incomplete { missing, total });
        }
        if missing > 0 {
            warn!(
                subset = %self.spec.label(),
                missing,
                total,
                "dropping records with unavailable audio"
            );
        }
        let kept: Vec<SampleRecord> = records.into_iter().filter(|r| valid(r)).collect();
        if kept.is_empty() {
            return Err(PrepareError::Index {
                stage: PrepareState::Indexing,
                source: IndexError::Empty,
            });
        }

        let table = IndexTable::new(
            self.spec.name.clone(),
            self.spec.subset.clone(),
            self.spec.version.clone(),
            self.spec.sample_rate,
            kept,
        );
        let path = self.layout.index_path(&self.spec.subset);
        let count = table.len();
        tokio::task::spawn_blocking(move || table.save(&path))
            .await
            .map_err(|e| PrepareError::Io {
                path: self.layout.metadata_dir(),
                source: std::io::Error::other(e),
            })?
            .map_err(|source| PrepareError::Index {
                stage: PrepareState::Indexing,
                source,
            })?;

        self.report.counts.records_indexed = count;
        self.report.counts.records_dropped = missing;
        info!(subset = %self.spec.label(), records = count, "index written");
        Ok(())
    }

    async fn write_failures(&self) -> Result<(), PrepareError> {
        let path = self.layout.failures_path(&self.spec.subset);
        let failures = self
            .report
            .clips
            .as_ref()
            .map(|b| b.failed.clone())
            .unwrap_or_default();
        let io_err = |source| PrepareError::Io {
            path: path.clone(),
            source,
        };

        if failures.is_empty() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed stale failure list"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(e)),
            }
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(&failures).map_err(|e| io_err(e.into()))?;
        tokio::fs::write(&path, json).await.map_err(io_err)?;
        info!(path = %path.display(), failed = failures.len(), "wrote fetch failures");
        Ok(())
    }

    async fn clean_archives(&self) {
        let AudioSource::Archives { sets } = &self.spec.audio else {
            return;
        };
        for set in sets {
            let merged = set.merged_relpath().filter(|_| set.kind == ArchiveKind::Spanned);
            for relpath in set.parts.iter().chain(merged.as_ref()) {
                let path = self.layout.resolve(relpath);
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!(path = %path.display(), "removed archive"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove archive"),
                }
            }
        }
        info!(subset = %self.spec.label(), "archives cleaned");
    }

    fn tools(&self) -> ToolPaths {
        self.options
            .tools
            .clone()
            .unwrap_or_else(aac_settings::tool_paths)
    }
}

/// Clip window of an `AudioCaps` record.
fn clip_resource(record: &SampleRecord) -> Option<ResourceRef> {
    let source_id = record.get("youtube_id").and_then(FieldValue::as_str)?;
    let start_s = record.get("start_time").and_then(FieldValue::as_f64)?;
    Some(ResourceRef::Clip {
        source_id: source_id.to_string(),
        start_s,
        duration_s: AUDIOCAPS_CLIP_SECONDS,
    })
}

/// Archive sets holding needed audio, with the file names to extract.
fn plan_extraction(
    sets: &[ArchiveSet],
    needed: &[ExpectedFile],
) -> Vec<(ArchiveSet, HashSet<String>)> {
    sets.iter()
        .filter_map(|set| {
            let prefix = format!("{}/", set.audio_dir);
            let names: HashSet<String> = needed
                .iter()
                .filter_map(|f| f.relpath.strip_prefix(&prefix))
                .map(ToOwned::to_owned)
                .collect();
            (!names.is_empty()).then(|| (set.clone(), names))
        })
        .collect()
}

async fn non_empty(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.len() > 0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
