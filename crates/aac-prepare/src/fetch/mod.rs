//! Retrieval of remote resources into local files.
//!
//! A [`FetchStrategy`] knows how to retrieve one kind of [`ResourceRef`] into
//! a path. The [`Fetcher`] wraps any strategy with:
//!
//! - retries with capped exponential backoff and jitter for transient errors
//! - temp-file-then-rename (`<dest>.part`), so `dest` only ever holds a
//!   complete file
//! - cancellation between attempts and between batch items
//!
//! [`Fetcher::fetch_batch`] runs many items on a bounded pool and turns
//! per-item failures into a [`BatchReport`] instead of an error.

pub mod clip;
pub mod http;
pub mod hub;
pub mod router;

use std::path::{Path, PathBuf};
use std::time::Duration;

use aac_core::ResourceRef;
use aac_core::retry::RetryConfig;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::FetchError;

pub use clip::ExternalToolFetch;
pub use http::HttpFetch;
pub use hub::HubFetch;
pub use router::Strategies;

/// Retrieves one kind of remote resource into a local path.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether this strategy can retrieve `resource`.
    fn supports(&self, resource: &ResourceRef) -> bool;

    /// Write the content of `resource` to `tmp`.
    ///
    /// `tmp` may already hold a partial download from an earlier attempt;
    /// strategies that cannot resume overwrite it.
    async fn retrieve(
        &self,
        resource: &ResourceRef,
        tmp: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError>;
}

/// Temp path used while `dest` is being written.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// One unit of work for [`Fetcher::fetch_batch`].
#[derive(Clone, Debug, PartialEq)]
pub struct FetchItem {
    /// Identifier used in reports (file name or source id).
    pub id: String,
    /// What to fetch.
    pub resource: ResourceRef,
    /// Final destination.
    pub dest: PathBuf,
}

/// A batch item that did not succeed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    /// Item identifier.
    pub id: String,
    /// Error message.
    pub reason: String,
    /// Whether the failure was classified as permanent.
    pub permanent: bool,
}

/// Outcome of a batch, in input order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Ids fetched successfully.
    pub succeeded: Vec<String>,
    /// Ids that failed, with reasons.
    pub failed: Vec<FetchFailure>,
    /// Items skipped because the batch was cancelled.
    pub cancelled: usize,
}

impl BatchReport {
    /// Number of items the batch was given.
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.cancelled
    }

    /// Whether every item succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.cancelled == 0
    }
}

enum ItemOutcome {
    Done,
    Failed(FetchFailure),
    Skipped,
}

/// Retrying, cancellable wrapper around fetch strategies.
#[derive(Clone, Debug)]
pub struct Fetcher {
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl Fetcher {
    /// Fetcher with the given retry policy and cancellation token.
    pub fn new(retry: RetryConfig, cancel: CancellationToken) -> Self {
        Self { retry, cancel }
    }

    /// Token checked between attempts and batch items.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fetch `resource` into `dest` using `strategy`.
    ///
    /// On success `dest` exists and is non-empty. On a permanent failure the
    /// temp file is removed; on cancellation it is kept so a later run can
    /// resume from it.
    pub async fn fetch(
        &self,
        resource: &ResourceRef,
        dest: &Path,
        strategy: &dyn FetchStrategy,
    ) -> Result<(), FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if !strategy.supports(resource) {
            return Err(FetchError::Unsupported(resource.describe()));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = part_path(dest);
        let mut attempt = 0u32;
        loop {
            let result = match strategy.retrieve(resource, &tmp, &self.cancel).await {
                Ok(()) => ensure_non_empty(&tmp).await,
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(()) => {
                    tokio::fs::rename(&tmp, dest).await?;
                    debug!(
                        resource = %resource.describe(),
                        dest = %dest.display(),
                        strategy = strategy.name(),
                        "fetched"
                    );
                    return Ok(());
                }
                Err(err) => err,
            };

            if matches!(err, FetchError::Cancelled) || self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            if !err.is_retryable() || attempt >= self.retry.max_retries {
                remove_if_exists(&tmp).await;
                warn!(
                    resource = %resource.describe(),
                    attempts = attempt + 1,
                    error = %err,
                    "fetch failed"
                );
                return Err(err);
            }
            if matches!(err, FetchError::Empty(_)) {
                remove_if_exists(&tmp).await;
            }

            attempt += 1;
            let backoff_ms = self.retry.delay_ms(attempt, rand::random::<f64>());
            let delay_ms = err
                .retry_after_ms()
                .map_or(backoff_ms, |ra| backoff_ms.max(ra));
            debug!(
                resource = %resource.describe(),
                attempt,
                delay_ms,
                error = %err,
                "retrying fetch"
            );

            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                () = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            }
        }
    }

    /// Fetch many items with at most `concurrency` in flight.
    ///
    /// Never fails as a whole: each item ends up succeeded, failed, or
    /// skipped (after cancellation). The report lists ids in input order
    /// regardless of completion order.
    pub async fn fetch_batch(
        &self,
        items: &[FetchItem],
        strategy: &dyn FetchStrategy,
        concurrency: usize,
    ) -> BatchReport {
        let concurrency = concurrency.max(1);
        info!(
            items = items.len(),
            concurrency,
            strategy = strategy.name(),
            "starting fetch batch"
        );

        let mut outcomes: Vec<(usize, ItemOutcome)> = futures::stream::iter(items.iter().enumerate())
            .map(|(i, item)| async move {
                if self.cancel.is_cancelled() {
                    return (i, ItemOutcome::Skipped);
                }
                let outcome = match self.fetch(&item.resource, &item.dest, strategy).await {
                    Ok(()) => ItemOutcome::Done,
                    Err(FetchError::Cancelled) => ItemOutcome::Skipped,
                    Err(e) => ItemOutcome::Failed(FetchFailure {
                        id: item.id.clone(),
                        permanent: !e.is_retryable(),
                        reason: e.to_string(),
                    }),
                };
                (i, outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(i, _)| *i);

        let mut report = BatchReport::default();
        for (i, outcome) in outcomes {
            match outcome {
                ItemOutcome::Done => report.succeeded.push(items[i].id.clone()),
                ItemOutcome::Failed(failure) => report.failed.push(failure),
                ItemOutcome::Skipped => report.cancelled += 1,
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "fetch batch finished"
        );
        report
    }
}

async fn ensure_non_empty(path: &Path) -> Result<(), FetchError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(FetchError::Empty(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(FetchError::Empty(path.to_path_buf()))
        }
        Err(e) => Err(FetchError::Io(e)),
    }
}

async fn remove_if_exists(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove temp file");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    /// Scripted strategy: each id maps to a queue of results, consumed per
    /// attempt; an exhausted queue succeeds.
    #[derive(Default)]
    pub(crate) struct ScriptedStrategy {
        pub(crate) script: Mutex<HashMap<String, Vec<FetchError>>>,
        pub(crate) calls: AtomicU32,
    }

    impl ScriptedStrategy {
        pub(crate) fn failing(id: &str, errors: Vec<FetchError>) -> Self {
            let s = Self::default();
            let _ = s.script.lock().insert(id.to_string(), errors);
            s
        }
    }

    #[async_trait]
    impl FetchStrategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn supports(&self, resource: &ResourceRef) -> bool {
            matches!(resource, ResourceRef::Clip { .. })
        }

        async fn retrieve(
            &self,
            resource: &ResourceRef,
            tmp: &Path,
            _cancel: &CancellationToken,
        ) -> Result<(), FetchError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            let ResourceRef::Clip { source_id, .. } = resource else {
                return Err(FetchError::Unsupported(resource.describe()));
            };
            let next = {
                let mut script = self.script.lock();
                script.get_mut(source_id).and_then(|q| {
                    if q.is_empty() { None } else { Some(q.remove(0)) }
                })
            };
            if let Some(err) = next {
                return Err(err);
            }
            tokio::fs::write(tmp, format!("audio:{source_id}")).await?;
            Ok(())
        }
    }

    pub(crate) fn clip(id: &str) -> ResourceRef {
        ResourceRef::Clip {
            source_id: id.to_string(),
            start_s: 0.0,
            duration_s: 10.0,
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter_factor: 0.0,
        }
    }

    fn unavailable(id: &str) -> FetchError {
        FetchError::Unavailable {
            source_id: id.into(),
            reason: "Video unavailable".into(),
        }
    }

    fn transient(id: &str) -> FetchError {
        FetchError::Tool {
            tool: "ffmpeg".into(),
            source_id: id.into(),
            reason: "exit code 1: Connection reset".into(),
        }
    }

    // ── part_path ───────────────────────────────────────────────────

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/data/audio/a.flac")),
            PathBuf::from("/data/audio/a.flac.part")
        );
    }

    // ── fetch ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn fetch_writes_dest_and_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("sub/a.flac");
        let fetcher = Fetcher::new(fast_retry(0), CancellationToken::new());

        fetcher
            .fetch(&clip("a"), &dest, &ScriptedStrategy::default())
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "audio:a");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.flac");
        let strategy = ScriptedStrategy::failing("a", vec![transient("a"), transient("a")]);
        let fetcher = Fetcher::new(fast_retry(3), CancellationToken::new());

        fetcher.fetch(&clip("a"), &dest, &strategy).await.unwrap();
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 3);
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.flac");
        let strategy = ScriptedStrategy::failing("a", (0..5).map(|_| transient("a")).collect());
        let fetcher = Fetcher::new(fast_retry(2), CancellationToken::new());

        let err = fetcher.fetch(&clip("a"), &dest, &strategy).await.unwrap_err();
        assert!(matches!(err, FetchError::Tool { .. }));
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 3);
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.flac");
        std::fs::write(part_path(&dest), b"stale").unwrap();
        let strategy = ScriptedStrategy::failing("a", vec![unavailable("a")]);
        let fetcher = Fetcher::new(fast_retry(3), CancellationToken::new());

        let err = fetcher.fetch(&clip("a"), &dest, &strategy).await.unwrap_err();
        assert!(matches!(err, FetchError::Unavailable { .. }));
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 1);
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn unsupported_resource_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(fast_retry(0), CancellationToken::new());
        let err = fetcher
            .fetch(
                &ResourceRef::Extracted,
                &dir.path().join("x"),
                &ScriptedStrategy::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Unsupported(_)));
    }

    #[tokio::test]
    async fn cancelled_fetcher_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let strategy = ScriptedStrategy::default();
        let fetcher = Fetcher::new(fast_retry(0), cancel);

        let err = fetcher
            .fetch(&clip("a"), &dir.path().join("a.flac"), &strategy)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 0);
    }

    // ── fetch_batch ─────────────────────────────────────────────────

    fn items(dir: &Path, ids: &[&str]) -> Vec<FetchItem> {
        ids.iter()
            .map(|id| FetchItem {
                id: (*id).to_string(),
                resource: clip(id),
                dest: dir.join(format!("{id}.flac")),
            })
            .collect()
    }

    #[tokio::test]
    async fn batch_collects_failures_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = ScriptedStrategy::default();
        {
            let mut script = strategy.script.lock();
            let _ = script.insert("b".into(), vec![unavailable("b")]);
            let _ = script.insert("d".into(), vec![unavailable("d")]);
        }
        let fetcher = Fetcher::new(fast_retry(1), CancellationToken::new());

        let report = fetcher
            .fetch_batch(&items(dir.path(), &["a", "b", "c", "d", "e"]), &strategy, 3)
            .await;

        assert_eq!(report.succeeded, ["a", "c", "e"]);
        let failed: Vec<&str> = report.failed.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(failed, ["b", "d"]);
        assert!(report.failed.iter().all(|f| f.permanent));
        assert_eq!(report.total(), 5);
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn cancelled_batch_skips_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let fetcher = Fetcher::new(fast_retry(0), cancel);

        let report = fetcher
            .fetch_batch(
                &items(dir.path(), &["a", "b"]),
                &ScriptedStrategy::default(),
                2,
            )
            .await;
        assert_eq!(report.cancelled, 2);
        assert!(report.succeeded.is_empty());
    }

    #[test]
    fn batch_report_serializes() {
        let report = BatchReport {
            succeeded: vec!["a".into()],
            failed: vec![FetchFailure {
                id: "b".into(),
                reason: "gone".into(),
                permanent: true,
            }],
            cancelled: 0,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failed"][0]["id"], "b");
    }
}
