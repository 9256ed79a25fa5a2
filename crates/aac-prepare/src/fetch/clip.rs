//! Per-clip audio through a stream locator and a trim/re-encode tool.
//!
//! `yt-dlp` resolves the audio stream URL of a source id, then `ffmpeg`
//! reads `[start, start + duration)` of that stream and writes mono FLAC at
//! the dataset sample rate.

use std::path::Path;
use std::sync::Arc;

use aac_core::ResourceRef;
use aac_settings::ToolPaths;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::FetchStrategy;
use crate::errors::FetchError;
use crate::process::{ProcessOptions, ProcessOutput, ProcessRunner};

/// Stderr fragments meaning the source will never be retrievable.
const PERMANENT_MARKERS: &[&str] = &[
    "video unavailable",
    "private video",
    "has been removed",
    "account associated with this video has been terminated",
    "not available in your country",
    "sign in to confirm your age",
    "copyright",
    "members-only",
    "this video is not available",
];

/// Retrieves clip windows of `YouTube` videos with external tools.
pub struct ExternalToolFetch {
    runner: Arc<dyn ProcessRunner>,
    sample_rate: u32,
    tools: Option<ToolPaths>,
}

impl ExternalToolFetch {
    /// Clip fetcher producing audio at `sample_rate`.
    ///
    /// Tool locations are read from [`aac_settings::tool_paths`] on every
    /// clip unless pinned with [`Self::with_tools`].
    pub fn new(runner: Arc<dyn ProcessRunner>, sample_rate: u32) -> Self {
        Self {
            runner,
            sample_rate,
            tools: None,
        }
    }

    /// Pin tool locations for this fetcher.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = Some(tools);
        self
    }

    fn tools(&self) -> ToolPaths {
        self.tools.clone().unwrap_or_else(aac_settings::tool_paths)
    }

    async fn locate(
        &self,
        tools: &ToolPaths,
        source_id: &str,
        opts: &ProcessOptions,
    ) -> Result<String, FetchError> {
        let args = vec![
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "-f".to_string(),
            "bestaudio".to_string(),
            "--get-url".to_string(),
            watch_url(source_id),
        ];
        let out = self.runner.run(&tools.ytdlp_path, &args, opts).await?;
        check(&out, "yt-dlp", source_id)?;

        out.stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(ToOwned::to_owned)
            .ok_or_else(|| FetchError::Tool {
                tool: "yt-dlp".into(),
                source_id: source_id.to_string(),
                reason: "no stream url in output".into(),
            })
    }

    async fn trim(
        &self,
        tools: &ToolPaths,
        stream_url: &str,
        window: (f64, f64),
        source_id: &str,
        tmp: &Path,
        opts: &ProcessOptions,
    ) -> Result<(), FetchError> {
        let (start_s, duration_s) = window;
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-ss".to_string(),
            start_s.to_string(),
            "-t".to_string(),
            duration_s.to_string(),
            "-i".to_string(),
            stream_url.to_string(),
            "-vn".to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-f".to_string(),
            "flac".to_string(),
            "-y".to_string(),
            tmp.to_string_lossy().into_owned(),
        ];
        let out = self.runner.run(&tools.ffmpeg_path, &args, opts).await?;
        check(&out, "ffmpeg", source_id)
    }
}

#[async_trait]
impl FetchStrategy for ExternalToolFetch {
    fn name(&self) -> &'static str {
        "external-tool"
    }

    fn supports(&self, resource: &ResourceRef) -> bool {
        matches!(resource, ResourceRef::Clip { .. })
    }

    async fn retrieve(
        &self,
        resource: &ResourceRef,
        tmp: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let ResourceRef::Clip {
            source_id,
            start_s,
            duration_s,
        } = resource
        else {
            return Err(FetchError::Unsupported(resource.describe()));
        };

        let tools = self.tools();
        let opts = ProcessOptions {
            working_directory: None,
            timeout_ms: tools.timeout_ms,
            cancellation: cancel.child_token(),
        };

        let stream_url = self.locate(&tools, source_id, &opts).await?;
        debug!(source_id, "stream located");
        self.trim(
            &tools,
            &stream_url,
            (*start_s, *duration_s),
            source_id,
            tmp,
            &opts,
        )
        .await
    }
}

/// Watch page of a `YouTube` video id.
pub fn watch_url(source_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={source_id}")
}

/// Whether tool stderr says the source is permanently gone.
pub fn is_permanent_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    PERMANENT_MARKERS.iter().any(|m| lower.contains(m))
}

fn check(out: &ProcessOutput, tool: &str, source_id: &str) -> Result<(), FetchError> {
    if out.interrupted {
        return Err(FetchError::Cancelled);
    }
    if out.success() {
        return Ok(());
    }
    if !out.timed_out && is_permanent_failure(&out.stderr) {
        return Err(FetchError::Unavailable {
            source_id: source_id.to_string(),
            reason: out.failure_summary(),
        });
    }
    Err(FetchError::Tool {
        tool: tool.to_string(),
        source_id: source_id.to_string(),
        reason: out.failure_summary(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records invocations; `yt-dlp` answers with `ytdlp`, `ffmpeg` writes
    /// its last argument unless `ffmpeg_fails`.
    struct MockRunner {
        ytdlp: ProcessOutput,
        ffmpeg_fails: bool,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl MockRunner {
        fn new(ytdlp: ProcessOutput) -> Self {
            Self {
                ytdlp,
                ffmpeg_fails: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProcessRunner for MockRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            _opts: &ProcessOptions,
        ) -> std::io::Result<ProcessOutput> {
            self.calls.lock().push((program.to_string(), args.to_vec()));
            if program.ends_with("yt-dlp") {
                return Ok(self.ytdlp.clone());
            }
            if self.ffmpeg_fails {
                return Ok(ProcessOutput {
                    stderr: "Connection reset by peer".into(),
                    exit_code: 1,
                    ..ProcessOutput::default()
                });
            }
            if let Some(out) = args.last() {
                std::fs::write(out, b"fLaC")?;
            }
            Ok(ProcessOutput::default())
        }
    }

    fn located() -> ProcessOutput {
        ProcessOutput {
            stdout: "https://stream.example/audio\n".into(),
            ..ProcessOutput::default()
        }
    }

    fn clip() -> ResourceRef {
        ResourceRef::Clip {
            source_id: "abc123".into(),
            start_s: 30.0,
            duration_s: 10.0,
        }
    }

    fn tools() -> ToolPaths {
        ToolPaths {
            ytdlp_path: "/opt/bin/yt-dlp".into(),
            ffmpeg_path: "/opt/bin/ffmpeg".into(),
            ..ToolPaths::default()
        }
    }

    #[tokio::test]
    async fn locates_then_trims_to_sample_rate() {
        let runner = Arc::new(MockRunner::new(located()));
        let fetch = ExternalToolFetch::new(runner.clone(), 32_000).with_tools(tools());
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("abc123_30.flac.part");

        fetch
            .retrieve(&clip(), &tmp, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&tmp).unwrap(), b"fLaC");
        let calls = runner.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "/opt/bin/yt-dlp");
        assert!(calls[0].1.contains(&watch_url("abc123")));
        assert_eq!(calls[1].0, "/opt/bin/ffmpeg");
        let ff = calls[1].1.join(" ");
        assert!(ff.contains("-ss 30 -t 10 -i https://stream.example/audio"), "{ff}");
        assert!(ff.contains("-ar 32000 -ac 1 -f flac"), "{ff}");
    }

    #[tokio::test]
    async fn unavailable_video_is_permanent() {
        let runner = Arc::new(MockRunner::new(ProcessOutput {
            stderr: "ERROR: [youtube] abc123: Video unavailable\n".into(),
            exit_code: 1,
            ..ProcessOutput::default()
        }));
        let fetch = ExternalToolFetch::new(runner.clone(), 32_000).with_tools(tools());
        let dir = tempfile::tempdir().unwrap();

        let err = fetch
            .retrieve(&clip(), &dir.path().join("x.part"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Unavailable { .. }));
        assert!(!err.is_retryable());
        assert_eq!(runner.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn ffmpeg_failure_is_transient() {
        let mut runner = MockRunner::new(located());
        runner.ffmpeg_fails = true;
        let fetch = ExternalToolFetch::new(Arc::new(runner), 32_000).with_tools(tools());
        let dir = tempfile::tempdir().unwrap();

        let err = fetch
            .retrieve(&clip(), &dir.path().join("x.part"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Tool { ref tool, .. } if tool == "ffmpeg"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_locator_output_is_an_error() {
        let runner = Arc::new(MockRunner::new(ProcessOutput::default()));
        let fetch = ExternalToolFetch::new(runner, 32_000).with_tools(tools());
        let dir = tempfile::tempdir().unwrap();

        let err = fetch
            .retrieve(&clip(), &dir.path().join("x.part"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Tool { .. }));
    }

    #[test]
    fn permanent_markers() {
        assert!(is_permanent_failure("ERROR: Private video. Sign in"));
        assert!(is_permanent_failure(
            "This video has been removed by the uploader"
        ));
        assert!(!is_permanent_failure("HTTP Error 503: Service Unavailable"));
    }

    #[test]
    fn interrupted_run_is_cancelled() {
        let out = ProcessOutput {
            interrupted: true,
            exit_code: -1,
            ..ProcessOutput::default()
        };
        assert!(matches!(
            check(&out, "ffmpeg", "x"),
            Err(FetchError::Cancelled)
        ));
    }
}
