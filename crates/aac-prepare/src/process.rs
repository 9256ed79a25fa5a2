//! External program execution with timeout and cancellation.
//!
//! The clip fetcher and the spanned-archive merge both go through
//! [`ProcessRunner`] so tests can substitute scripted runners.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Options for one program invocation.
#[derive(Clone, Debug)]
pub struct ProcessOptions {
    /// Working directory; `None` inherits the current one.
    pub working_directory: Option<PathBuf>,
    /// Timeout in milliseconds.
    pub timeout_ms: u64,
    /// Cancellation token; the child is killed when it fires.
    pub cancellation: CancellationToken,
}

impl ProcessOptions {
    /// Options with the given timeout and a fresh token.
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            working_directory: None,
            timeout_ms,
            cancellation: CancellationToken::new(),
        }
    }
}

/// Output from a finished (or aborted) program.
#[derive(Clone, Debug, Default)]
pub struct ProcessOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code, `-1` when killed or terminated by a signal.
    pub exit_code: i32,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// Whether the program hit the timeout.
    pub timed_out: bool,
    /// Whether the program was cancelled.
    pub interrupted: bool,
}

impl ProcessOutput {
    /// Exit code 0 and neither timed out nor interrupted.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.interrupted
    }

    /// Last non-empty stderr line, or a description of how the run ended.
    pub fn failure_summary(&self) -> String {
        if self.timed_out {
            return format!("timed out after {} ms", self.duration_ms);
        }
        if self.interrupted {
            return "interrupted".to_string();
        }
        let line = self
            .stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no output");
        format!("exit code {}: {line}", self.exit_code)
    }
}

/// Runs external programs.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args`.
    ///
    /// Errors only when the program cannot be started; non-zero exits,
    /// timeouts, and cancellation are reported through [`ProcessOutput`].
    async fn run(
        &self,
        program: &str,
        args: &[String],
        opts: &ProcessOptions,
    ) -> std::io::Result<ProcessOutput>;
}

/// Real subprocess execution backed by `tokio::process::Command`.
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        opts: &ProcessOptions,
    ) -> std::io::Result<ProcessOutput> {
        let start = Instant::now();
        let elapsed = || u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut cmd = tokio::process::Command::new(program);
        let _ = cmd
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &opts.working_directory {
            let _ = cmd.current_dir(dir);
        }

        debug!(program, ?args, "spawning process");
        let child = cmd.spawn()?;

        // Dropping the wait future kills the child.
        let output = tokio::select! {
            result = child.wait_with_output() => result?,
            () = tokio::time::sleep(Duration::from_millis(opts.timeout_ms)) => {
                warn!(program, timeout_ms = opts.timeout_ms, "process timed out");
                return Ok(ProcessOutput {
                    stderr: "process timed out".into(),
                    exit_code: -1,
                    duration_ms: elapsed(),
                    timed_out: true,
                    ..ProcessOutput::default()
                });
            }
            () = opts.cancellation.cancelled() => {
                debug!(program, "process cancelled");
                return Ok(ProcessOutput {
                    stderr: "process cancelled".into(),
                    exit_code: -1,
                    duration_ms: elapsed(),
                    interrupted: true,
                    ..ProcessOutput::default()
                });
            }
        };

        let duration_ms = elapsed();
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(program, exit_code, duration_ms, "process completed");

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
            duration_ms,
            timed_out: false,
            interrupted: false,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
