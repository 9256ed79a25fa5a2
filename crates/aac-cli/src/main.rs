//! # aac-datasets
//!
//! Command-line entry point: check, download, and describe audio-captioning
//! datasets under a root directory.

#![deny(unsafe_code)]

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use aac_core::DatasetName;
use aac_settings::{AacSettings, PartialPolicy};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

/// Prepare and inspect audio-captioning datasets.
#[derive(Parser, Debug)]
#[command(name = "aac-datasets", version, about = "Audio-captioning dataset preparation")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (`-v` info, `-vv` debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report which subsets are ready without changing anything.
    Check(SubsetArgs),
    /// Download, extract, and index subsets.
    Download(DownloadArgs),
    /// Print version, platform, and external tool information.
    Info(ToolArgs),
}

/// Dataset selection shared by `check` and `download`.
#[derive(Args, Debug, Clone)]
struct SubsetArgs {
    /// Root directory holding all datasets (defaults to the settings value).
    #[arg(long)]
    root: Option<PathBuf>,

    /// Dataset name.
    #[arg(long, default_value = "audiocaps")]
    dataset: DatasetName,

    /// Subsets to process (defaults to the dataset's main subset).
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    subsets: Vec<String>,

    /// Hub revision for hub-hosted datasets.
    #[arg(long)]
    revision: Option<String>,

    /// Print reports as JSON lines.
    #[arg(long)]
    json: bool,
}

/// External tool overrides.
#[derive(Args, Debug, Clone, Default)]
struct ToolArgs {
    /// Path to `yt-dlp`.
    #[arg(long)]
    ytdlp_path: Option<String>,

    /// Path to `ffmpeg`.
    #[arg(long)]
    ffmpeg_path: Option<String>,

    /// Path to `zip`.
    #[arg(long)]
    zip_path: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct DownloadArgs {
    #[command(flatten)]
    subsets: SubsetArgs,

    #[command(flatten)]
    tools: ToolArgs,

    /// Re-fetch metadata and rebuild the index even if already prepared.
    #[arg(long)]
    force: bool,

    /// Accept permanently unavailable audio up to the missing fraction.
    #[arg(long)]
    tolerate_partial: bool,

    /// Largest tolerated fraction of unavailable audio (implies `--tolerate-partial`).
    #[arg(long)]
    max_missing_fraction: Option<f64>,

    /// Concurrent per-clip downloads.
    #[arg(long)]
    workers: Option<usize>,

    /// Delete archive parts once a subset is ready.
    #[arg(long)]
    clean_archives: bool,

    /// Hub cache directory.
    #[arg(long)]
    hf_cache_dir: Option<String>,
}

impl SubsetArgs {
    fn root(&self, settings: &AacSettings) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| PathBuf::from(&settings.root))
    }

    fn subsets(&self) -> Vec<String> {
        if self.subsets.is_empty() {
            vec![self.dataset.default_subset().to_string()]
        } else {
            self.subsets.clone()
        }
    }

    fn revision<'a>(&'a self, settings: &'a AacSettings) -> Option<&'a str> {
        self.revision.as_deref().or(settings.hub.revision.as_deref())
    }
}

impl ToolArgs {
    fn apply(&self, settings: &mut AacSettings) {
        if let Some(path) = &self.ytdlp_path {
            settings.tools.ytdlp_path.clone_from(path);
        }
        if let Some(path) = &self.ffmpeg_path {
            settings.tools.ffmpeg_path.clone_from(path);
        }
        if let Some(path) = &self.zip_path {
            settings.tools.zip_path.clone_from(path);
        }
    }
}

impl DownloadArgs {
    fn apply(&self, settings: &mut AacSettings) {
        self.tools.apply(settings);
        if let Some(fraction) = self.max_missing_fraction {
            settings.partial = PartialPolicy::tolerant(fraction);
        } else if self.tolerate_partial {
            settings.partial.enabled = true;
        }
        if let Some(workers) = self.workers {
            settings.fetch.max_workers = workers.max(1);
        }
        if self.clean_archives {
            settings.clean_archives = true;
        }
        if let Some(dir) = &self.hf_cache_dir {
            settings.hub.cache_dir = Some(dir.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut settings = aac_settings::load_settings().context("Failed to load settings")?;
    match &cli.command {
        Command::Download(args) => args.apply(&mut settings),
        Command::Info(tools) => tools.apply(&mut settings),
        Command::Check(_) => {}
    }

    let level = if cli.verbose > 0 {
        aac_core::logging::level_for_verbosity(cli.verbose)
    } else {
        settings.log_level.as_str()
    };
    aac_core::logging::init_subscriber(level);

    aac_settings::set_tool_paths(settings.tools.clone());
    let _ = aac_settings::init_settings(settings.clone());

    let ok = match cli.command {
        Command::Check(args) => commands::check(&args, &settings).await?,
        Command::Download(args) => commands::download(&args, &settings).await?,
        Command::Info(_) => commands::info(&settings).await?,
    };
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
