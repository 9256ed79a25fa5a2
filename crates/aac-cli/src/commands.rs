//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use aac_access::CaptionDataset;
use aac_core::{DatasetSpec, dataset_spec};
use aac_prepare::{
    CheckReport, ExternalToolFetch, FetchStrategy, HttpFetch, HubFetch, PrepareOptions,
    PrepareReport, Preparer, ProcessOptions, ProcessRunner, Strategies, TokioProcessRunner,
};
use aac_settings::AacSettings;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{DownloadArgs, SubsetArgs};

fn specs(args: &SubsetArgs, settings: &AacSettings) -> Result<Vec<DatasetSpec>> {
    args.subsets()
        .iter()
        .map(|subset| {
            dataset_spec(args.dataset, subset, args.revision(settings))
                .with_context(|| format!("Invalid selection {}/{subset}", args.dataset))
        })
        .collect()
}

fn strategies(
    spec: &DatasetSpec,
    settings: &AacSettings,
    runner: &Arc<dyn ProcessRunner>,
) -> Strategies {
    let hub = match &settings.hub.cache_dir {
        Some(dir) => HubFetch::with_cache_dir(dir),
        None => HubFetch::new(),
    };
    Strategies::new()
        .with_hub(Arc::new(hub))
        .with_http(Arc::new(HttpFetch::new()))
        .with_clips(Arc::new(ExternalToolFetch::new(
            Arc::clone(runner),
            spec.sample_rate,
        )))
}

/// Indices of `specs` grouped so that no two groups write a common path.
fn conflict_groups(specs: &[DatasetSpec]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, spec) in specs.iter().enumerate() {
        let (touching, mut rest): (Vec<_>, Vec<_>) = groups
            .into_iter()
            .partition(|g| g.iter().any(|&j| specs[j].shares_files_with(spec)));
        let mut merged: Vec<usize> = touching.into_iter().flatten().collect();
        merged.push(i);
        merged.sort_unstable();
        rest.push(merged);
        groups = rest;
    }
    groups.sort_by_key(|g| g.first().copied());
    groups
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "failed to serialize report"),
    }
}

/// `check`: verify every selected subset without touching the filesystem.
pub async fn check(args: &SubsetArgs, settings: &AacSettings) -> Result<bool> {
    let root = args.root(settings);
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let mut all_ready = true;

    for spec in specs(args, settings)? {
        let strategies = strategies(&spec, settings, &runner);
        let preparer = Preparer::new(
            &root,
            spec.clone(),
            Arc::new(strategies),
            Arc::clone(&runner),
            PrepareOptions::from_settings(settings),
        );
        let report = preparer
            .check()
            .await
            .with_context(|| format!("Failed to check {}", spec.label()))?;
        all_ready &= report.ready;

        if args.json {
            print_json(&report);
        } else {
            print_check(&root, spec, &report);
        }
    }
    Ok(all_ready)
}

fn print_check(root: &Path, spec: DatasetSpec, report: &CheckReport) {
    let status = if report.ready { "ready" } else { "not ready" };
    println!("{}: {status}", report.label);
    println!(
        "  metadata: {} valid, {} missing, {} invalid",
        report.metadata.valid, report.metadata.missing, report.metadata.invalid
    );
    if let Some(audio) = report.audio {
        println!(
            "  audio:    {} valid, {} missing, {} invalid",
            audio.valid, audio.missing, audio.invalid
        );
    }
    if let Some(problem) = &report.problem {
        println!("  problem:  {problem}");
    }
    if report.ready {
        match CaptionDataset::open(root, spec) {
            Ok(ds) => println!("  samples:  {}", ds.len()),
            Err(e) => println!("  samples:  unavailable ({e})"),
        }
    }
}

/// `download`: prepare every selected subset.
///
/// Subsets that write disjoint paths run concurrently; subsets sharing
/// metadata, archives, or audio directories run one after another.
///
/// Ctrl-C cancels all subsets; partial downloads are kept for the next run.
pub async fn download(args: &DownloadArgs, settings: &AacSettings) -> Result<bool> {
    let root = args.subsets.root(settings);
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create root directory: {}", root.display()))?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    let _signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            signal_token.cancel();
        }
    });

    let specs = specs(&args.subsets, settings)?;
    let groups = conflict_groups(&specs);
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let mut slots: Vec<Option<Preparer>> = specs
        .into_iter()
        .map(|spec| {
            let strategies: Arc<dyn FetchStrategy> =
                Arc::new(strategies(&spec, settings, &runner));
            let options = PrepareOptions {
                force: args.force,
                tools: Some(settings.tools.clone()),
                cancel: cancel.clone(),
                ..PrepareOptions::from_settings(settings)
            };
            Some(Preparer::new(
                &root,
                spec,
                strategies,
                Arc::clone(&runner),
                options,
            ))
        })
        .collect();
    let grouped: Vec<Vec<Preparer>> = groups
        .iter()
        .map(|group| group.iter().filter_map(|&i| slots[i].take()).collect())
        .collect();
    debug!(groups = grouped.len(), "preparing subset groups");

    // Groups run concurrently; subsets within a group share files and run in turn.
    let results = futures::future::join_all(grouped.into_iter().map(|mut group| async move {
        let mut done = Vec::with_capacity(group.len());
        for preparer in &mut group {
            let result = preparer.prepare().await;
            done.push((preparer.report().clone(), result));
        }
        done
    }))
    .await;

    let mut all_ready = true;
    for (report, result) in results.into_iter().flatten() {
        if args.subsets.json {
            print_json(&report);
        } else {
            print_download(&report);
        }
        if let Err(e) = result {
            all_ready = false;
            eprintln!("{}/{}: {e}", report.dataset, report.subset);
        }
    }
    Ok(all_ready)
}

fn print_download(report: &PrepareReport) {
    let transitions: Vec<String> = report.transitions.iter().map(ToString::to_string).collect();
    println!(
        "{}/{}: {} ({})",
        report.dataset,
        report.subset,
        report.state,
        transitions.join(" -> ")
    );
    let counts = &report.counts;
    println!(
        "  fetched {} metadata, {} archives; extracted {}; indexed {} (dropped {})",
        counts.metadata_fetched,
        counts.archives_fetched,
        counts.entries_extracted,
        counts.records_indexed,
        counts.records_dropped
    );
    if let Some(clips) = &report.clips {
        println!(
            "  clips: {} ok, {} failed, {} cancelled",
            clips.succeeded.len(),
            clips.failed.len(),
            clips.cancelled
        );
    }
}

/// `info`: package, platform, and tool versions.
pub async fn info(settings: &AacSettings) -> Result<bool> {
    println!("aac-datasets {}", env!("CARGO_PKG_VERSION"));
    println!("os: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    match std::env::current_exe() {
        Ok(path) => println!("executable: {}", path.display()),
        Err(e) => println!("executable: unknown ({e})"),
    }
    println!("root: {}", settings.root);
    println!("settings: {}", aac_settings::settings_path().display());

    let runner = TokioProcessRunner;
    let tools = &settings.tools;
    for (name, program, flag) in [
        ("yt-dlp", &tools.ytdlp_path, "--version"),
        ("ffmpeg", &tools.ffmpeg_path, "-version"),
        ("zip", &tools.zip_path, "-v"),
    ] {
        let version = tool_version(&runner, program, flag).await;
        println!("{name}: {version} [{program}]");
    }
    Ok(true)
}

async fn tool_version(runner: &dyn ProcessRunner, program: &str, flag: &str) -> String {
    let opts = ProcessOptions::with_timeout(10_000);
    match runner.run(program, &[flag.to_string()], &opts).await {
        Ok(out) if out.success() => out
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("unknown")
            .to_string(),
        Ok(out) => format!("error ({})", out.failure_summary()),
        Err(e) => format!("not found ({e})"),
    }
}
