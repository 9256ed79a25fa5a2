//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`AacSettings::default()`]
//! 2. If `~/.aac-datasets/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `AAC_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::AacSettings;

/// Resolve the path to the settings file (`~/.aac-datasets/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".aac-datasets").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<AacSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or out-of-range values, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<AacSettings> {
    let mut settings = load_file_layer(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<AacSettings> {
    let defaults = serde_json::to_value(AacSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject values the pipeline cannot run with.
pub fn validate(settings: &AacSettings) -> Result<()> {
    if settings.fetch.max_workers == 0 {
        return Err(SettingsError::InvalidValue(
            "fetch.maxWorkers must be at least 1".into(),
        ));
    }
    if !(0.0..=1.0).contains(&settings.partial.max_missing_fraction) {
        return Err(SettingsError::InvalidValue(format!(
            "partial.maxMissingFraction must be within [0, 1], got {}",
            settings.partial.max_missing_fraction
        )));
    }
    Ok(())
}

/// Apply `AAC_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored (the file/default value is kept).
pub fn apply_overrides(settings: &mut AacSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Paths ───────────────────────────────────────────────────────
    if let Some(v) = string("AAC_ROOT") {
        settings.root = v;
    }
    if let Some(v) = string("AAC_LOG_LEVEL") {
        settings.log_level = v;
    }
    if let Some(v) = string("AAC_HF_CACHE_DIR") {
        settings.hub.cache_dir = Some(v);
    }
    if let Some(v) = string("AAC_REVISION") {
        settings.hub.revision = Some(v);
    }

    // ── External tools ──────────────────────────────────────────────
    if let Some(v) = string("AAC_YTDLP_PATH") {
        settings.tools.ytdlp_path = v;
    }
    if let Some(v) = string("AAC_FFMPEG_PATH") {
        settings.tools.ffmpeg_path = v;
    }
    if let Some(v) = string("AAC_ZIP_PATH") {
        settings.tools.zip_path = v;
    }

    // ── Numeric and boolean values ──────────────────────────────────
    if let Some(v) = parse_override(&lookup, "AAC_TOOL_TIMEOUT_MS", |v| {
        parse_u64_range(v, 1000, 86_400_000)
    }) {
        settings.tools.timeout_ms = v;
    }
    if let Some(v) = parse_override(&lookup, "AAC_MERGE_TIMEOUT_MS", |v| {
        parse_u64_range(v, 60_000, 7 * 86_400_000)
    }) {
        settings.tools.merge_timeout_ms = v;
    }
    if let Some(v) = parse_override(&lookup, "AAC_MAX_WORKERS", |v| parse_usize_range(v, 1, 256)) {
        settings.fetch.max_workers = v;
    }
    if let Some(v) = parse_override(&lookup, "AAC_MAX_RETRIES", |v| parse_u32_range(v, 0, 20)) {
        settings.fetch.retry.max_retries = v;
    }
    if let Some(v) = parse_override(&lookup, "AAC_TOLERATE_PARTIAL", parse_bool) {
        settings.partial.enabled = v;
    }
    if let Some(v) = parse_override(&lookup, "AAC_MAX_MISSING_FRACTION", parse_fraction) {
        settings.partial.max_missing_fraction = v;
    }
    if let Some(v) = parse_override(&lookup, "AAC_CLEAN_ARCHIVES", parse_bool) {
        settings.clean_archives = v;
    }
}

fn parse_override<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = lookup(name)?;
    let parsed = parse(&val);
    if parsed.is_none() {
        warn!(key = name, value = %val, "invalid env override, ignoring");
    }
    parsed
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a fraction in `[0, 1]`.
pub fn parse_fraction(val: &str) -> Option<f64> {
    let f: f64 = val.parse().ok()?;
    (0.0..=1.0).contains(&f).then_some(f)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
