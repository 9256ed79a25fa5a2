//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a user file
//! may hold any subset of fields; missing fields keep their defaults.

use aac_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// Loaded from `~/.aac-datasets/settings.json` with defaults applied for
/// missing fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "root": "/data",
///   "tools": { "ffmpegPath": "/opt/ffmpeg/bin/ffmpeg" },
///   "partial": { "enabled": true, "maxMissingFraction": 0.1 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AacSettings {
    /// Root directory holding all datasets.
    pub root: String,
    /// Default log level (`warn`, `info`, `debug`, ...).
    pub log_level: String,
    /// Hub client settings.
    pub hub: HubSettings,
    /// External tool locations.
    pub tools: ToolPaths,
    /// Download behavior.
    pub fetch: FetchSettings,
    /// Tolerance for permanently unavailable audio.
    pub partial: PartialPolicy,
    /// Remove archive parts once a subset is ready.
    pub clean_archives: bool,
}

impl Default for AacSettings {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
            log_level: "warn".to_string(),
            hub: HubSettings::default(),
            tools: ToolPaths::default(),
            fetch: FetchSettings::default(),
            partial: PartialPolicy::default(),
            clean_archives: false,
        }
    }
}

/// Hugging Face hub settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Hub cache directory; `None` uses the `hf-hub` default.
    pub cache_dir: Option<String>,
    /// Revision override for hub-hosted datasets.
    pub revision: Option<String>,
}

/// Locations of the external programs used during preparation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolPaths {
    /// Stream locator (`yt-dlp`).
    pub ytdlp_path: String,
    /// Trim/re-encode tool (`ffmpeg`).
    pub ffmpeg_path: String,
    /// Zip tool used to merge spanned archives.
    pub zip_path: String,
    /// Per-clip `yt-dlp`/`ffmpeg` timeout in milliseconds.
    pub timeout_ms: u64,
    /// Timeout of one spanned-archive merge in milliseconds.
    ///
    /// Merges rewrite tens to hundreds of gigabytes, so this is hours, not
    /// minutes.
    pub merge_timeout_ms: u64,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            zip_path: "zip".to_string(),
            timeout_ms: 120_000,
            merge_timeout_ms: 12 * 60 * 60 * 1000,
        }
    }
}

/// Download behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchSettings {
    /// Worker pool size for per-clip fetches.
    pub max_workers: usize,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_workers: 8,
            retry: RetryConfig::default(),
        }
    }
}

/// Whether a subset may be declared ready with some audio unavailable.
///
/// Disabled by default: every expected audio file must verify.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialPolicy {
    /// Tolerate missing audio at all.
    pub enabled: bool,
    /// Largest tolerated fraction of missing audio, in `[0, 1]`.
    pub max_missing_fraction: f64,
}

impl Default for PartialPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_missing_fraction: 0.2,
        }
    }
}

impl PartialPolicy {
    /// Strict policy: nothing may be missing.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Tolerant policy with the given threshold.
    pub fn tolerant(max_missing_fraction: f64) -> Self {
        Self {
            enabled: true,
            max_missing_fraction: max_missing_fraction.clamp(0.0, 1.0),
        }
    }

    /// Whether `missing` unavailable files out of `total` are acceptable.
    #[allow(clippy::cast_precision_loss)]
    pub fn accepts(&self, missing: usize, total: usize) -> bool {
        if missing == 0 {
            return true;
        }
        if !self.enabled || total == 0 || missing >= total {
            return false;
        }
        (missing as f64 / total as f64) <= self.max_missing_fraction
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
