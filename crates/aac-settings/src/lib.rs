//! # aac-settings
//!
//! Layered settings for dataset preparation.
//!
//! Settings come from three layers, lowest to highest priority:
//! compiled defaults, `~/.aac-datasets/settings.json`, and `AAC_*`
//! environment variables. The CLI applies its own flags on top.
//!
//! External tool locations can additionally be overridden process-wide at
//! runtime with [`set_tool_paths`]; the preparation pipeline reads them via
//! [`tool_paths`] each time it spawns a tool.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

use std::sync::OnceLock;

use parking_lot::RwLock;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::{AacSettings, FetchSettings, HubSettings, PartialPolicy, ToolPaths};

static SETTINGS: OnceLock<AacSettings> = OnceLock::new();
static TOOL_PATHS: RwLock<Option<ToolPaths>> = RwLock::new(None);

/// Get the global settings, loading them on first access.
///
/// Falls back to defaults when loading fails.
pub fn get_settings() -> &'static AacSettings {
    SETTINGS.get_or_init(|| match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            AacSettings::default()
        }
    })
}

/// Install explicit settings as the global value.
///
/// Returns `false` if settings were already initialized.
pub fn init_settings(settings: AacSettings) -> bool {
    SETTINGS.set(settings).is_ok()
}

/// Override external tool locations for the rest of the process.
pub fn set_tool_paths(paths: ToolPaths) {
    tracing::debug!(
        ytdlp = %paths.ytdlp_path,
        ffmpeg = %paths.ffmpeg_path,
        zip = %paths.zip_path,
        "tool paths overridden"
    );
    *TOOL_PATHS.write() = Some(paths);
}

/// Drop any runtime override; [`tool_paths`] falls back to settings again.
pub fn clear_tool_paths() {
    *TOOL_PATHS.write() = None;
}

/// Current tool locations: the runtime override if set, else the settings value.
pub fn tool_paths() -> ToolPaths {
    if let Some(paths) = TOOL_PATHS.read().as_ref() {
        return paths.clone();
    }
    get_settings().tools.clone()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
