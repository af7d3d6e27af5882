//! # Settings Loader
//!
//! Centralized settings loading for the trade file converter. Settings come
//! from a JSON file (`settings.json` by default) and can be overridden per
//! deployment through environment variables, optionally declared in a `.env`
//! file next to the binary.
//!
//! ## Environment overrides
//!
//! - `TRADE_INPUT_DIR` - directory polled for broker exports
//! - `TRADE_OUTPUT_DIR` - directory receiving upload and reconciliation files
//! - `TRADE_TRACKING_DB` - tracking table file or directory
//!
//! ## Usage Examples
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! // Load settings from a specific path
//! let settings = settings_loader::load_settings("config/settings.json")?;
//!
//! // Fall back to ./settings.json, then to built-in defaults
//! let path = Some(PathBuf::from("settings.json"));
//! let settings = settings_loader::load_settings_with_fallback(path.as_ref())?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use models::Settings;

pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

pub const ENV_INPUT_DIR: &str = "TRADE_INPUT_DIR";
pub const ENV_OUTPUT_DIR: &str = "TRADE_OUTPUT_DIR";
pub const ENV_TRACKING_DB: &str = "TRADE_TRACKING_DB";

/// Loads settings from a JSON file
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Reading settings file: {}", path.display()))?;
    let settings: Settings = serde_json::from_str(&raw)
        .with_context(|| format!("Parsing settings JSON in {}", path.display()))?;
    Ok(settings)
}

/// Loads settings from the default location (settings.json in the current directory)
pub fn load_default_settings() -> Result<Settings> {
    load_settings(DEFAULT_SETTINGS_FILE)
}

/// Tries the provided path, then the default location. A file that exists
/// but does not parse is an error; when no file is found at all the
/// built-in defaults are used.
pub fn load_settings_with_fallback(path: Option<&PathBuf>) -> Result<Settings> {
    if let Some(settings_path) = path {
        if settings_file_exists(settings_path) {
            return load_settings(settings_path);
        }
        tracing::warn!(path = %settings_path.display(), "settings file not found, trying default location");
    }

    if settings_file_exists(DEFAULT_SETTINGS_FILE) {
        return load_default_settings();
    }

    tracing::warn!("no settings file found, using built-in defaults");
    Ok(Settings::default())
}

/// Checks if a settings file exists at the given path
pub fn settings_file_exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().exists() && path.as_ref().is_file()
}

/// Applies overrides from the process environment, after reading `.env`
/// when one is present.
pub fn apply_env_overrides(settings: &mut Settings) {
    // A missing .env file is the normal case.
    let _ = dotenvy::dotenv();
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Applies overrides from any key lookup; blank values are ignored.
pub fn apply_overrides<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get(ENV_INPUT_DIR) {
        settings.input_dir = v;
    }
    if let Some(v) = get(ENV_OUTPUT_DIR) {
        settings.output_dir = v;
    }
    if let Some(v) = get(ENV_TRACKING_DB) {
        settings.tracking_db = v;
    }
}

/// The polled directory; an empty setting means the current directory.
pub fn resolve_input_dir(settings: &Settings) -> Result<PathBuf> {
    if settings.input_dir.trim().is_empty() {
        std::env::current_dir().context("Cannot determine current directory")
    } else {
        Ok(PathBuf::from(&settings.input_dir))
    }
}
