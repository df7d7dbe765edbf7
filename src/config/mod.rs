//! Settings persistence and default file locations.
//!
//! # File Locations
//!
//! Everything lives in one per-user directory:
//!
//! - **Linux/macOS:** `~/.revit-mcp/`
//! - **Windows:** `%USERPROFILE%\.revit-mcp\`
//!
//! | File            | Contents                                   |
//! |-----------------|--------------------------------------------|
//! | `settings.json` | User settings (see [`Settings`])           |
//! | `servers.json`  | Process handles recorded by the connector  |
//! | `server.log`    | stderr of servers launched by the connector|
//!
//! # Example Settings
//!
//! See `config/example-settings.json` for a complete example.

mod settings;
mod store;

pub use settings::{
    mask_secret, Settings, SettingsUpdate, DEFAULT_MCP_PORT, DEFAULT_MODEL, DEFAULT_REVIT_PORT,
    LOG_LEVELS, SETTINGS_KEYS,
};
pub use store::SettingsStore;

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::ConfigError;

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.revit-mcp/`
/// - **Windows:** `%USERPROFILE%\.revit-mcp\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".revit-mcp"))
}

/// Returns the default settings file path.
#[must_use]
pub fn default_settings_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("settings.json"))
}

/// Returns the default server registry path.
#[must_use]
pub fn default_registry_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("servers.json"))
}

/// Returns the default log file for servers launched by the connector.
#[must_use]
pub fn default_log_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("server.log"))
}

/// Loads settings from `path`, or from the default location if `None`.
///
/// Never fails: a missing home directory, file or key yields defaults.
#[must_use]
pub fn load_settings(path: Option<&Path>) -> Settings {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match default_settings_path() {
            Some(p) => p,
            None => {
                tracing::warn!("No home directory found, using default settings");
                return Settings::default();
            }
        },
    };
    SettingsStore::new(path).load()
}

/// Serialises `value` as pretty JSON and atomically replaces `path` with it.
///
/// The data is written to a temporary file in the same directory and renamed
/// over the target, so readers never observe a partial file.
///
/// # Errors
///
/// Returns [`ConfigError::WriteError`] if the directory cannot be created or
/// the file cannot be written or renamed.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let write_error = |source: std::io::Error| ConfigError::WriteError {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_error)?;

    let mut temp = NamedTempFile::new_in(&dir).map_err(write_error)?;
    serde_json::to_writer_pretty(&mut temp, value)
        .map_err(|e| write_error(std::io::Error::other(e)))?;
    temp.write_all(b"\n").map_err(write_error)?;
    temp.as_file().sync_all().map_err(write_error)?;
    temp.persist(path).map_err(|e| write_error(e.error))?;

    Ok(())
}
