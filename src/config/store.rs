//! The settings store: lenient loads, validated atomic saves.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};

use super::settings::{Settings, SettingsUpdate};
use super::write_json_atomic;
use crate::error::ConfigError;

/// A settings file guarded by a process-wide lock.
///
/// `load` and `save` are serialised, so a save never interleaves with another
/// save or with a load of the same store.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SettingsStore {
    /// Creates a store backed by `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Creates a store at the default location (`~/.revit-mcp/settings.json`).
    ///
    /// Returns `None` if no home directory can be determined.
    #[must_use]
    pub fn open_default() -> Option<Self> {
        super::default_settings_path().map(Self::new)
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the current settings.
    ///
    /// Never fails: a missing or corrupt file yields defaults, and each key
    /// with a malformed value falls back to its default on its own.
    #[must_use]
    pub fn load(&self) -> Settings {
        let _guard = self.guard();
        self.read_unlocked()
    }

    /// Merges `partial` into the stored settings and persists the result.
    ///
    /// `partial` must be a JSON object using only recognised keys. On any
    /// error the file on disk is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for unknown keys, malformed
    /// values or settings that fail validation, and
    /// [`ConfigError::WriteError`] if the file cannot be written.
    pub fn save(&self, partial: Value) -> Result<Settings, ConfigError> {
        let update = SettingsUpdate::from_value(partial)?;

        let _guard = self.guard();
        let mut settings = self.read_unlocked();
        settings.apply(update);
        settings.validate()?;

        write_json_atomic(&self.path, &settings)?;
        tracing::info!(path = %self.path.display(), "Settings saved");

        Ok(settings)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken state.
        self.lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_unlocked(&self) -> Settings {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No settings file, using defaults");
                return Settings::default();
            }
            Err(e) => {
                let error = ConfigError::ReadError {
                    path: self.path.clone(),
                    source: e,
                };
                tracing::warn!(error = %error, "Using default settings");
                return Settings::default();
            }
        };

        match serde_json::from_str::<Map<String, Value>>(&contents) {
            Ok(stored) => Settings::from_stored(&stored),
            Err(e) => {
                let error = ConfigError::ParseError {
                    path: self.path.clone(),
                    source: e,
                };
                tracing::warn!(error = %error, "Settings file is corrupt, using defaults");
                Settings::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = SettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(store.load(), Settings::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn save_rejects_invalid_combination_without_writing() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = SettingsStore::new(dir.path().join("settings.json"));

        let result = store.save(json!({ "mcp_port": 9877 }));
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
        assert!(!store.path().exists());
    }

    #[test]
    fn save_normalises_log_level_case() {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = SettingsStore::new(dir.path().join("settings.json"));

        let saved = store.save(json!({ "log_level": "DEBUG" })).expect("save");
        assert_eq!(saved.log_level, "debug");
        assert_eq!(store.load().log_level, "debug");
    }
}
