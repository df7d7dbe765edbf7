//! Persistent record of the servers the connector knows about.
//!
//! Stored as `servers.json`, keyed by port:
//!
//! ```json
//! {
//!   "9876": {
//!     "port": 9876,
//!     "companion_port": 9877,
//!     "pid": 41230,
//!     "started_at": 1767225600,
//!     "state": "running"
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::process::HealthState;
use crate::config::write_json_atomic;
use crate::error::ConfigError;

/// A snapshot of one server handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleRecord {
    /// Port the server listens on.
    pub port: u16,
    /// Port of the Revit RPC handler the server talks to.
    pub companion_port: u16,
    /// Process id, when known.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Start time, unix seconds.
    pub started_at: i64,
    /// Last known health.
    #[serde(default)]
    pub state: HealthState,
}

/// The `servers.json` file.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    /// A registry backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A registry at `~/.revit-mcp/servers.json`.
    #[must_use]
    pub fn open_default() -> Option<Self> {
        crate::config::default_registry_path().map(Self::new)
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads all records. A missing or corrupt file reads as empty.
    #[must_use]
    pub fn load(&self) -> Vec<HandleRecord> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Could not read server registry");
                return Vec::new();
            }
        };

        match serde_json::from_str::<IndexMap<u16, HandleRecord>>(&contents) {
            Ok(records) => records.into_values().collect(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Server registry is corrupt, ignoring it");
                Vec::new()
            }
        }
    }

    /// Replaces the file with `records`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<'a, I>(&self, records: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = &'a HandleRecord>,
    {
        let mut by_port: IndexMap<u16, &HandleRecord> =
            records.into_iter().map(|r| (r.port, r)).collect();
        by_port.sort_keys();
        write_json_atomic(&self.path, &by_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(port: u16) -> HandleRecord {
        HandleRecord {
            port,
            companion_port: port + 1,
            pid: Some(1234),
            started_at: 1_767_225_600,
            state: HealthState::Running,
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempdir().expect("Failed to create temp dir");
        let registry = Registry::new(dir.path().join("servers.json"));
        assert!(registry.load().is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().expect("Failed to create temp dir");
        let registry = Registry::new(dir.path().join("servers.json"));

        let records = [record(9880), record(9876)];
        registry.save(&records).expect("save");

        let loaded = registry.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].port, 9876);
        assert_eq!(loaded[1], record(9880));
    }

    #[test]
    fn corrupt_file_is_empty() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("servers.json");
        std::fs::write(&path, "[[[").expect("write");
        assert!(Registry::new(path).load().is_empty());
    }

    #[test]
    fn state_defaults_to_unknown() {
        let json = r#"{"9876": {"port": 9876, "companion_port": 9877, "started_at": 0}}"#;
        let records: IndexMap<u16, HandleRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(records[&9876].state, HealthState::Unknown);
        assert_eq!(records[&9876].pid, None);
    }
}
