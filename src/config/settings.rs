//! Settings structures and their defaults.
//!
//! These structures map directly to the JSON settings file format. Loading is
//! lenient (every key falls back to its default on its own), updating is
//! strict (unknown keys and malformed values are rejected).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Default port for the MCP server.
pub const DEFAULT_MCP_PORT: u16 = 9876;

/// Default port for the Revit RPC handler.
pub const DEFAULT_REVIT_PORT: u16 = 9877;

/// Default LLM model identifier.
pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-latest";

/// Accepted values for `log_level`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Every recognised settings key, in file order.
pub const SETTINGS_KEYS: [&str; 6] = [
    "mcp_port",
    "revit_port",
    "api_key",
    "model",
    "auto_start",
    "log_level",
];

/// Key used by older versions of the extension for `auto_start`.
const LEGACY_AUTO_START_KEY: &str = "auto_start_server";

/// User configuration shared by the server, the connector and the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Port the MCP server listens on.
    #[serde(default = "default_mcp_port")]
    pub mcp_port: u16,

    /// Port of the Revit RPC handler.
    #[serde(default = "default_revit_port")]
    pub revit_port: u16,

    /// API key for the LLM provider. Empty when not configured.
    #[serde(default)]
    pub api_key: String,

    /// LLM model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Start the server automatically when a query needs it.
    #[serde(default = "default_true", alias = "auto_start_server")]
    pub auto_start: bool,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mcp_port: default_mcp_port(),
            revit_port: default_revit_port(),
            api_key: String::new(),
            model: default_model(),
            auto_start: default_true(),
            log_level: default_log_level(),
        }
    }
}

const fn default_mcp_port() -> u16 {
    DEFAULT_MCP_PORT
}

const fn default_revit_port() -> u16 {
    DEFAULT_REVIT_PORT
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

const fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Builds settings from a stored JSON object.
    ///
    /// Never fails: each missing or malformed key resolves to its default,
    /// unknown keys are ignored.
    #[must_use]
    pub fn from_stored(stored: &Map<String, Value>) -> Self {
        let mut settings = Self::default();

        if let Some(port) = stored_value::<u16>(stored, "mcp_port").filter(|p| *p != 0) {
            settings.mcp_port = port;
        }
        if let Some(port) = stored_value::<u16>(stored, "revit_port").filter(|p| *p != 0) {
            settings.revit_port = port;
        }
        if let Some(key) = stored_value::<String>(stored, "api_key") {
            settings.api_key = key;
        }
        if let Some(model) = stored_value::<String>(stored, "model").filter(|m| !m.is_empty()) {
            settings.model = model;
        }
        if let Some(flag) = stored_value::<bool>(stored, "auto_start")
            .or_else(|| stored_value::<bool>(stored, LEGACY_AUTO_START_KEY))
        {
            settings.auto_start = flag;
        }
        if let Some(level) = stored_value::<String>(stored, "log_level")
            .map(|l| l.to_lowercase())
            .filter(|l| LOG_LEVELS.contains(&l.as_str()))
        {
            settings.log_level = level;
        }

        for key in stored.keys() {
            if !SETTINGS_KEYS.contains(&key.as_str()) && key != LEGACY_AUTO_START_KEY {
                tracing::warn!(key = %key, "Ignoring unknown settings key");
            }
        }

        settings
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mcp_port == 0 || self.revit_port == 0 {
            return Err(ConfigError::validation("ports must be between 1 and 65535"));
        }
        if self.mcp_port == self.revit_port {
            return Err(ConfigError::validation(format!(
                "mcp_port and revit_port must differ (both are {})",
                self.mcp_port
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::validation("model cannot be empty"));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::validation(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }

    /// Merges a partial update into these settings.
    pub fn apply(&mut self, update: SettingsUpdate) {
        if let Some(port) = update.mcp_port {
            self.mcp_port = port;
        }
        if let Some(port) = update.revit_port {
            self.revit_port = port;
        }
        if let Some(key) = update.api_key {
            self.api_key = key;
        }
        if let Some(model) = update.model {
            self.model = model;
        }
        if let Some(flag) = update.auto_start {
            self.auto_start = flag;
        }
        if let Some(level) = update.log_level {
            self.log_level = level.to_lowercase();
        }
    }

    /// Returns the API key with everything but the first four characters
    /// masked, for logging.
    #[must_use]
    pub fn masked_api_key(&self) -> String {
        mask_secret(&self.api_key)
    }
}

/// Masks a secret for display, keeping a short prefix.
#[must_use]
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count == 0 {
        return String::new();
    }
    if count <= 4 {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}{}", "*".repeat(count - 4))
}

/// Reads one stored key, logging (not failing) when its value is malformed.
fn stored_value<T: DeserializeOwned>(stored: &Map<String, Value>, key: &str) -> Option<T> {
    let value = stored.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(key, error = %e, "Malformed settings value, using default");
            None
        }
    }
}

/// A partial settings update, as accepted by the settings store's `save`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    /// New MCP server port.
    #[serde(default)]
    pub mcp_port: Option<u16>,
    /// New Revit RPC handler port.
    #[serde(default)]
    pub revit_port: Option<u16>,
    /// New API key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// New model identifier.
    #[serde(default)]
    pub model: Option<String>,
    /// New auto-start flag.
    #[serde(default)]
    pub auto_start: Option<bool>,
    /// New log level.
    #[serde(default)]
    pub log_level: Option<String>,
}

impl SettingsUpdate {
    /// Parses a partial update from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the value is not an object, contains an
    /// unknown key, or has a value of the wrong type.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let Value::Object(map) = value else {
            return Err(ConfigError::validation("settings update must be a JSON object"));
        };

        if let Some(unknown) = map
            .keys()
            .find(|key| !SETTINGS_KEYS.contains(&key.as_str()))
        {
            return Err(ConfigError::validation(format!(
                "unknown settings key '{unknown}'"
            )));
        }

        serde_json::from_value(Value::Object(map))
            .map_err(|e| ConfigError::validation(format!("malformed settings value: {e}")))
    }

    /// Returns `true` if the update changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.mcp_port.is_none()
            && self.revit_port.is_none()
            && self.api_key.is_none()
            && self.model.is_none()
            && self.auto_start.is_none()
            && self.log_level.is_none()
    }
}
