//! Error types for revit-mcp.
//!
//! # Security Note
//!
//! Error messages are shown to the person using the chat client, so they are
//! kept short and NEVER include the API key. Full detail (status codes,
//! underlying I/O errors) goes to the log instead.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while reading or writing local JSON files
/// (the settings store and the server registry).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A file could not be read.
    #[error("failed to read file: {path}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A file could not be written.
    #[error("failed to write file: {path}")]
    WriteError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A file could not be parsed.
    #[error("failed to parse file: {path}")]
    ParseError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A settings key was unknown or its value malformed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

impl ConfigError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }
}

/// The error taxonomy shared by the request router, the Revit RPC client,
/// the LLM client and the connector.
///
/// Every variant maps to one stable kind string (see [`McpError::kind`]) that
/// travels in the structured `{"success": false, ...}` payload.
#[derive(Error, Debug)]
pub enum McpError {
    /// The Revit RPC handler (or the MCP server, seen from the connector)
    /// could not be reached.
    #[error("could not reach {message}")]
    Connection {
        /// What was unreachable and after how many attempts.
        message: String,
    },

    /// The Revit RPC handler answered with an application-level failure.
    #[error("Revit RPC handler reported an error: {message}")]
    Rpc {
        /// The handler's own error message.
        message: String,
    },

    /// The underlying Revit model operation failed.
    #[error("Revit model operation failed: {message}")]
    RevitApi {
        /// The handler's own error message.
        message: String,
    },

    /// The external LLM call failed or returned a non-success status.
    #[error("language model request failed: {message}")]
    LlmApi {
        /// Short description of the failure.
        message: String,
    },

    /// A settings key was unknown or malformed.
    #[error("invalid setting: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    /// The incoming request body was malformed.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of what's wrong.
        message: String,
    },
}

impl McpError {
    /// Returns the stable kind string used on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "ConnectionError",
            Self::Rpc { .. } => "RPCError",
            Self::RevitApi { .. } => "RevitAPIError",
            Self::LlmApi { .. } => "LLMAPIError",
            Self::ConfigValidation { .. } => "ConfigValidationError",
            Self::InvalidRequest { .. } => "InvalidRequest",
        }
    }

    /// Returns the HTTP status code the MCP server answers with.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } | Self::ConfigValidation { .. } => 400,
            Self::Connection { .. } | Self::LlmApi { .. } => 502,
            Self::Rpc { .. } | Self::RevitApi { .. } => 422,
        }
    }

    /// Rebuilds an error from a wire kind and message.
    ///
    /// Unknown kinds are reported as RPC errors.
    #[must_use]
    pub fn from_kind(kind: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            "ConnectionError" => Self::Connection { message },
            "RevitAPIError" => Self::RevitApi { message },
            "LLMAPIError" => Self::LlmApi { message },
            "ConfigValidationError" => Self::ConfigValidation { message },
            "InvalidRequest" => Self::InvalidRequest { message },
            _ => Self::Rpc { message },
        }
    }

    /// Returns `true` for errors worth showing connection guidance for.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

impl From<ConfigError> for McpError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::ValidationError { message } => Self::ConfigValidation { message },
            other => Self::ConfigValidation {
                message: other.to_string(),
            },
        }
    }
}

/// Errors from the connector's process manager.
///
/// Launch failures are kept apart from "started but never answered" so the
/// caller can show different guidance.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The server executable does not exist.
    #[error("server executable not found: {path}")]
    ExecutableNotFound {
        /// Where the executable was expected.
        path: PathBuf,
    },

    /// The operating system refused to launch the server.
    #[error("failed to launch server process: {path}")]
    Spawn {
        /// The executable that was launched.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The port is held by a process that is not a revit-mcp server.
    #[error("port {port} is already in use by another program")]
    PortInUse {
        /// The occupied port.
        port: u16,
    },

    /// The server was launched but never answered on its port.
    #[error("server on port {port} did not respond within {waited:?}")]
    Unresponsive {
        /// The port that was polled.
        port: u16,
        /// How long the manager waited.
        waited: Duration,
    },

    /// The server ignored the shutdown request and could not be terminated.
    #[error("server on port {port} is still running and has no known process id")]
    StillRunning {
        /// The port the server listens on.
        port: u16,
    },

    /// Forced termination failed.
    #[error("failed to terminate server process {pid}")]
    Terminate {
        /// The process id.
        pid: u32,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// Returns `true` if the server never got as far as running.
    #[must_use]
    pub const fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            Self::ExecutableNotFound { .. } | Self::Spawn { .. } | Self::PortInUse { .. }
        )
    }
}
