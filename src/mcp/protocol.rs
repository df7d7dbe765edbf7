//! Wire types for the MCP server's HTTP API.
//!
//! # Endpoints
//!
//! - `POST /api/v1/generate` takes a [`GenerateRequest`] and answers with a
//!   [`GenerateResponse`].
//! - `GET /api/v1/resources` answers with a list of [`CapabilityDescriptor`].
//! - Every failure is answered with an [`ErrorBody`].

use serde::{Deserialize, Serialize};

use crate::error::McpError;

/// The speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person chatting.
    User,
    /// The model.
    Assistant,
    /// Extra system instructions, folded into the system prompt.
    System,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub content: String,
}

impl ChatMessage {
    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/v1/generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Conversation, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Model override. The server's configured model is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Streaming flag. Accepted, but replies are always sent whole.
    #[serde(default)]
    pub stream: bool,
}

impl GenerateRequest {
    /// A single-turn request.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(prompt)],
            model: None,
            stream: false,
        }
    }

    /// Checks the request has something to answer.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidRequest`] if there is no user message or the
    /// model override is blank.
    pub fn validate(&self) -> Result<(), McpError> {
        if self.messages.is_empty() {
            return Err(McpError::InvalidRequest {
                message: "messages cannot be empty".to_string(),
            });
        }
        if !self.messages.iter().any(|m| m.role == Role::User) {
            return Err(McpError::InvalidRequest {
                message: "at least one user message is required".to_string(),
            });
        }
        if self.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(McpError::InvalidRequest {
                message: "model cannot be blank".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the text of the most recent user message.
    #[must_use]
    pub fn latest_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Reply of `POST /api/v1/generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Unique response id.
    pub id: String,
    /// The model that produced the reply.
    pub model: String,
    /// Creation time, unix seconds.
    pub created: i64,
    /// Generated text.
    pub content: String,
}

/// Whether a capability is an invocable tool or a readable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// An operation with arguments.
    Tool,
    /// Addressable data.
    Resource,
}

/// One entry of `GET /api/v1/resources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Tool name or resource URI.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Tool or resource.
    pub kind: CapabilityKind,
}

/// Structured failure payload.
///
/// ```json
/// { "success": false, "kind": "ConnectionError", "error": "ConnectionError: could not reach ..." }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Always `false`.
    pub success: bool,
    /// Stable error kind.
    pub kind: String,
    /// `"<Kind>: <message>"`.
    pub error: String,
}

impl ErrorBody {
    /// Returns the message part of `error`, without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        self.error
            .strip_prefix(self.kind.as_str())
            .and_then(|rest| rest.strip_prefix(": "))
            .unwrap_or(&self.error)
    }

    /// Converts back into the error it was built from.
    #[must_use]
    pub fn into_error(self) -> McpError {
        let display_prefix = McpError::from_kind(&self.kind, "").to_string();
        let message = self.message();
        let message = message.strip_prefix(&display_prefix).unwrap_or(message);
        McpError::from_kind(&self.kind, message)
    }
}

impl From<&McpError> for ErrorBody {
    fn from(error: &McpError) -> Self {
        Self {
            success: false,
            kind: error.kind().to_string(),
            error: format!("{}: {error}", error.kind()),
        }
    }
}

/// Plain acknowledgement, used by `/shutdown` and `/ping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Always `true`.
    pub success: bool,
    /// Short status text.
    pub message: String,
}

impl Ack {
    /// Creates an acknowledgement.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Reply of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Always `"ok"` while the server answers.
    pub status: String,
    /// Whether the Revit RPC handler answered a probe.
    pub revit_connected: bool,
}

/// Reply of `GET /status`. The connector uses it to recognise and adopt a
/// server it did not launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Always [`SERVER_NAME`](super::jsonrpc::SERVER_NAME).
    pub service: String,
    /// Server version.
    pub version: String,
    /// Server process id.
    pub pid: u32,
    /// Port the server listens on.
    pub mcp_port: u16,
    /// Port of the Revit RPC handler it talks to.
    pub revit_port: u16,
    /// Default model.
    pub model: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_without_optional_fields() {
        let json = r#"{"messages": [{"role": "user", "content": "list walls"}]}"#;
        let request: GenerateRequest = serde_json::from_str(json).unwrap();
        assert!(request.model.is_none());
        assert!(!request.stream);
        assert_eq!(request.latest_user_text(), Some("list walls"));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn reject_unknown_role() {
        let json = r#"{"messages": [{"role": "tool", "content": "x"}]}"#;
        assert!(serde_json::from_str::<GenerateRequest>(json).is_err());
    }

    #[test]
    fn reject_empty_messages() {
        let request = GenerateRequest {
            messages: vec![],
            model: None,
            stream: false,
        };
        assert_eq!(request.validate().unwrap_err().kind(), "InvalidRequest");
    }

    #[test]
    fn reject_assistant_only() {
        let request = GenerateRequest {
            messages: vec![ChatMessage::assistant("hello")],
            model: None,
            stream: false,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn latest_user_text_skips_assistant_turns() {
        let request = GenerateRequest {
            messages: vec![
                ChatMessage::user("first"),
                ChatMessage::assistant("reply"),
                ChatMessage::user("second"),
                ChatMessage::assistant("reply again"),
            ],
            model: None,
            stream: false,
        };
        assert_eq!(request.latest_user_text(), Some("second"));
    }

    #[test]
    fn error_body_prefixes_kind() {
        let error = McpError::Connection {
            message: "the Revit RPC handler".to_string(),
        };
        let body = ErrorBody::from(&error);
        assert!(!body.success);
        assert_eq!(body.kind, "ConnectionError");
        assert_eq!(body.error, "ConnectionError: could not reach the Revit RPC handler");
        assert_eq!(body.message(), "could not reach the Revit RPC handler");

        let restored = body.into_error();
        assert_eq!(restored.to_string(), error.to_string());
    }

    #[test]
    fn capability_kind_is_lowercase() {
        let descriptor = CapabilityDescriptor {
            name: "get_model_info".to_string(),
            description: "Model info".to_string(),
            kind: CapabilityKind::Tool,
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["kind"], "tool");
    }
}
