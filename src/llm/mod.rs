//! Language model backends.
//!
//! The request router talks to the model through [`LanguageModel`], so the
//! HTTP client can be replaced in tests or pointed at another provider.

mod anthropic;

pub use anthropic::{AnthropicClient, DEFAULT_ANTHROPIC_URL};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::McpError;
use crate::mcp::protocol::ChatMessage;

/// Default output budget for one completion.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// One fully assembled completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    /// Model identifier.
    pub model: String,
    /// System prompt, including any Revit model context.
    pub system: Option<String>,
    /// Conversation, oldest first. Contains only user and assistant turns.
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

/// A chat completion backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Runs one completion and returns the generated text.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::LlmApi`] on any transport or provider failure.
    async fn complete(&self, prompt: &Prompt) -> Result<String, McpError>;
}
