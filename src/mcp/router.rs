//! Chat request routing: intent detection, Revit context, one LLM call.

use std::sync::Arc;

use serde_json::Value;

use super::intent::{self, Intent};
use super::protocol::{ChatMessage, GenerateRequest, GenerateResponse, Role};
use crate::error::McpError;
use crate::llm::{LanguageModel, Prompt, DEFAULT_MAX_TOKENS};
use crate::revit::RevitClient;

/// Base instructions sent with every request.
pub const SYSTEM_PROMPT: &str = "You are an assistant that helps with Revit models. \
Answer questions about the model and provide insights.";

/// Maximum characters of Revit JSON placed in the system prompt.
pub const CONTEXT_CHAR_BUDGET: usize = 8000;

/// Routes `POST /api/v1/generate` requests.
#[derive(Clone)]
pub struct RequestRouter {
    revit: RevitClient,
    llm: Arc<dyn LanguageModel>,
    default_model: String,
}

impl std::fmt::Debug for RequestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRouter")
            .field("revit", &self.revit.base_url().as_str())
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl RequestRouter {
    /// Creates a router.
    pub fn new(
        revit: RevitClient,
        llm: Arc<dyn LanguageModel>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            revit,
            llm,
            default_model: default_model.into(),
        }
    }

    /// The model used when a request names none.
    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// The Revit client used for context and tools.
    #[must_use]
    pub const fn revit(&self) -> &RevitClient {
        &self.revit
    }

    /// Answers one chat request.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::InvalidRequest`] for malformed requests, the Revit
    /// client's error when model context was needed but could not be
    /// fetched, and [`McpError::LlmApi`] when the model call fails.
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, McpError> {
        request.validate()?;

        if request.stream {
            tracing::warn!("Streaming was requested; replying with a single response");
        }

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let intent = request
            .latest_user_text()
            .map_or(Intent::None, intent::detect);
        tracing::debug!(?intent, "Detected intent");

        let context = self.fetch_context(&intent).await?;
        let prompt = build_prompt(&request, &model, context.as_deref(), DEFAULT_MAX_TOKENS);

        let content = self.llm.complete(&prompt).await?;

        let response = GenerateResponse {
            id: format!("msg-{}", uuid::Uuid::new_v4().simple()),
            model,
            created: chrono::Utc::now().timestamp(),
            content,
        };
        tracing::info!(id = %response.id, model = %response.model, "Generated response");

        Ok(response)
    }

    async fn fetch_context(&self, intent: &Intent) -> Result<Option<String>, McpError> {
        let summary = match intent {
            Intent::None => return Ok(None),
            Intent::ModelInfo => {
                let data = self.revit.model_info().await?;
                format!("Model information:\n{}", truncate_json(&data))
            }
            Intent::Elements { category } => {
                let data = self.revit.elements(category).await?;
                format!(
                    "Found {} elements in category {category}\n{}",
                    element_count(&data),
                    truncate_json(&data)
                )
            }
            Intent::Parameters { element_id } => {
                let data = self.revit.element_parameters(*element_id).await?;
                format!(
                    "Parameters of element {element_id}:\n{}",
                    truncate_json(&data)
                )
            }
        };
        Ok(Some(summary))
    }
}

/// Assembles the system prompt and conversation for the model.
fn build_prompt(
    request: &GenerateRequest,
    model: &str,
    context: Option<&str>,
    max_tokens: u32,
) -> Prompt {
    let mut system = String::from(SYSTEM_PROMPT);

    for extra in request.messages.iter().filter(|m| m.role == Role::System) {
        system.push_str("\n\n");
        system.push_str(&extra.content);
    }

    if let Some(context) = context {
        system.push_str("\n\nRevit model context:\n");
        system.push_str(context);
    }

    let messages: Vec<ChatMessage> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();

    Prompt {
        model: model.to_string(),
        system: Some(system),
        messages,
        max_tokens,
    }
}

/// Counts the elements in a category reply.
///
/// Accepts a bare array, an object with an `elements` array, or an object
/// with a numeric `count`.
fn element_count(data: &Value) -> usize {
    match data {
        Value::Array(items) => items.len(),
        Value::Object(map) => map
            .get("elements")
            .and_then(Value::as_array)
            .map(Vec::len)
            .or_else(|| {
                map.get("count")
                    .and_then(Value::as_u64)
                    .and_then(|n| usize::try_from(n).ok())
            })
            .unwrap_or(0),
        _ => 0,
    }
}

/// Serialises `data`, cutting it at [`CONTEXT_CHAR_BUDGET`] characters.
fn truncate_json(data: &Value) -> String {
    let text = data.to_string();
    if text.chars().count() <= CONTEXT_CHAR_BUDGET {
        return text;
    }
    let mut truncated: String = text.chars().take(CONTEXT_CHAR_BUDGET).collect();
    truncated.push_str("... (truncated)");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn element_count_shapes() {
        assert_eq!(element_count(&json!([1, 2, 3])), 3);
        assert_eq!(element_count(&json!({ "elements": [1, 2] })), 2);
        assert_eq!(element_count(&json!({ "count": 42, "walls": [] })), 42);
        assert_eq!(element_count(&json!("nope")), 0);
    }

    #[test]
    fn truncation_respects_budget() {
        let big = json!("x".repeat(CONTEXT_CHAR_BUDGET * 2));
        let text = truncate_json(&big);
        assert!(text.ends_with("... (truncated)"));
        assert_eq!(
            text.chars().count(),
            CONTEXT_CHAR_BUDGET + "... (truncated)".len()
        );

        let small = json!({ "a": 1 });
        assert_eq!(truncate_json(&small), r#"{"a":1}"#);
    }

    #[test]
    fn prompt_folds_system_messages() {
        let request = GenerateRequest {
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: "Answer in metric units.".to_string(),
                },
                ChatMessage::user("list walls"),
            ],
            model: None,
            stream: false,
        };
        let prompt = build_prompt(&request, "m", Some("Found 3 elements in category Walls"), 100);

        let system = prompt.system.expect("system prompt");
        assert!(system.starts_with(SYSTEM_PROMPT));
        assert!(system.contains("Answer in metric units."));
        assert!(system.contains("Revit model context:\nFound 3 elements"));
        assert_eq!(prompt.messages, vec![ChatMessage::user("list walls")]);
        assert_eq!(prompt.max_tokens, 100);
    }

    #[test]
    fn prompt_without_context() {
        let request = GenerateRequest::from_prompt("hello");
        let prompt = build_prompt(&request, "m", None, 100);
        assert_eq!(prompt.system.as_deref(), Some(SYSTEM_PROMPT));
    }
}
