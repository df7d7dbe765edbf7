//! Anthropic Messages API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{LanguageModel, Prompt};
use crate::error::McpError;
use crate::mcp::protocol::ChatMessage;

/// Public Anthropic API base URL.
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Client for the Anthropic Messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &crate::config::mask_secret(&self.api_key))
            .finish_non_exhaustive()
    }
}

impl AnthropicClient {
    /// Creates a client.
    ///
    /// `base_url` overrides [`DEFAULT_ANTHROPIC_URL`] (used for proxies and
    /// tests). An empty API key is accepted here and reported on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Result<Self, McpError> {
        let base = base_url.unwrap_or(DEFAULT_ANTHROPIC_URL).trim_end_matches('/');
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| McpError::LlmApi {
                message: format!("HTTP client could not be created: {e}"),
            })?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            endpoint: format!("{base}/v1/messages"),
        })
    }

    /// Returns the full messages endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, McpError> {
        if self.api_key.is_empty() {
            return Err(McpError::LlmApi {
                message: "no API key configured".to_string(),
            });
        }

        let request = MessagesRequest {
            model: &prompt.model,
            max_tokens: prompt.max_tokens,
            system: prompt.system.as_deref(),
            messages: &prompt.messages,
        };

        tracing::debug!(
            model = %prompt.model,
            messages = prompt.messages.len(),
            "Sending completion request"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Completion request failed");
                McpError::LlmApi {
                    message: if e.is_timeout() {
                        "request timed out".to_string()
                    } else {
                        "provider unreachable".to_string()
                    },
                }
            })?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                return Err(McpError::LlmApi {
                    message: "API key was rejected".to_string(),
                })
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(McpError::LlmApi {
                    message: "rate limited, try again shortly".to_string(),
                })
            }
            _ => {}
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| status.to_string());
            tracing::error!(status = status.as_u16(), body = %body, "Provider returned an error");
            return Err(McpError::LlmApi {
                message: format!("HTTP {}: {detail}", status.as_u16()),
            });
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Malformed provider response");
            McpError::LlmApi {
                message: "malformed provider response".to_string(),
            }
        })?;

        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_url() {
        let client = AnthropicClient::new("key", Some("http://127.0.0.1:1234/")).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:1234/v1/messages");

        let client = AnthropicClient::new("key", None).unwrap();
        assert_eq!(client.endpoint(), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn debug_masks_api_key() {
        let client = AnthropicClient::new("sk-ant-secret", None).unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret"));
    }

    #[tokio::test]
    async fn empty_key_fails_before_network() {
        let client = AnthropicClient::new("", Some("http://127.0.0.1:9")).unwrap();
        let prompt = Prompt {
            model: "m".to_string(),
            system: None,
            messages: vec![],
            max_tokens: 16,
        };
        let err = client.complete(&prompt).await.unwrap_err();
        assert_eq!(err.kind(), "LLMAPIError");
    }
}
