//! HTTP client for a running MCP server.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;

use super::{ConnectorEvents, NoopEvents};
use crate::error::McpError;
use crate::mcp::protocol::{CapabilityDescriptor, ErrorBody, GenerateRequest, GenerateResponse};

// Long enough for the server's own Revit retries plus one LLM call.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(180);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to the MCP server's HTTP API.
#[derive(Clone)]
pub struct McpClient {
    http: reqwest::Client,
    base_url: Url,
    events: Arc<dyn ConnectorEvents>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// A client for a server on `127.0.0.1:port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(port: u16) -> Result<Self, McpError> {
        Self::with_base_url(&format!("http://127.0.0.1:{port}"))
    }

    /// A client for a server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// created.
    pub fn with_base_url(base_url: &str) -> Result<Self, McpError> {
        let base_url = Url::parse(base_url).map_err(|e| McpError::InvalidRequest {
            message: format!("invalid server URL '{base_url}': {e}"),
        })?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(GENERATE_TIMEOUT)
            .build()
            .map_err(|e| McpError::Connection {
                message: format!("the local HTTP stack ({e})"),
            })?;

        Ok(Self {
            http,
            base_url,
            events: Arc::new(NoopEvents),
        })
    }

    /// Reports every query result to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn ConnectorEvents>) -> Self {
        self.events = events;
        self
    }

    /// `GET /api/v1/resources`
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Connection`] if the server is unreachable, or the
    /// error the server reported.
    pub async fn resources(&self) -> Result<Vec<CapabilityDescriptor>, McpError> {
        let url = self.url("api/v1/resources")?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.unreachable(&e))?;
        read_json(response).await
    }

    /// `POST /api/v1/generate`
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Connection`] if the server is unreachable, or the
    /// error the server reported (rebuilt from its error payload).
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, McpError> {
        let result = self.send_generate(request).await;
        self.events.on_query_result(result.as_ref());
        result
    }

    /// Sends a single user message with the server's default model.
    ///
    /// # Errors
    ///
    /// See [`generate`](Self::generate).
    pub async fn ask(&self, prompt: &str) -> Result<GenerateResponse, McpError> {
        self.generate(&GenerateRequest::from_prompt(prompt)).await
    }

    async fn send_generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, McpError> {
        let url = self.url("api/v1/generate")?;
        tracing::debug!(%url, messages = request.messages.len(), "Sending generate request");

        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.unreachable(&e))?;
        read_json(response).await
    }

    fn url(&self, path: &str) -> Result<Url, McpError> {
        self.base_url
            .join(path)
            .map_err(|e| McpError::InvalidRequest {
                message: format!("invalid server path '{path}': {e}"),
            })
    }

    fn unreachable(&self, error: &reqwest::Error) -> McpError {
        tracing::debug!(error = %error, "MCP server request failed");
        let reason = if error.is_timeout() {
            "timed out"
        } else {
            "connection refused"
        };
        McpError::Connection {
            message: format!("the MCP server at {} ({reason})", self.base_url),
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, McpError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(|e| McpError::Connection {
        message: format!("the MCP server (reply interrupted: {e})"),
    })?;

    if status.is_success() {
        return serde_json::from_slice(&bytes).map_err(|e| McpError::Rpc {
            message: format!("unexpected reply from MCP server: {e}"),
        });
    }

    match serde_json::from_slice::<ErrorBody>(&bytes) {
        Ok(body) => Err(body.into_error()),
        Err(_) => Err(McpError::Rpc {
            message: format!("MCP server answered HTTP {}", status.as_u16()),
        }),
    }
}
