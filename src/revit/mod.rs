//! HTTP client for the Revit RPC handler.
//!
//! The handler runs inside the Revit process and answers every call with an
//! envelope:
//!
//! ```json
//! { "success": true, "data": { ... } }
//! { "success": false, "error": "Category 'Wals' not found" }
//! ```
//!
//! Connection failures and timeouts are retried under a [`RetryPolicy`];
//! application-level failures are reported immediately.

use std::time::Duration;

use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::McpError;

/// Bounded retry policy for calls to the Revit RPC handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Timeout for one whole attempt (connect, send and read).
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Upper bound on the time one call can take before it fails.
    #[must_use]
    pub fn budget(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        self.request_timeout * attempts + self.delay * (attempts - 1)
    }
}

/// The reply envelope used by every Revit RPC handler endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// A successful envelope carrying `data`.
    #[must_use]
    pub const fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed envelope carrying `error`.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of one attempt.
enum Attempt {
    Done(Result<Value, McpError>),
    Transient(String),
}

/// Client for the Revit RPC handler.
#[derive(Debug, Clone)]
pub struct RevitClient {
    http: reqwest::Client,
    base_url: Url,
    policy: RetryPolicy,
}

impl RevitClient {
    /// Creates a client for a handler on `127.0.0.1:port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(port: u16, policy: RetryPolicy) -> Result<Self, McpError> {
        Self::with_base_url(&format!("http://127.0.0.1:{port}"), policy)
    }

    /// Creates a client for a handler at an arbitrary base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// created.
    pub fn with_base_url(base_url: &str, policy: RetryPolicy) -> Result<Self, McpError> {
        let base_url = Url::parse(base_url).map_err(|e| McpError::InvalidRequest {
            message: format!("invalid Revit handler URL '{base_url}': {e}"),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(McpError::InvalidRequest {
                message: format!("invalid Revit handler URL '{base_url}'"),
            });
        }

        let http = reqwest::Client::builder()
            .connect_timeout(policy.connect_timeout)
            .build()
            .map_err(|e| McpError::Connection {
                message: format!("the local HTTP stack ({e})"),
            })?;

        Ok(Self {
            http,
            base_url,
            policy,
        })
    }

    /// Returns the handler's base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `GET /api/model/info`
    ///
    /// # Errors
    ///
    /// See [`McpError`]; connection failures surface after the retry budget.
    pub async fn model_info(&self) -> Result<Value, McpError> {
        let url = self.endpoint(&["api", "model", "info"]);
        self.call(Method::GET, url, None).await
    }

    /// `GET /api/elements/{category}`
    ///
    /// # Errors
    ///
    /// See [`McpError`].
    pub async fn elements(&self, category: &str) -> Result<Value, McpError> {
        let url = self.endpoint(&["api", "elements", category]);
        self.call(Method::GET, url, None).await
    }

    /// `GET /api/elements/{id}/parameters`
    ///
    /// # Errors
    ///
    /// See [`McpError`].
    pub async fn element_parameters(&self, element_id: i64) -> Result<Value, McpError> {
        let id = element_id.to_string();
        let url = self.endpoint(&["api", "elements", &id, "parameters"]);
        self.call(Method::GET, url, None).await
    }

    /// `POST /api/elements/{id}/parameters` with `{"name", "value"}`.
    ///
    /// The handler expects an open transaction (see
    /// [`start_transaction`](Self::start_transaction)).
    ///
    /// # Errors
    ///
    /// See [`McpError`].
    pub async fn set_element_parameter(
        &self,
        element_id: i64,
        name: &str,
        value: &Value,
    ) -> Result<Value, McpError> {
        let id = element_id.to_string();
        let url = self.endpoint(&["api", "elements", &id, "parameters"]);
        let body = json!({ "name": name, "value": value });
        self.call(Method::POST, url, Some(&body)).await
    }

    /// `POST /api/transaction/start`, returning the transaction id.
    ///
    /// The handler may answer with the id as a bare string or as
    /// `{"transaction_id": ...}`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Rpc`] if the reply carries no transaction id.
    pub async fn start_transaction(&self, name: &str) -> Result<String, McpError> {
        let url = self.endpoint(&["api", "transaction", "start"]);
        let body = json!({ "name": name });
        let data = self.call(Method::POST, url, Some(&body)).await?;

        transaction_id(&data).ok_or_else(|| McpError::Rpc {
            message: "transaction start reply did not include a transaction id".to_string(),
        })
    }

    /// `POST /api/transaction/{id}/commit`
    ///
    /// # Errors
    ///
    /// See [`McpError`].
    pub async fn commit_transaction(&self, transaction_id: &str) -> Result<Value, McpError> {
        let url = self.endpoint(&["api", "transaction", transaction_id, "commit"]);
        self.call(Method::POST, url, None).await
    }

    /// Single quick reachability probe. Never retries.
    pub async fn ping(&self) -> bool {
        let url = self.endpoint(&["api", "model", "info"]);
        let timeout = self.policy.connect_timeout.min(Duration::from_secs(2));
        match self.http.get(url).timeout(timeout).send().await {
            Ok(response) => {
                tracing::trace!(status = %response.status(), "Revit handler answered ping");
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "Revit handler did not answer ping");
                false
            }
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn call(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value, McpError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            tracing::debug!(%method, %url, attempt, "Calling Revit handler");

            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .timeout(self.policy.request_timeout);
            if let Some(body) = body {
                request = request.json(body);
            }

            let outcome = match request.send().await {
                Ok(response) => read_reply(response).await,
                Err(e) => Attempt::Transient(describe_transport_error(&e)),
            };

            match outcome {
                Attempt::Done(result) => return result,
                Attempt::Transient(failure) => {
                    tracing::warn!(
                        %url,
                        attempt,
                        max_attempts = attempts,
                        failure = %failure,
                        "Revit handler call failed"
                    );
                    last_failure = failure;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        Err(McpError::Connection {
            message: format!(
                "the Revit RPC handler at {} after {attempts} attempts ({last_failure})",
                self.base_url
            ),
        })
    }
}

async fn read_reply(response: reqwest::Response) -> Attempt {
    let status = response.status();
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return Attempt::Transient(describe_transport_error(&e)),
    };

    match serde_json::from_slice::<Envelope>(&bytes) {
        Ok(envelope) if envelope.success => {
            Attempt::Done(Ok(envelope.data.unwrap_or(Value::Null)))
        }
        Ok(envelope) => {
            let message = envelope
                .error
                .unwrap_or_else(|| "unspecified error".to_string());
            if status.is_server_error() {
                Attempt::Done(Err(McpError::RevitApi { message }))
            } else {
                Attempt::Done(Err(McpError::Rpc { message }))
            }
        }
        Err(_) if is_gateway_status(status) => {
            Attempt::Transient(format!("handler unavailable (HTTP {})", status.as_u16()))
        }
        Err(e) => Attempt::Done(Err(McpError::Rpc {
            message: format!("unexpected reply (HTTP {}): {e}", status.as_u16()),
        })),
    }
}

const fn is_gateway_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

fn describe_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "timed out".to_string()
    } else if error.is_connect() {
        "connection refused".to_string()
    } else {
        error.to_string()
    }
}

fn transaction_id(data: &Value) -> Option<String> {
    match data {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map
            .get("transaction_id")
            .or_else(|| map.get("id"))
            .and_then(transaction_id),
        _ => None,
    }
}
