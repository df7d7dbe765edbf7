//! The MCP HTTP server.
//!
//! # Routes
//!
//! ```text
//! GET  /api/v1/resources   capability listing
//! POST /api/v1/generate    chat completion with optional Revit context
//! POST /mcp                MCP JSON-RPC 2.0 (tools and resources)
//! GET  /ping               liveness
//! GET  /health             liveness plus Revit handler reachability
//! GET  /status             pid, ports, model, uptime
//! GET  /shutdown           graceful stop
//! ```
//!
//! Every failure is answered with `{"success": false, "kind", "error"}` and a
//! status code derived from the error kind.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use super::jsonrpc::{
    parse_message, ErrorCode, IncomingMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    RequestId, MCP_PROTOCOL_VERSION, SERVER_NAME,
};
use super::protocol::{
    Ack, CapabilityDescriptor, ErrorBody, GenerateRequest, GenerateResponse, HealthReport,
    ServerStatus,
};
use super::router::RequestRouter;
use super::tools;
use crate::config::Settings;
use crate::error::McpError;
use crate::llm::{AnthropicClient, LanguageModel};
use crate::revit::{RetryPolicy, RevitClient};

/// Everything the server needs to run, resolved from CLI flags and settings.
#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Port to listen on.
    pub mcp_port: u16,
    /// Port of the Revit RPC handler.
    pub revit_port: u16,
    /// Default model.
    pub model: String,
    /// LLM API key.
    pub api_key: String,
    /// LLM base URL override.
    pub llm_base_url: Option<String>,
    /// Retry policy for Revit calls.
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("mcp_port", &self.mcp_port)
            .field("revit_port", &self.revit_port)
            .field("model", &self.model)
            .field("api_key", &crate::config::mask_secret(&self.api_key))
            .field("llm_base_url", &self.llm_base_url)
            .field("retry", &self.retry)
            .finish()
    }
}

impl AppConfig {
    /// Takes ports, model and key from `settings`.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            mcp_port: settings.mcp_port,
            revit_port: settings.revit_port,
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            llm_base_url: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
struct ServerState {
    router: RequestRouter,
    config: Arc<AppConfig>,
    shutdown: Arc<Notify>,
    started: Instant,
}

/// The MCP server.
pub struct McpServer {
    state: ServerState,
}

impl McpServer {
    /// Creates a server using the Anthropic API.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be created.
    pub fn new(config: AppConfig) -> Result<Self, McpError> {
        let llm = AnthropicClient::new(config.api_key.clone(), config.llm_base_url.as_deref())?;
        Self::with_model(config, Arc::new(llm))
    }

    /// Creates a server with an explicit model backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the Revit HTTP client cannot be created.
    pub fn with_model(config: AppConfig, llm: Arc<dyn LanguageModel>) -> Result<Self, McpError> {
        let revit = RevitClient::new(config.revit_port, config.retry)?;
        let router = RequestRouter::new(revit, llm, config.model.clone());

        Ok(Self {
            state: ServerState {
                router,
                config: Arc::new(config),
                shutdown: Arc::new(Notify::new()),
                started: Instant::now(),
            },
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.state.config
    }

    /// A handle that stops the server when notified.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.state.shutdown)
    }

    /// Builds the axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/v1/resources", get(resources_handler))
            .route("/api/v1/generate", post(generate_handler))
            .route("/mcp", post(mcp_handler))
            .route("/ping", get(ping_handler))
            .route("/health", get(health_handler))
            .route("/status", get(status_handler))
            .route("/shutdown", get(shutdown_handler))
            .with_state(self.state.clone())
    }

    /// Binds `127.0.0.1:mcp_port` and serves until shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound or the server fails.
    pub async fn run(self) -> std::io::Result<()> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.state.config.mcp_port));
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until shut down.
    ///
    /// Stops on `GET /shutdown`, on the [`shutdown_handle`](Self::shutdown_handle),
    /// or on SIGINT/SIGTERM (Ctrl+C on Windows).
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let local = listener.local_addr()?;
        tracing::info!(
            addr = %local,
            revit_port = self.state.config.revit_port,
            model = %self.state.config.model,
            "MCP server listening"
        );

        let app = self.router();
        let shutdown = self.shutdown_handle();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown))
            .await?;

        tracing::info!("MCP server stopped");
        Ok(())
    }
}

async fn shutdown_signal(shutdown: Arc<Notify>) {
    tokio::select! {
        () = shutdown.notified() => {
            tracing::info!("Shutdown requested, initiating graceful shutdown");
        }
        () = os_signal() => {}
    }
}

#[cfg(unix)]
async fn os_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm)) =
        (signal(SignalKind::interrupt()), signal(SignalKind::terminate()))
    else {
        tracing::warn!("Could not install signal handlers; use /shutdown to stop the server");
        std::future::pending::<()>().await;
        return;
    };

    tokio::select! {
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

#[cfg(windows)]
async fn os_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    } else {
        tracing::warn!("Could not install Ctrl+C handler; use /shutdown to stop the server");
        std::future::pending::<()>().await;
    }
}

#[cfg(not(any(unix, windows)))]
async fn os_signal() {
    std::future::pending::<()>().await;
}

// ============================================================================
// Error responses
// ============================================================================

/// Wraps [`McpError`] so handlers can return it directly.
struct ApiError(McpError);

impl From<McpError> for ApiError {
    fn from(error: McpError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        tracing::warn!(kind = self.0.kind(), error = %self.0, "Request failed");
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

// ============================================================================
// HTTP API handlers
// ============================================================================

async fn resources_handler() -> Json<Vec<CapabilityDescriptor>> {
    Json(tools::capabilities())
}

async fn generate_handler(
    State(state): State<ServerState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| McpError::InvalidRequest {
        message: rejection.body_text(),
    })?;

    let response = state.router.generate(request).await?;
    Ok(Json(response))
}

async fn ping_handler() -> Json<Ack> {
    Json(Ack::new("pong"))
}

async fn health_handler(State(state): State<ServerState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok".to_string(),
        revit_connected: state.router.revit().ping().await,
    })
}

async fn status_handler(State(state): State<ServerState>) -> Json<ServerStatus> {
    Json(ServerStatus {
        service: SERVER_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pid: std::process::id(),
        mcp_port: state.config.mcp_port,
        revit_port: state.config.revit_port,
        model: state.config.model.clone(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

async fn shutdown_handler(State(state): State<ServerState>) -> Json<Ack> {
    tracing::info!("Shutdown requested over HTTP");
    state.shutdown.notify_one();
    Json(Ack::new("shutting down"))
}

// ============================================================================
// MCP JSON-RPC
// ============================================================================

async fn mcp_handler(State(state): State<ServerState>, body: Bytes) -> Response {
    let request = match parse_message(&body) {
        Ok(IncomingMessage::Request(request)) => request,
        Ok(IncomingMessage::Notification(notification)) => {
            tracing::debug!(method = %notification.method, "Received notification");
            return StatusCode::ACCEPTED.into_response();
        }
        Err(error) => return Json(error).into_response(),
    };

    tracing::debug!(method = %request.method, id = %request.id, "Received request");

    match dispatch(&state, &request).await {
        Ok(response) => Json(response).into_response(),
        Err(error) => Json(error).into_response(),
    }
}

async fn dispatch(
    state: &ServerState,
    req: &JsonRpcRequest,
) -> Result<JsonRpcResponse, JsonRpcError> {
    let result = match req.method.as_str() {
        "initialize" => initialize_result(),
        "ping" => json!({}),
        "tools/list" => json!({ "tools": tools::tool_definitions() }),
        "tools/call" => {
            let params: ToolCallParams = req.params_as()?;
            let result = tools::call_tool(state.router.revit(), &params.name, &params.arguments).await;
            to_result(&req.id, &result)?
        }
        "resources/list" => json!({ "resources": tools::resource_definitions() }),
        "resources/templates/list" => {
            json!({ "resourceTemplates": tools::resource_templates() })
        }
        "resources/read" => {
            let params: ReadResourceParams = req.params_as()?;
            let data = tools::read_resource(state.router.revit(), &params.uri)
                .await
                .map_err(|e| resource_error(req.id.clone(), &e))?;
            json!({
                "contents": [{
                    "uri": params.uri,
                    "mimeType": "application/json",
                    "text": data.to_string(),
                }]
            })
        }
        _ => return Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
    };

    Ok(JsonRpcResponse::success(req.id.clone(), result))
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": {},
            "resources": {},
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

fn to_result<T: serde::Serialize>(id: &RequestId, value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialise result");
        JsonRpcError::internal_error(id.clone(), "failed to serialise result")
    })
}

fn resource_error(id: RequestId, error: &McpError) -> JsonRpcError {
    let code = match error {
        McpError::InvalidRequest { .. } => ErrorCode::InvalidParams,
        _ => ErrorCode::InternalError,
    };
    let mut rpc_error = JsonRpcError::new(Some(id), code, format!("{}: {error}", error.kind()));
    rpc_error.error.data = Some(json!({ "kind": error.kind() }));
    rpc_error
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ReadResourceParams {
    uri: String,
}
