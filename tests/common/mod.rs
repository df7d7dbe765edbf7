//! Shared fixtures: in-process stand-ins for the Revit RPC handler and the
//! LLM API, plus helpers to run the MCP server against them.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use revit_mcp::mcp::{AppConfig, McpServer};
use revit_mcp::revit::{Envelope, RetryPolicy};

/// API key accepted by [`llm_stub`].
pub const TEST_API_KEY: &str = "sk-ant-test-0001";

/// A stub server running on a background task.
pub struct StubServer {
    pub addr: SocketAddr,
    pub shutdown: Arc<Notify>,
    pub task: JoinHandle<()>,
}

impl StubServer {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stops the stub and waits until its port is released.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

/// Serves `app` on an ephemeral loopback port.
pub async fn serve(app: Router) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub listener");
    serve_listener(listener, app)
}

/// Serves `app` on a specific loopback port.
pub async fn serve_on(port: u16, app: Router) -> StubServer {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("Failed to bind stub listener");
    serve_listener(listener, app)
}

fn serve_listener(listener: TcpListener, app: Router) -> StubServer {
    let addr = listener.local_addr().expect("Stub listener has no address");
    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.notified().await })
            .await;
    });
    StubServer {
        addr,
        shutdown,
        task,
    }
}

/// A loopback port with nothing listening on it.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind probe port");
    listener
        .local_addr()
        .expect("Probe listener has no address")
        .port()
}

// ============================================================================
// Revit RPC handler stand-in
// ============================================================================

fn ok(data: Value) -> (StatusCode, Json<Envelope>) {
    (StatusCode::OK, Json(Envelope::ok(data)))
}

fn fail(status: StatusCode, error: &str) -> (StatusCode, Json<Envelope>) {
    (status, Json(Envelope::failure(error)))
}

/// A Revit handler with a model containing `walls` walls and two
/// structural columns.
///
/// - category `Faulty` fails inside the Revit API (HTTP 500)
/// - any other unknown category is rejected (HTTP 404)
pub fn revit_stub(walls: usize) -> Router {
    Router::new()
        .route(
            "/api/model/info",
            get(|| async {
                ok(json!({
                    "title": "Sample Project",
                    "path": "C:/Projects/sample.rvt",
                    "units": "millimetres",
                }))
            }),
        )
        .route(
            "/api/elements/{key}",
            get(move |Path(key): Path<String>| async move {
                match key.as_str() {
                    "Walls" => {
                        let items: Vec<Value> = (0..walls)
                            .map(|i| json!({ "id": 1000 + i, "name": format!("Basic Wall {i}") }))
                            .collect();
                        ok(Value::Array(items))
                    }
                    "Structural Columns" => ok(json!([
                        { "id": 2000, "name": "W10x49" },
                        { "id": 2001, "name": "W10x49" },
                    ])),
                    "Faulty" => fail(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Autodesk.Revit.Exceptions.InvalidOperationException",
                    ),
                    other => fail(
                        StatusCode::NOT_FOUND,
                        &format!("Category '{other}' not found"),
                    ),
                }
            }),
        )
        .route(
            "/api/elements/{key}/parameters",
            get(|Path(key): Path<String>| async move {
                ok(json!({ "element_id": key, "Mark": "W-1", "Length": 4200 }))
            })
            .post(|Path(key): Path<String>, Json(body): Json<Value>| async move {
                ok(json!({ "element_id": key, "updated": body["name"] }))
            }),
        )
        .route(
            "/api/transaction/start",
            post(|| async { ok(json!({ "transaction_id": "tx-42" })) }),
        )
        .route(
            "/api/transaction/{key}/commit",
            post(|Path(key): Path<String>| async move { ok(json!({ "committed": key })) }),
        )
}

/// A Revit handler that takes `delay` to answer anything.
pub fn slow_revit_stub(delay: Duration) -> Router {
    Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        ok(json!({}))
    })
}

// ============================================================================
// LLM API stand-in
// ============================================================================

/// An Anthropic-compatible endpoint that echoes its input.
///
/// Replies with the system prompt and the last message, separated by a
/// `---` line. Rejects any key other than [`TEST_API_KEY`] with HTTP 401.
pub fn llm_stub() -> Router {
    Router::new().route(
        "/v1/messages",
        post(|headers: HeaderMap, Json(body): Json<Value>| async move {
            let key = headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if key != TEST_API_KEY {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({
                        "type": "error",
                        "error": { "type": "authentication_error", "message": "invalid x-api-key" }
                    })),
                );
            }

            let system = body["system"].as_str().unwrap_or_default();
            let last = body["messages"]
                .as_array()
                .and_then(|m| m.last())
                .and_then(|m| m["content"].as_str())
                .unwrap_or_default();
            (
                StatusCode::OK,
                Json(json!({
                    "id": "msg_stub",
                    "type": "message",
                    "role": "assistant",
                    "content": [{ "type": "text", "text": format!("{system}\n---\n{last}") }],
                })),
            )
        }),
    )
}

// ============================================================================
// MCP server under test
// ============================================================================

/// Retry policy that gives up quickly.
pub fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        delay: Duration::from_millis(50),
        connect_timeout: Duration::from_millis(300),
        request_timeout: Duration::from_millis(300),
    }
}

/// Configuration pointing at the given stubs.
pub fn test_config(revit_port: u16, llm_url: &str) -> AppConfig {
    AppConfig {
        mcp_port: 0,
        revit_port,
        model: "claude-3-7-sonnet-latest".to_string(),
        api_key: TEST_API_KEY.to_string(),
        llm_base_url: Some(llm_url.to_string()),
        retry: quick_retry(),
    }
}

/// A running MCP server.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub shutdown: Arc<Notify>,
    pub task: JoinHandle<std::io::Result<()>>,
}

impl RunningServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{path}", self.addr)
    }
}

/// Starts an MCP server with `config` on an ephemeral port.
pub async fn start_server(mut config: AppConfig) -> RunningServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind server listener");
    let addr = listener.local_addr().expect("Server listener has no address");
    config.mcp_port = addr.port();

    let server = McpServer::new(config).expect("Failed to create server");
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.serve(listener));

    RunningServer {
        addr,
        shutdown,
        task,
    }
}
