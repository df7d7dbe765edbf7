//! End-to-end tests of the HTTP API: connector client → MCP server →
//! Revit handler stub and LLM stub.

mod common;

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use revit_mcp::connector::McpClient;
use revit_mcp::error::McpError;
use revit_mcp::mcp::protocol::{CapabilityKind, ErrorBody, ServerStatus};
use revit_mcp::mcp::{ChatMessage, GenerateRequest};

use common::{free_port, llm_stub, revit_stub, serve, slow_revit_stub, start_server, test_config};

#[tokio::test]
async fn list_walls_includes_revit_context() {
    let revit = serve(revit_stub(3)).await;
    let llm = serve(llm_stub()).await;
    let server = start_server(test_config(revit.port(), &llm.url())).await;

    let client = assert_ok!(McpClient::with_base_url(&server.url("")));
    let response = assert_ok!(client.ask("list all walls").await);

    assert!(response.id.starts_with("msg-"));
    assert_eq!(response.model, "claude-3-7-sonnet-latest");
    assert!(response.created > 0);
    assert!(
        response.content.contains("Found 3 elements in category Walls"),
        "missing context in: {}",
        response.content
    );
    assert!(response.content.ends_with("list all walls"));
}

#[tokio::test]
async fn request_model_overrides_default() {
    let revit = serve(revit_stub(1)).await;
    let llm = serve(llm_stub()).await;
    let server = start_server(test_config(revit.port(), &llm.url())).await;

    let client = McpClient::with_base_url(&server.url("")).unwrap();
    let request = GenerateRequest {
        messages: vec![
            ChatMessage::user("hello"),
            ChatMessage::assistant("Hi, how can I help?"),
            ChatMessage::user("thanks, nothing"),
        ],
        model: Some("claude-opus-test".to_string()),
        stream: false,
    };
    let response = client.generate(&request).await.unwrap();

    assert_eq!(response.model, "claude-opus-test");
    // No Revit keywords, so no context block.
    assert!(!response.content.contains("Revit model context"));
    assert!(response.content.ends_with("thanks, nothing"));
}

#[tokio::test]
async fn companion_down_is_connection_error() {
    let llm = serve(llm_stub()).await;
    let server = start_server(test_config(free_port(), &llm.url())).await;

    let http = reqwest::Client::new();
    let response = http
        .post(server.url("api/v1/generate"))
        .json(&GenerateRequest::from_prompt("how many doors are there?"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 502);

    let body: ErrorBody = response.json().await.unwrap();
    assert!(!body.success);
    assert_eq!(body.kind, "ConnectionError");
    assert!(body.error.starts_with("ConnectionError: "));
    assert!(body.error.contains("after 2 attempts"));
}

#[tokio::test]
async fn client_rebuilds_connection_error() {
    let llm = serve(llm_stub()).await;
    let server = start_server(test_config(free_port(), &llm.url())).await;

    let client = McpClient::with_base_url(&server.url("")).unwrap();
    let err = assert_err!(client.ask("show me the windows").await);
    assert!(err.is_connection(), "unexpected error: {err:?}");
    assert!(err.to_string().contains("Revit RPC handler"));
}

#[tokio::test]
async fn slow_companion_fails_within_retry_budget() {
    let revit = serve(slow_revit_stub(Duration::from_secs(10))).await;
    let llm = serve(llm_stub()).await;
    let config = test_config(revit.port(), &llm.url());
    let budget = config.retry.budget();
    let server = start_server(config).await;

    let client = McpClient::with_base_url(&server.url("")).unwrap();
    let started = Instant::now();
    let err = client.ask("list the floors").await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_connection(), "unexpected error: {err:?}");
    assert!(err.to_string().contains("timed out"));
    assert!(
        elapsed < budget + Duration::from_secs(1),
        "took {elapsed:?}, budget {budget:?}"
    );
}

#[tokio::test]
async fn unknown_category_is_rpc_error() {
    let revit = serve(revit_stub(3)).await;
    let llm = serve(llm_stub()).await;
    let server = start_server(test_config(revit.port(), &llm.url())).await;

    let client = McpClient::with_base_url(&server.url("")).unwrap();
    let err = client.ask("how many stairs?").await.unwrap_err();
    assert!(matches!(err, McpError::Rpc { .. }), "unexpected error: {err:?}");
    assert!(err.to_string().contains("Category 'Stairs' not found"));
}

#[tokio::test]
async fn rejected_api_key_is_llm_error() {
    let revit = serve(revit_stub(3)).await;
    let llm = serve(llm_stub()).await;
    let mut config = test_config(revit.port(), &llm.url());
    config.api_key = "sk-ant-wrong".to_string();
    let server = start_server(config).await;

    let http = reqwest::Client::new();
    let response = http
        .post(server.url("api/v1/generate"))
        .json(&GenerateRequest::from_prompt("hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 502);
    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.kind, "LLMAPIError");
    assert!(body.error.contains("API key was rejected"));
}

#[tokio::test]
async fn malformed_request_is_rejected() {
    let revit = serve(revit_stub(0)).await;
    let llm = serve(llm_stub()).await;
    let server = start_server(test_config(revit.port(), &llm.url())).await;
    let http = reqwest::Client::new();

    let response = http
        .post(server.url("api/v1/generate"))
        .json(&json!({ "messages": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.kind, "InvalidRequest");

    let response = http
        .post(server.url("api/v1/generate"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn resources_list_tools_and_resources() {
    let llm = serve(llm_stub()).await;
    let server = start_server(test_config(free_port(), &llm.url())).await;

    let client = McpClient::with_base_url(&server.url("")).unwrap();
    let resources = client.resources().await.unwrap();

    assert!(resources
        .iter()
        .any(|r| r.name == "find_elements" && r.kind == CapabilityKind::Tool));
    assert!(resources
        .iter()
        .any(|r| r.name == "revit://model/info" && r.kind == CapabilityKind::Resource));
}

#[tokio::test]
async fn health_reports_companion_reachability() {
    let revit = serve(revit_stub(0)).await;
    let llm = serve(llm_stub()).await;
    let up = start_server(test_config(revit.port(), &llm.url())).await;
    let down = start_server(test_config(free_port(), &llm.url())).await;
    let http = reqwest::Client::new();

    let health: Value = http.get(up.url("health")).send().await.unwrap().json().await.unwrap();
    assert_eq!(health, json!({ "status": "ok", "revit_connected": true }));

    let health: Value = http.get(down.url("health")).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["revit_connected"], false);
}

#[tokio::test]
async fn status_identifies_the_server() {
    let llm = serve(llm_stub()).await;
    let revit_port = free_port();
    let server = start_server(test_config(revit_port, &llm.url())).await;

    let status: ServerStatus = reqwest::get(server.url("status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.service, "revit-mcp");
    assert_eq!(status.pid, std::process::id());
    assert_eq!(status.mcp_port, server.addr.port());
    assert_eq!(status.revit_port, revit_port);
}

#[tokio::test]
async fn shutdown_endpoint_stops_the_server() {
    let llm = serve(llm_stub()).await;
    let server = start_server(test_config(free_port(), &llm.url())).await;

    let ack: Value = reqwest::get(server.url("shutdown"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ack["success"], true);

    let result = tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .expect("server did not stop");
    assert!(result.unwrap().is_ok());
}
