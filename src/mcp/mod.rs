//! The MCP server: HTTP API, request routing and the MCP JSON-RPC surface.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          MCP Server                          │
//! │                                                              │
//! │  POST /api/v1/generate                                       │
//! │        │                                                     │
//! │        ▼                                                     │
//! │  ┌───────────┐   ┌───────────┐   ┌──────────────────────┐    │
//! │  │  intent   │──▶│  router   │──▶│ RevitClient (retry)  │──▶ Revit RPC handler
//! │  └───────────┘   └─────┬─────┘   └──────────────────────┘    │
//! │                        │                                     │
//! │                        ▼                                     │
//! │                 ┌─────────────┐                              │
//! │                 │ LanguageModel│────────────────────────────▶ LLM API
//! │                 └─────────────┘                              │
//! │                                                              │
//! │  POST /mcp ──▶ jsonrpc ──▶ tools ──▶ RevitClient             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! The JSON-RPC surface targets MCP protocol version 2024-11-05.

pub mod intent;
pub mod jsonrpc;
pub mod protocol;
pub mod router;
pub mod server;
pub mod tools;

pub use protocol::{ChatMessage, GenerateRequest, GenerateResponse, Role};
pub use router::RequestRouter;
pub use server::{AppConfig, McpServer};
