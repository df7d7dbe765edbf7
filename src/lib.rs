//! revit-mcp: MCP server and process connector for AI-assisted Revit model queries
//!
//! Two cooperating local services let a chat client ask questions about (and
//! make changes to) the Autodesk Revit model that is currently open:
//!
//! - **MCP server** (`revit-mcp` binary): answers chat requests over HTTP,
//!   enriching them with data from the Revit RPC handler before calling the
//!   LLM, and exposes the handler's operations as MCP tools.
//! - **Connector** (`revit-mcp-ctl` binary): starts, stops and probes the
//!   server process and manages the user's settings.
//!
//! The Revit RPC handler itself runs inside Revit and is reached over HTTP;
//! it is not part of this crate.
//!
//! # Modules
//!
//! - [`config`]: Settings store and default file locations
//! - [`connector`]: Process manager, server registry and MCP client
//! - [`error`]: Error types
//! - [`llm`]: Language model backends
//! - [`mcp`]: HTTP server, request routing and MCP JSON-RPC
//! - [`revit`]: Revit RPC handler client

pub mod config;
pub mod connector;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod revit;
