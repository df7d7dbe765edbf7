//! The connector: launches and supervises MCP server processes and talks to
//! them on behalf of a chat front end.
//!
//! - [`ProcessManager`] starts, stops and probes servers, one per port.
//! - [`Registry`] persists the manager's handles between invocations.
//! - [`McpClient`] sends chat requests to a running server.
//! - [`ConnectorEvents`] receives status changes and query results.

mod client;
mod process;
mod registry;

pub use client::McpClient;
pub use process::{
    ExecutableLauncher, HealthState, Launcher, ProbeSettings, ProcessManager, SpawnedServer,
    StartOutcome, StopOutcome,
};
pub use registry::{HandleRecord, Registry};

use crate::error::McpError;
use crate::mcp::protocol::GenerateResponse;

/// Callbacks fired by the connector.
///
/// Both methods default to doing nothing, so implementors override only what
/// they need.
pub trait ConnectorEvents: Send + Sync {
    /// A server's health state changed.
    fn on_status_changed(&self, _port: u16, _state: HealthState) {}

    /// A chat query finished.
    fn on_query_result(&self, _result: Result<&GenerateResponse, &McpError>) {}
}

/// Ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl ConnectorEvents for NoopEvents {}
