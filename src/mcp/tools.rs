//! MCP tools and resources backed by the Revit RPC handler.
//!
//! # Tools
//!
//! | Tool                     | Handler call                              |
//! |--------------------------|-------------------------------------------|
//! | `get_model_info`         | `GET /api/model/info`                     |
//! | `find_elements`          | `GET /api/elements/{category}`            |
//! | `get_element_parameters` | `GET /api/elements/{id}/parameters`       |
//! | `set_element_parameter`  | `POST /api/elements/{id}/parameters`      |
//! | `start_transaction`      | `POST /api/transaction/start`             |
//! | `commit_transaction`     | `POST /api/transaction/{id}/commit`       |
//!
//! # Resources
//!
//! - `revit://model/info`
//! - `revit://elements/{category}` (template)
//!
//! Tool failures never become JSON-RPC errors: they come back as a tool
//! result with `isError: true` so the model can see what went wrong.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::protocol::{CapabilityDescriptor, CapabilityKind};
use crate::error::McpError;
use crate::revit::RevitClient;

/// URI of the model information resource.
pub const MODEL_INFO_URI: &str = "revit://model/info";

/// Prefix of the per-category element resources.
pub const ELEMENTS_URI_PREFIX: &str = "revit://elements/";

/// A tool definition for `tools/list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// JSON Schema of the arguments.
    pub input_schema: Value,
}

/// A concrete resource for `resources/list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    /// Resource URI.
    pub uri: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Content type of `resources/read`.
    pub mime_type: &'static str,
}

/// A parameterised resource for `resources/templates/list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    /// RFC 6570 URI template.
    pub uri_template: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Content type of `resources/read`.
    pub mime_type: &'static str,
}

/// Content item in a tool call result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text.
        text: String,
    },
}

/// Result of `tools/call`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the call failed.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // skip_serializing_if passes &T
const fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolCallResult {
    /// A successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// A successful result carrying pretty-printed JSON.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::text(serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()))
    }

    /// A failed result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// The concatenated text of all content items.
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|ToolContent::Text { text }| text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<&McpError> for ToolCallResult {
    fn from(error: &McpError) -> Self {
        Self::error(format!("{}: {error}", error.kind()))
    }
}

/// Returns every tool definition, in listing order.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get_model_info",
            description: "Get information about the open Revit model: title, path, levels and element counts.",
            input_schema: json!({
                "type": "object",
                "properties": {},
            }),
        },
        ToolDefinition {
            name: "find_elements",
            description: "List the elements of one Revit category (for example Walls, Doors, Windows).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "category": {
                        "type": "string",
                        "description": "Revit category name, e.g. \"Walls\""
                    }
                },
                "required": ["category"],
            }),
        },
        ToolDefinition {
            name: "get_element_parameters",
            description: "Get every parameter of one element.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "element_id": {
                        "type": "integer",
                        "description": "Revit element id"
                    }
                },
                "required": ["element_id"],
            }),
        },
        ToolDefinition {
            name: "set_element_parameter",
            description: "Set one parameter of one element. Requires an open transaction (see start_transaction).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "element_id": { "type": "integer", "description": "Revit element id" },
                    "name": { "type": "string", "description": "Parameter name" },
                    "value": { "description": "New value (string, number or boolean)" }
                },
                "required": ["element_id", "name", "value"],
            }),
        },
        ToolDefinition {
            name: "start_transaction",
            description: "Open a Revit transaction. Returns the transaction id to pass to commit_transaction.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Name shown in Revit's undo history"
                    }
                },
            }),
        },
        ToolDefinition {
            name: "commit_transaction",
            description: "Commit an open Revit transaction.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "transaction_id": { "type": "string", "description": "Id returned by start_transaction" }
                },
                "required": ["transaction_id"],
            }),
        },
    ]
}

/// Returns the concrete resources.
#[must_use]
pub fn resource_definitions() -> Vec<ResourceDefinition> {
    vec![ResourceDefinition {
        uri: MODEL_INFO_URI,
        name: "Model information",
        description: "Title, path, levels and element counts of the open Revit model.",
        mime_type: "application/json",
    }]
}

/// Returns the resource templates.
#[must_use]
pub fn resource_templates() -> Vec<ResourceTemplate> {
    vec![ResourceTemplate {
        uri_template: "revit://elements/{category}",
        name: "Elements by category",
        description: "All elements of one Revit category.",
        mime_type: "application/json",
    }]
}

/// Flattens tools, resources and templates into capability descriptors.
#[must_use]
pub fn capabilities() -> Vec<CapabilityDescriptor> {
    let tools = tool_definitions()
        .into_iter()
        .map(|tool| CapabilityDescriptor {
            name: tool.name.to_string(),
            description: tool.description.to_string(),
            kind: CapabilityKind::Tool,
        });
    let resources = resource_definitions()
        .into_iter()
        .map(|r| CapabilityDescriptor {
            name: r.uri.to_string(),
            description: r.description.to_string(),
            kind: CapabilityKind::Resource,
        });
    let templates = resource_templates()
        .into_iter()
        .map(|t| CapabilityDescriptor {
            name: t.uri_template.to_string(),
            description: t.description.to_string(),
            kind: CapabilityKind::Resource,
        });

    tools.chain(resources).chain(templates).collect()
}

#[derive(Debug, Deserialize)]
struct CategoryArgs {
    category: String,
}

#[derive(Debug, Deserialize)]
struct ElementArgs {
    element_id: i64,
}

#[derive(Debug, Deserialize)]
struct SetParameterArgs {
    element_id: i64,
    name: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct StartTransactionArgs {
    #[serde(default = "default_transaction_name")]
    name: String,
}

fn default_transaction_name() -> String {
    "MCP change".to_string()
}

#[derive(Debug, Deserialize)]
struct CommitArgs {
    transaction_id: String,
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T, String> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments).map_err(|e| format!("Invalid arguments for {tool}: {e}"))
}

/// Executes one tool.
pub async fn call_tool(revit: &RevitClient, name: &str, arguments: &Value) -> ToolCallResult {
    tracing::debug!(tool = name, "Calling tool");

    let outcome = match name {
        "get_model_info" => Ok(revit.model_info().await),
        "find_elements" => match parse_args::<CategoryArgs>(name, arguments) {
            Ok(args) if args.category.trim().is_empty() => {
                Err("Invalid arguments for find_elements: category cannot be empty".to_string())
            }
            Ok(args) => Ok(revit.elements(args.category.trim()).await),
            Err(e) => Err(e),
        },
        "get_element_parameters" => match parse_args::<ElementArgs>(name, arguments) {
            Ok(args) => Ok(revit.element_parameters(args.element_id).await),
            Err(e) => Err(e),
        },
        "set_element_parameter" => match parse_args::<SetParameterArgs>(name, arguments) {
            Ok(args) => Ok(revit
                .set_element_parameter(args.element_id, &args.name, &args.value)
                .await),
            Err(e) => Err(e),
        },
        "start_transaction" => match parse_args::<StartTransactionArgs>(name, arguments) {
            Ok(args) => Ok(revit
                .start_transaction(&args.name)
                .await
                .map(|id| json!({ "transaction_id": id }))),
            Err(e) => Err(e),
        },
        "commit_transaction" => match parse_args::<CommitArgs>(name, arguments) {
            Ok(args) => Ok(revit.commit_transaction(&args.transaction_id).await),
            Err(e) => Err(e),
        },
        _ => Err(format!("Unknown tool: {name}")),
    };

    match outcome {
        Ok(Ok(data)) => ToolCallResult::json(&data),
        Ok(Err(error)) => {
            tracing::warn!(tool = name, kind = error.kind(), error = %error, "Tool call failed");
            ToolCallResult::from(&error)
        }
        Err(message) => ToolCallResult::error(message),
    }
}

/// Reads one resource, returning its JSON data.
///
/// # Errors
///
/// Returns [`McpError::InvalidRequest`] for unknown URIs and the Revit
/// client's error otherwise.
pub async fn read_resource(revit: &RevitClient, uri: &str) -> Result<Value, McpError> {
    if uri == MODEL_INFO_URI {
        return revit.model_info().await;
    }

    let category = element_category(uri)?;
    revit.elements(&category).await
}

/// Extracts the percent-decoded `{category}` of an elements resource URI.
fn element_category(uri: &str) -> Result<String, McpError> {
    let unknown = || McpError::InvalidRequest {
        message: format!("unknown resource '{uri}'"),
    };

    let encoded = uri
        .strip_prefix(ELEMENTS_URI_PREFIX)
        .filter(|c| !c.is_empty() && !c.contains('/'))
        .ok_or_else(unknown)?;

    let category = urlencoding::decode(encoded).map_err(|e| McpError::InvalidRequest {
        message: format!("resource '{uri}' is not valid UTF-8 once decoded: {e}"),
    })?;

    if category.trim().is_empty() {
        return Err(unknown());
    }
    Ok(category.into_owned())
}
