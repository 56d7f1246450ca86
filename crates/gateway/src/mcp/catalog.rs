//! Exposes API endpoints as MCP tools.
//!
//! The catalog is built once at startup.  Every endpoint becomes one tool
//! whose name is derived from the endpoint id and whose input schema is the
//! endpoint's request schema, which must be an object schema.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use futures_util::FutureExt;
use regex::Regex;
use serde_json::{json, Value};

use mr_domain::tool::{ApiError, ClientFactory, CoreClient, Endpoint, ToolCallResult, ToolContent, ToolDescriptor};

/// Longest tool name MCP clients are required to accept.
const MAX_TOOL_NAME_LEN: usize = 64;

/// Derive a tool name from an endpoint id.
///
/// camelCase and acronym boundaries become underscores, the result is
/// lowercased, anything outside `[a-z0-9_-]` becomes `_`, and the name is
/// cut to 64 characters.
pub fn tool_name(endpoint_id: &str) -> mr_domain::Result<String> {
    if endpoint_id.is_empty() {
        return Err(mr_domain::Error::Catalog(
            "Tool name creation failed. Endpoint ID must be a non-empty string.".into(),
        ));
    }

    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    static ACRONYM: OnceLock<Regex> = OnceLock::new();
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let boundary = BOUNDARY.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").expect("static regex"));
    let acronym = ACRONYM.get_or_init(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("static regex"));
    let invalid = INVALID.get_or_init(|| Regex::new(r"[^a-z0-9_-]").expect("static regex"));

    let snake = boundary.replace_all(endpoint_id, "${1}_${2}");
    let snake = acronym.replace_all(&snake, "${1}_${2}").to_lowercase();
    let cleaned = invalid.replace_all(&snake, "_");

    Ok(cleaned.chars().take(MAX_TOOL_NAME_LEN).collect())
}

fn is_object_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("object")
}

struct Tool {
    descriptor: ToolDescriptor,
    endpoint: Arc<dyn Endpoint>,
}

pub struct ToolCatalog {
    /// Advertised order (endpoint declaration order).
    tools: Vec<Tool>,
    by_name: HashMap<String, usize>,
    clients: Arc<dyn ClientFactory>,
}

impl ToolCatalog {
    /// Build the catalog.  `toolsets` selects endpoint groups; empty means
    /// every group.
    pub fn new(
        endpoints: Vec<Arc<dyn Endpoint>>,
        toolsets: &[String],
        clients: Arc<dyn ClientFactory>,
    ) -> mr_domain::Result<Self> {
        let mut tools = Vec::new();
        let mut by_name = HashMap::new();

        for endpoint in endpoints {
            if !toolsets.is_empty() && !toolsets.iter().any(|t| t == endpoint.group()) {
                continue;
            }

            let schema = endpoint.request_schema();
            if !is_object_schema(&schema) {
                return Err(mr_domain::Error::Catalog(format!(
                    "endpoint '{}': request schema must be an object type",
                    endpoint.id()
                )));
            }

            let name = tool_name(endpoint.id())?;
            if by_name.contains_key(&name) {
                return Err(mr_domain::Error::Catalog(format!(
                    "endpoint '{}': tool name '{name}' is already taken",
                    endpoint.id()
                )));
            }

            by_name.insert(name.clone(), tools.len());
            tools.push(Tool {
                descriptor: ToolDescriptor {
                    name,
                    description: endpoint.description().map(str::to_owned),
                    input_schema: schema,
                },
                endpoint,
            });
        }

        Ok(Self {
            tools,
            by_name,
            clients,
        })
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    /// Invoke a tool.  Returns `None` if no tool has that name; every
    /// other outcome, including a panicking endpoint, is a
    /// [`ToolCallResult`].
    pub async fn call(&self, name: &str, args: Value) -> Option<ToolCallResult> {
        let tool = &self.tools[*self.by_name.get(name)?];

        let mapped = match tool.endpoint.validate(args) {
            Ok(mapped) => mapped,
            Err(errors) => {
                tracing::debug!(tool = %name, errors = errors.len(), "tool arguments rejected");
                return Some(ToolCallResult {
                    content: errors.iter().map(|e| ToolContent::text(stringify(e))).collect(),
                    is_error: true,
                });
            }
        };

        let client: CoreClient = self.clients.create();
        let call_result = AssertUnwindSafe(tool.endpoint.call(&client, mapped))
            .catch_unwind()
            .await;

        Some(match call_result {
            Ok(Ok(response)) => ToolCallResult::success(stringify(&json!({
                "statusCode": response.status_code,
                "responseHeaders": response.headers,
                "result": response.body,
            }))),
            Ok(Err(err)) => error_result(name, &err),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(tool = %name, panic = %message, "tool endpoint panicked");
                ToolCallResult::error(format!("Tool Error: {message}"))
            }
        })
    }
}

fn error_result(tool: &str, err: &ApiError) -> ToolCallResult {
    match err {
        ApiError::Response {
            status_code,
            headers,
            body,
        } => {
            tracing::warn!(tool = %tool, status_code, "API error");
            ToolCallResult::error(stringify(&json!({
                "statusCode": status_code,
                "headers": headers,
                "body": body,
            })))
        }
        ApiError::Message(message) => {
            tracing::warn!(tool = %tool, error = %message, "unexpected tool error");
            ToolCallResult::error(format!("Tool Error: {message}"))
        }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool handler panicked".into()
    }
}
