//! Contracts for the API surface exposed as MCP tools.
//!
//! The gateway treats endpoints as opaque: it asks them for a JSON schema,
//! hands them arguments to validate and map, and invokes them with a client
//! produced by a [`ClientFactory`].

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque API client passed through to endpoint invocations.
pub type CoreClient = Arc<dyn Any + Send + Sync>;

/// Produces the client object handed to every endpoint call.
pub trait ClientFactory: Send + Sync {
    fn create(&self) -> CoreClient;
}

impl<F> ClientFactory for F
where
    F: Fn() -> CoreClient + Send + Sync,
{
    fn create(&self) -> CoreClient {
        self()
    }
}

/// A successful API response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// Failure raised by an endpoint invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The API answered, but with an error status.
    #[error("API responded with status {status_code}")]
    Response {
        status_code: u16,
        headers: BTreeMap<String, String>,
        body: Value,
    },
    /// The call failed before a response was available.
    #[error("{0}")]
    Message(String),
}

/// One API endpoint.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Endpoint id, e.g. `getAccountBalances`.
    fn id(&self) -> &str;

    /// Group used for toolset filtering.
    fn group(&self) -> &str;

    fn description(&self) -> Option<&str>;

    /// JSON schema describing the request arguments.
    fn request_schema(&self) -> Value;

    /// Validate raw tool arguments and map them into the value `call`
    /// expects. On failure every problem is returned, not just the first.
    fn validate(&self, args: Value) -> Result<Value, Vec<Value>>;

    async fn call(&self, client: &CoreClient, mapped: Value) -> Result<ApiResponse, ApiError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP tool shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

/// A single content block in a `tools/call` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

/// The result payload of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: true,
        }
    }
}
