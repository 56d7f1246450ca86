//! JSON-RPC 2.0 types for the server side of MCP.
//!
//! Request ids are kept as raw JSON values: clients may use strings or
//! numbers and the response must echo whatever was sent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision this server speaks natively.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-03-26";

/// Revisions accepted during version negotiation.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Generic transport-level rejection (bad session, bad headers).
    pub const SERVER_ERROR: i64 = -32000;
    pub const SESSION_NOT_FOUND: i64 = -32001;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests & notifications
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 request (has an `id`, expects a response).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 notification (no `id`, fire-and-forget).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// An inbound message, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    /// A client's reply to a server-initiated request.  This server sends
    /// none, so replies are accepted and ignored.
    Response(Value),
}

impl Message {
    /// Classify one JSON-RPC object.  On failure, returns the error
    /// response to send back (with the request id when one is readable).
    pub fn from_value(value: Value) -> Result<Self, JsonRpcResponse> {
        let Value::Object(ref obj) = value else {
            return Err(JsonRpcResponse::failure(
                Value::Null,
                JsonRpcError::invalid_request("message must be an object"),
            ));
        };
        let id = obj.get("id").cloned().unwrap_or(Value::Null);

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(JsonRpcResponse::failure(
                id,
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }

        if obj.contains_key("method") {
            let has_id = obj.contains_key("id");
            return if has_id {
                serde_json::from_value(value)
                    .map(Message::Request)
                    .map_err(|e| JsonRpcResponse::failure(id, JsonRpcError::invalid_request(e.to_string())))
            } else {
                serde_json::from_value(value)
                    .map(Message::Notification)
                    .map_err(|e| {
                        JsonRpcResponse::failure(Value::Null, JsonRpcError::invalid_request(e.to_string()))
                    })
            };
        }

        if obj.contains_key("id") && (obj.contains_key("result") || obj.contains_key("error")) {
            return Ok(Message::Response(value));
        }

        Err(JsonRpcResponse::failure(
            id,
            JsonRpcError::invalid_request("not a request, notification or response"),
        ))
    }
}

/// A POST body: one message or a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(Value),
    Batch(Vec<Value>),
}

impl Payload {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        match serde_json::from_slice(body)? {
            Value::Array(items) => Ok(Self::Batch(items)),
            other => Ok(Self::Single(other)),
        }
    }

    /// `true` for a single (non-batch) `initialize` request.
    pub fn is_initialize(&self) -> bool {
        matches!(self, Self::Single(v) if is_initialize_request(v))
    }

    /// `true` when any message in the payload is an `initialize` request.
    pub fn contains_initialize(&self) -> bool {
        match self {
            Self::Single(v) => is_initialize_request(v),
            Self::Batch(items) => items.iter().any(is_initialize_request),
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Self::Single(v) => vec![v],
            Self::Batch(items) => items,
        }
    }
}

pub fn is_initialize_request(value: &Value) -> bool {
    value.get("method").and_then(Value::as_str) == Some("initialize") && value.get("id").is_some()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 response.
///
/// `id` is always serialized, as `null` when the request id was unreadable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(error_codes::PARSE_ERROR, format!("Parse error: {detail}"))
    }

    pub fn invalid_request(detail: impl std::fmt::Display) -> Self {
        Self::new(error_codes::INVALID_REQUEST, format!("Invalid Request: {detail}"))
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(error_codes::METHOD_NOT_FOUND, message)
    }

    pub fn invalid_params(detail: impl std::fmt::Display) -> Self {
        Self::new(error_codes::INVALID_PARAMS, format!("Invalid params: {detail}"))
    }

    pub fn internal(detail: impl std::fmt::Display) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, format!("Internal error: {detail}"))
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP-specific payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client info sent during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub client_info: Option<ClientInfo>,
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(rename = "_meta", default)]
    pub meta: Option<RequestMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    /// Opaque token echoed in `notifications/progress`.
    pub progress_token: Option<Value>,
}

/// Syslog-style levels used by `logging/setLevel` and
/// `notifications/message`, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetLevelParams {
    pub level: LoggingLevel,
}
