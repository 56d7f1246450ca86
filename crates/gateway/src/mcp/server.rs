//! MCP method dispatch.
//!
//! One [`McpServer`] serves every session.  Per-session protocol state
//! (negotiated version, log level) lives in the transport's attributes, and
//! server-originated notifications are emitted onto the transport's event
//! log.

use std::sync::Arc;

use serde_json::{json, Value};

use mr_sessions::Transport;

use super::catalog::ToolCatalog;
use super::protocol::{
    CallToolParams, InitializeParams, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    LoggingLevel, Message, SetLevelParams, LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};

const ATTR_PROTOCOL_VERSION: &str = "protocolVersion";
const ATTR_CLIENT_INFO: &str = "clientInfo";
const ATTR_LOG_LEVEL: &str = "logLevel";

/// Level assumed until the client calls `logging/setLevel`.
const DEFAULT_LOG_LEVEL: LoggingLevel = LoggingLevel::Info;

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

pub struct McpServer {
    info: ServerInfo,
    catalog: Arc<ToolCatalog>,
}

impl McpServer {
    pub fn new(info: ServerInfo, catalog: Arc<ToolCatalog>) -> Self {
        Self { info, catalog }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Handle every message of a POST body in order.  Only requests (and
    /// malformed messages) produce responses.
    pub async fn handle_all(&self, transport: &Transport, messages: Vec<Value>) -> Vec<JsonRpcResponse> {
        let mut responses = Vec::new();
        for message in messages {
            if let Some(response) = self.handle(transport, message).await {
                responses.push(response);
            }
        }
        responses
    }

    pub async fn handle(&self, transport: &Transport, message: Value) -> Option<JsonRpcResponse> {
        match Message::from_value(message) {
            Err(invalid) => Some(invalid),
            Ok(Message::Request(request)) => Some(self.dispatch(transport, request).await),
            Ok(Message::Notification(notification)) => {
                tracing::debug!(method = %notification.method, "client notification");
                None
            }
            Ok(Message::Response(_)) => {
                tracing::debug!("ignoring client response (no server requests outstanding)");
                None
            }
        }
    }

    async fn dispatch(&self, transport: &Transport, request: JsonRpcRequest) -> JsonRpcResponse {
        let JsonRpcRequest { id, method, params, .. } = request;
        tracing::debug!(
            session_id = transport.session_id().map_or("stateless", |s| s.as_str()),
            method = %method,
            "dispatching request"
        );

        let params = params.unwrap_or(Value::Null);
        let result = match method.as_str() {
            "initialize" => self.initialize(transport, params),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.catalog.descriptors() })),
            "tools/call" => self.call_tool(transport, params).await,
            "logging/setLevel" => set_level(transport, params),
            _ => Err(JsonRpcError::method_not_found(format!("Method not found: {method}"))),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => JsonRpcResponse::failure(id, error),
        }
    }

    fn initialize(&self, transport: &Transport, params: Value) -> Result<Value, JsonRpcError> {
        let params: InitializeParams =
            serde_json::from_value(params).map_err(JsonRpcError::invalid_params)?;

        let version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            params.protocol_version.as_str()
        } else {
            tracing::info!(
                requested = %params.protocol_version,
                offered = LATEST_PROTOCOL_VERSION,
                "unsupported protocol version requested"
            );
            LATEST_PROTOCOL_VERSION
        };

        transport.set_attribute(ATTR_PROTOCOL_VERSION, json!(version));
        if let Some(client) = &params.client_info {
            tracing::info!(client = %client.name, client_version = %client.version, protocol = version, "client initialized");
            transport.set_attribute(ATTR_CLIENT_INFO, json!({ "name": client.name, "version": client.version }));
        }

        Ok(json!({
            "protocolVersion": version,
            "capabilities": {
                "tools": { "listChanged": false },
                "logging": {},
            },
            "serverInfo": {
                "name": self.info.name,
                "version": self.info.version,
            },
        }))
    }

    async fn call_tool(&self, transport: &Transport, params: Value) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = serde_json::from_value(params).map_err(JsonRpcError::invalid_params)?;
        let not_found = || JsonRpcError::method_not_found(format!("Tool '{}' not found", params.name));
        if !self.catalog.contains(&params.name) {
            return Err(not_found());
        }

        let progress_token = params.meta.as_ref().and_then(|m| m.progress_token.clone());
        if let Some(token) = &progress_token {
            notify(
                transport,
                "notifications/progress",
                json!({ "progressToken": token, "progress": 0, "total": 1 }),
            );
        }

        let result = self
            .catalog
            .call(&params.name, params.arguments.clone())
            .await
            .ok_or_else(not_found)?;

        if let Some(token) = &progress_token {
            notify(
                transport,
                "notifications/progress",
                json!({ "progressToken": token, "progress": 1, "total": 1 }),
            );
        }

        if result.is_error && log_level(transport) <= LoggingLevel::Error {
            let detail = result.content.first().map(|c| c.as_text()).unwrap_or_default();
            notify(
                transport,
                "notifications/message",
                json!({
                    "level": LoggingLevel::Error,
                    "logger": self.info.name,
                    "data": { "tool": params.name, "error": detail },
                }),
            );
        }

        serde_json::to_value(result).map_err(JsonRpcError::internal)
    }
}

fn set_level(transport: &Transport, params: Value) -> Result<Value, JsonRpcError> {
    let params: SetLevelParams = serde_json::from_value(params).map_err(JsonRpcError::invalid_params)?;
    transport.set_attribute(ATTR_LOG_LEVEL, json!(params.level));
    tracing::debug!(level = ?params.level, "client log level set");
    Ok(json!({}))
}

fn log_level(transport: &Transport) -> LoggingLevel {
    transport
        .attribute(ATTR_LOG_LEVEL)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(DEFAULT_LOG_LEVEL)
}

/// Emit a server notification.  Dropped silently on stateless transports.
fn notify(transport: &Transport, method: &str, params: Value) {
    match transport.emit(JsonRpcNotification::new(method, params).to_value()) {
        Ok(Some(seq)) => tracing::debug!(method, seq, "notification logged"),
        Ok(None) => {}
        Err(e) => tracing::debug!(method, error = %e, "notification not delivered"),
    }
}
