//! HTTP-level rejections, rendered as JSON-RPC error bodies.
//!
//! Every error response carries `{"jsonrpc": "2.0", "error": {code, message},
//! "id": null}`: the failure happened before any request could be matched to
//! an id.

use std::any::Any;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use mr_sessions::{RegistryError, TransportError};

use crate::mcp::protocol::{error_codes, JsonRpcError, JsonRpcResponse};

#[derive(Debug, thiserror::Error)]
pub enum McpHttpError {
    /// Missing, malformed or unknown `Mcp-Session-Id`.
    #[error("Bad Request: No valid session ID provided")]
    InvalidSession,

    /// A header other than the session id is malformed.
    #[error("Bad Request: {0}")]
    BadHeader(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    #[error("Not Acceptable: Client must accept text/event-stream")]
    NotAcceptable,

    #[error("Unsupported Media Type: Content-Type must be application/json")]
    UnsupportedMediaType,

    #[error("Method not allowed.")]
    MethodNotAllowed,

    #[error("Session not found or closed")]
    TransportClosed,

    #[error("Service Unavailable: server is shutting down")]
    ShuttingDown,

    /// The detail is logged, never sent.
    #[error("Internal server error")]
    Internal(String),
}

impl McpHttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidSession | Self::BadHeader(_) | Self::Parse(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::TransportClosed => StatusCode::NOT_FOUND,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => error_codes::PARSE_ERROR,
            Self::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            Self::TransportClosed => error_codes::SESSION_NOT_FOUND,
            Self::Internal(_) => error_codes::INTERNAL_ERROR,
            _ => error_codes::SERVER_ERROR,
        }
    }

    pub fn body(&self) -> JsonRpcResponse {
        JsonRpcResponse::failure(serde_json::Value::Null, JsonRpcError::new(self.code(), self.to_string()))
    }
}

impl IntoResponse for McpHttpError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(detail) => tracing::error!(error = %detail, "internal error handling MCP request"),
            other => tracing::debug!(status = %other.status(), error = %other, "MCP request rejected"),
        }

        let mut response = (self.status(), Json(self.body())).into_response();
        if matches!(self, Self::MethodNotAllowed) {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, POST, DELETE"));
        }
        response
    }
}

impl From<TransportError> for McpHttpError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => Self::TransportClosed,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<RegistryError> for McpHttpError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Self::InvalidSession,
            RegistryError::Closed => Self::ShuttingDown,
            other @ RegistryError::AlreadyExists(_) => Self::Internal(other.to_string()),
        }
    }
}

/// Renders a handler panic as the standard 500 body.  Used with
/// `CatchPanicLayer::custom`.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    };
    McpHttpError::Internal(format!("panic: {detail}")).into_response()
}
