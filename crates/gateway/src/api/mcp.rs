//! The MCP Streamable HTTP endpoint.
//!
//! - `POST`: JSON-RPC message or batch; stateful continuation, new
//!   session (initialize), or one-shot stateless exchange
//! - `GET`: SSE stream of server events for a session, resumable via
//!   `Last-Event-ID`
//! - `DELETE`: terminate a session
//!
//! Anything else on the path is answered with 405.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;

use mr_sessions::{AbortOnDrop, SessionId, Transport, TransportError};

use super::error::McpHttpError;
use crate::mcp::protocol::{JsonRpcResponse, Payload};
use crate::state::AppState;

pub const MCP_SESSION_ID: &str = "mcp-session-id";
pub const LAST_EVENT_ID: &str = "last-event-id";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Header helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `Ok(None)` when the header is absent; a present but unusable value is
/// always an invalid session.
fn session_header(headers: &HeaderMap) -> Result<Option<SessionId>, McpHttpError> {
    match headers.get(MCP_SESSION_ID) {
        None => Ok(None),
        Some(raw) => raw
            .to_str()
            .ok()
            .and_then(SessionId::parse)
            .map(Some)
            .ok_or(McpHttpError::InvalidSession),
    }
}

fn required_session(headers: &HeaderMap) -> Result<SessionId, McpHttpError> {
    session_header(headers)?.ok_or(McpHttpError::InvalidSession)
}

fn last_event_id(headers: &HeaderMap) -> Result<Option<u64>, McpHttpError> {
    let Some(raw) = headers.get(LAST_EVENT_ID) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Some)
        .ok_or_else(|| McpHttpError::BadHeader("Last-Event-ID must be a decimal sequence id".into()))
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return true;
    };
    accept.split(',').any(|part| {
        let media = part.split(';').next().unwrap_or("").trim();
        matches!(media, "text/event-stream" | "text/*" | "*/*")
    })
}

fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

fn with_session_header(mut response: Response, id: &SessionId) -> Response {
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(MCP_SESSION_ID, value);
    }
    response
}

/// `202` when nothing needs answering, else the JSON body (an array for
/// batches).
fn json_reply(responses: Vec<JsonRpcResponse>, batch: bool) -> Response {
    if responses.is_empty() {
        return StatusCode::ACCEPTED.into_response();
    }
    if batch {
        Json(responses).into_response()
    } else {
        let mut responses = responses;
        match responses.pop() {
            Some(single) => Json(single).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        }
    }
}

impl AppState {
    /// A transport closed under a request during shutdown is reported as
    /// the server going away rather than a dead session.
    fn closed_error(&self, err: TransportError) -> McpHttpError {
        if err == TransportError::Closed && self.lifecycle.is_shutting_down() {
            McpHttpError::ShuttingDown
        } else {
            err.into()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn handle_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, McpHttpError> {
    // An unknown session is rejected before anything about the body.
    let transport = match session_header(&headers)? {
        Some(id) => Some(state.registry.lookup(id.as_str())?),
        None => None,
    };
    if !is_json_content(&headers) {
        return Err(McpHttpError::UnsupportedMediaType);
    }
    let payload = Payload::parse(&body).map_err(|e| McpHttpError::Parse(e.to_string()))?;
    if matches!(&payload, Payload::Batch(items) if items.is_empty()) {
        return Err(McpHttpError::InvalidRequest("empty batch".into()));
    }

    match transport {
        Some(transport) => continue_session(state, transport, payload).await,
        None if payload.is_initialize() => initialize_session(state, payload).await,
        None => stateless_exchange(state, payload).await,
    }
}

async fn continue_session(
    state: AppState,
    transport: Arc<Transport>,
    payload: Payload,
) -> Result<Response, McpHttpError> {
    if payload.contains_initialize() {
        return Err(McpHttpError::InvalidRequest("Server already initialized".into()));
    }

    let batch = matches!(payload, Payload::Batch(_));
    let responses = transport
        .exclusive(state.server.handle_all(&transport, payload.into_values()))
        .await
        .map_err(|e| state.closed_error(e))?;

    Ok(json_reply(responses, batch))
}

/// Reserve an id, run `initialize` on a fresh transport, and publish the
/// session only once the handshake succeeded.  Dropping this future at
/// any await point releases the reservation and the transport.
async fn initialize_session(state: AppState, payload: Payload) -> Result<Response, McpHttpError> {
    if state.lifecycle.is_shutting_down() {
        return Err(McpHttpError::ShuttingDown);
    }
    let reservation = state.registry.reserve()?;
    let transport = state.transports.stateful(reservation.id().clone());
    transport.begin_initialize()?;

    let responses = match transport
        .exclusive(state.server.handle_all(&transport, payload.into_values()))
        .await
    {
        Ok(responses) => responses,
        Err(e) => {
            transport.abort();
            return Err(state.closed_error(e));
        }
    };

    if responses.iter().any(JsonRpcResponse::is_error) {
        tracing::info!(session_id = %reservation.id(), "initialize failed, session discarded");
        transport.abort();
        return Ok(json_reply(responses, false));
    }

    if let Err(e) = transport.activate() {
        transport.abort();
        return Err(state.closed_error(e));
    }
    let id = match reservation.commit(transport.clone()) {
        Ok(id) => id,
        Err(e) => {
            transport.abort();
            return Err(e.into());
        }
    };

    tracing::info!(session_id = %id, sessions = state.registry.len(), "session initialized");
    Ok(with_session_header(json_reply(responses, false), &id))
}

async fn stateless_exchange(state: AppState, payload: Payload) -> Result<Response, McpHttpError> {
    let batch = matches!(payload, Payload::Batch(_));
    let transport = AbortOnDrop::new(state.transports.stateless());

    let responses = transport
        .exclusive(state.server.handle_all(&transport, payload.into_values()))
        .await
        .map_err(|e| state.closed_error(e))?;

    Ok(json_reply(responses, batch))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, McpHttpError> {
    let id = required_session(&headers)?;
    let transport = state.registry.lookup(id.as_str())?;
    if !accepts_event_stream(&headers) {
        return Err(McpHttpError::NotAcceptable);
    }
    let after = last_event_id(&headers)?;

    let subscription = transport.subscribe(after).map_err(|e| state.closed_error(e))?;
    tracing::info!(
        session_id = %id,
        last_event_id = ?after,
        replayed = subscription.replayed().len(),
        missed = subscription.missed(),
        "event stream attached"
    );

    let stream = subscription.into_stream().map(|entry| {
        Ok::<_, Infallible>(
            Event::default()
                .id(entry.seq.to_string())
                .event("message")
                .data(entry.payload.to_string()),
        )
    });

    let keep_alive = KeepAlive::new().interval(Duration::from_secs(state.config.sessions.keep_alive_secs.max(1)));
    let response = Sse::new(stream).keep_alive(keep_alive).into_response();
    Ok(with_session_header(response, &id))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, McpHttpError> {
    let id = required_session(&headers)?;
    state.registry.terminate(id.as_str()).await?;
    Ok(StatusCode::OK.into_response())
}

pub async fn method_not_allowed() -> McpHttpError {
    McpHttpError::MethodNotAllowed
}
