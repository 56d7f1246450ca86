//! Lightweight liveness endpoint.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let shutting_down = state.lifecycle.is_shutting_down();
    Json(serde_json::json!({
        "status": if shutting_down { "draining" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.registry.len(),
        "oldest_session_secs": state.registry.oldest_session_secs(),
        "open_transports": state.transports.open_transports().count(),
        "tools": state.server.catalog().len(),
        "shutting_down": shutting_down,
    }))
}
