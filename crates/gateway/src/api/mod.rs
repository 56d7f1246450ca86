pub mod error;
pub mod health;
pub mod mcp;

use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;

use mr_domain::config::HEALTH_PATH;

use crate::state::AppState;

/// Build the HTTP router.
///
/// The MCP endpoint lives at `server.path` (default `/mcp`) and answers
/// GET, POST and DELETE; every other method there is a 405.  `/health`
/// sits beside it for liveness checks.
pub fn router(state: &AppState) -> Router<AppState> {
    let path = state.config.server.path.as_str();

    Router::new()
        .route(
            path,
            get(mcp::handle_get)
                .post(mcp::handle_post)
                .delete(mcp::handle_delete)
                .fallback(mcp::method_not_allowed),
        )
        .route(HEALTH_PATH, get(health::health))
        .layer(CatchPanicLayer::custom(error::panic_response))
}
