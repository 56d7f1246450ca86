use std::sync::Arc;

use mr_domain::config::Config;
use mr_sessions::{LifecycleManager, SessionRegistry, TransportFactory};

use crate::mcp::McpServer;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Sessions ──────────────────────────────────────────────────────
    /// The only shared map of live sessions.
    pub registry: Arc<SessionRegistry>,
    /// Builds stateful and stateless transports wired to the shutdown token.
    pub transports: TransportFactory,
    pub lifecycle: Arc<LifecycleManager>,

    // ── MCP ───────────────────────────────────────────────────────────
    pub server: Arc<McpServer>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
