//! AppState construction extracted from `main.rs`.
//!
//! [`build_app_state`] is the boot path used by `serve`; [`assemble`] wires
//! an already-built catalog and is what the integration tests use.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use mr_domain::config::{Config, ConfigSeverity};
use mr_domain::tool::{ClientFactory, CoreClient};
use mr_sessions::{LifecycleManager, OpenTransports, SessionRegistry, TransportFactory};

use crate::mcp::{HttpEndpoint, McpServer, ServerInfo, ToolCatalog, UpstreamClient, UpstreamClientFactory};
use crate::state::AppState;

/// Validate config, build the tool catalog and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Upstream client ──────────────────────────────────────────────
    let clients: Arc<dyn ClientFactory> = if config.upstream.base_url.is_empty() {
        tracing::info!("no upstream base_url configured; tool catalog will be empty");
        Arc::new(|| -> CoreClient { Arc::new(()) })
    } else {
        let client = UpstreamClient::from_config(&config.upstream).context("building upstream client")?;
        tracing::info!(
            base_url = %client.base_url(),
            timeout_secs = config.upstream.timeout_secs,
            "upstream client ready"
        );
        Arc::new(UpstreamClientFactory::new(client))
    };

    // ── Tool catalog ─────────────────────────────────────────────────
    let endpoints = HttpEndpoint::from_configs(&config.tools.endpoints).context("loading endpoints")?;
    let catalog =
        ToolCatalog::new(endpoints, &config.tools.toolsets, clients).context("building tool catalog")?;
    tracing::info!(
        tools = catalog.len(),
        toolsets = ?config.tools.toolsets,
        "tool catalog ready"
    );

    Ok(assemble(config, catalog))
}

/// Wire the session layer and the MCP server around `catalog`.
pub fn assemble(config: Arc<Config>, catalog: ToolCatalog) -> AppState {
    // ── Sessions ─────────────────────────────────────────────────────
    let root = CancellationToken::new();
    let open = OpenTransports::new();
    let registry = Arc::new(SessionRegistry::new(open.clone()));
    let transports = TransportFactory::new(&config.sessions, root.clone(), open);
    let lifecycle = Arc::new(LifecycleManager::new(registry.clone(), root, &config.shutdown));
    tracing::info!(
        max_events = config.sessions.max_events,
        stream_buffer = config.sessions.stream_buffer,
        close_timeout_ms = config.shutdown.close_timeout_ms,
        "session registry ready"
    );

    // ── MCP server ───────────────────────────────────────────────────
    let server = Arc::new(McpServer::new(
        ServerInfo {
            name: config.server.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        },
        Arc::new(catalog),
    ));

    AppState {
        config,
        registry,
        transports,
        lifecycle,
        server,
    }
}
