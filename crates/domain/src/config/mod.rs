mod observability;
mod server;
mod sessions;
mod tools;
mod upstream;

pub use observability::*;
pub use server::*;
pub use sessions::*;
pub use tools::*;
pub use upstream::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Route of the health endpoint served beside the MCP endpoint.
pub const HEALTH_PATH: &str = "/health";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if !self.server.path.starts_with('/') {
            errors.push(ConfigError::error("server.path", "path must start with '/'"));
        } else if self.server.path.trim_end_matches('/') == HEALTH_PATH {
            errors.push(ConfigError::error(
                "server.path",
                format!("path must not collide with the {HEALTH_PATH} endpoint"),
            ));
        }
        if self.server.max_concurrent_requests == 0 {
            errors.push(ConfigError::error(
                "server.max_concurrent_requests",
                "must be greater than 0",
            ));
        }
        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 || rl.burst_size == 0 {
                errors.push(ConfigError::error(
                    "server.rate_limit",
                    "requests_per_second and burst_size must be > 0",
                ));
            }
        }

        if self.sessions.max_events == 0 {
            errors.push(ConfigError::error(
                "sessions.max_events",
                "event retention must keep at least one event",
            ));
        }
        if self.sessions.stream_buffer == 0 {
            errors.push(ConfigError::error(
                "sessions.stream_buffer",
                "stream buffer must be greater than 0",
            ));
        }
        if self.shutdown.close_timeout_ms == 0 {
            errors.push(ConfigError::warning(
                "shutdown.close_timeout_ms",
                "a zero close timeout force-aborts every session on shutdown",
            ));
        }

        if !self.tools.endpoints.is_empty() && self.upstream.base_url.is_empty() {
            errors.push(ConfigError::error(
                "upstream.base_url",
                "base_url must be set when endpoints are configured",
            ));
        }
        if self.tools.endpoints.is_empty() {
            errors.push(ConfigError::warning("tools.endpoints", "no endpoints configured"));
        }

        let mut seen = HashSet::new();
        for (i, ep) in self.tools.endpoints.iter().enumerate() {
            if ep.id.is_empty() {
                errors.push(ConfigError::error(
                    format!("tools.endpoints[{i}].id"),
                    "endpoint id must not be empty",
                ));
            } else if !seen.insert(ep.id.as_str()) {
                errors.push(ConfigError::error(
                    format!("tools.endpoints[{i}].id"),
                    format!("duplicate endpoint id '{}'", ep.id),
                ));
            }
            if !ep.path.starts_with('/') {
                errors.push(ConfigError::error(
                    format!("tools.endpoints[{i}].path"),
                    "path must start with '/'",
                ));
            }
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }
}
