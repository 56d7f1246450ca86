pub mod config;

use clap::{Parser, Subcommand};

use mr_domain::config::Config;

/// mcprelay: an MCP Streamable HTTP gateway exposing an HTTP API as tools.
#[derive(Debug, Parser)]
#[command(name = "mcprelay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve(ServeArgs),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Default, clap::Args)]
pub struct ServeArgs {
    /// Listen port (overrides `server.port`).
    #[arg(long)]
    pub port: Option<u16>,
    /// Comma-separated endpoint groups to expose (overrides `tools.toolsets`).
    #[arg(long, value_delimiter = ',')]
    pub toolsets: Option<Vec<String>>,
    /// Where MCP traffic arrives.
    #[arg(long, value_enum, default_value_t)]
    pub transport: TransportMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportMode {
    /// Streamable HTTP on `server.host:server.port`.
    #[default]
    Http,
    /// Line-delimited JSON-RPC on stdin/stdout; logs go to stderr.
    Stdio,
}

impl ServeArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(toolsets) = &self.toolsets {
            config.tools.toolsets = toolsets
                .iter()
                .map(|t| t.trim().to_owned())
                .filter(|t| !t.is_empty())
                .collect();
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `MR_CONFIG` (or
/// `config.toml` by default).  Returns the parsed [`Config`] and the
/// path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("MR_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}
