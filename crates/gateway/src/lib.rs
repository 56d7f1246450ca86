//! mcprelay gateway: MCP Streamable HTTP in front of a configured HTTP API.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod mcp;
pub mod state;
pub mod stdio;
