pub mod catalog;
pub mod http_endpoint;
pub mod protocol;
pub mod server;

pub use catalog::ToolCatalog;
pub use http_endpoint::{HttpEndpoint, UpstreamClient, UpstreamClientFactory};
pub use server::{McpServer, ServerInfo};
