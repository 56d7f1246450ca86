use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream API client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settings for the API client handed to every endpoint invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL that endpoint paths are joined onto.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment variable holding a bearer token. Unset or empty means
    /// no `Authorization` header is sent.
    #[serde(default = "d_auth_token_env")]
    pub auth_token_env: String,
    /// Static headers added to every upstream request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: d_timeout_secs(),
            auth_token_env: d_auth_token_env(),
            headers: BTreeMap::new(),
        }
    }
}

fn d_timeout_secs() -> u64 {
    30
}
fn d_auth_token_env() -> String {
    "MR_UPSTREAM_TOKEN".into()
}
