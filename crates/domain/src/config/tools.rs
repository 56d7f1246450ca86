use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    /// Endpoint groups to expose. Empty exposes every group.
    #[serde(default)]
    pub toolsets: Vec<String>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// One upstream API endpoint exposed as an MCP tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Endpoint id, e.g. `getAccountBalances`. The tool name is derived
    /// from it.
    pub id: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "d_method")]
    pub method: String,
    /// Request path with `{param}` placeholders.
    pub path: String,
    #[serde(default = "d_input_schema")]
    pub input_schema: serde_json::Value,
}

fn d_method() -> String {
    "GET".into()
}

fn d_input_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults() {
        let raw = r#"
            id = "listAccounts"
            path = "/accounts"
        "#;
        let ep: EndpointConfig = toml::from_str(raw).unwrap();
        assert_eq!(ep.method, "GET");
        assert_eq!(ep.input_schema["type"], "object");
        assert!(ep.group.is_empty());
    }

    #[test]
    fn input_schema_from_toml_table() {
        let raw = r#"
            id = "getAccount"
            path = "/accounts/{accountId}"

            [input_schema]
            type = "object"
            required = ["accountId"]

            [input_schema.properties.accountId]
            type = "string"
        "#;
        let ep: EndpointConfig = toml::from_str(raw).unwrap();
        assert_eq!(ep.input_schema["required"][0], "accountId");
        assert_eq!(ep.input_schema["properties"]["accountId"]["type"], "string");
    }
}
