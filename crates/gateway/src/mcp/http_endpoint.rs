//! Config-declared endpoints backed by a plain HTTP API.
//!
//! Each `[[tools.endpoints]]` entry becomes an [`HttpEndpoint`].  Calls go
//! through one shared [`UpstreamClient`] produced by
//! [`UpstreamClientFactory`].

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Map, Value};

use mr_domain::config::{EndpointConfig, UpstreamConfig};
use mr_domain::tool::{ApiError, ApiResponse, ClientFactory, CoreClient, Endpoint};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The API client handed to every endpoint call.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
}

impl UpstreamClient {
    pub fn from_config(config: &UpstreamConfig) -> mr_domain::Result<Self> {
        let base_url = reqwest::Url::parse(&config.base_url)
            .map_err(|e| mr_domain::Error::Config(format!("upstream.base_url: {e}")))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| mr_domain::Error::Config(format!("upstream.headers.{name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| mr_domain::Error::Config(format!("upstream.headers.{name}: {e}")))?;
            headers.insert(name, value);
        }

        match std::env::var(&config.auth_token_env) {
            Ok(token) if !token.is_empty() => {
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| mr_domain::Error::Config(format!("{}: {e}", config.auth_token_env)))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
                tracing::debug!(env = %config.auth_token_env, "upstream bearer token loaded");
            }
            _ => tracing::debug!(env = %config.auth_token_env, "no upstream bearer token"),
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| mr_domain::Error::Http(e.to_string()))?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &reqwest::Url {
        &self.base_url
    }
}

/// Hands out the same [`UpstreamClient`] for every call.
pub struct UpstreamClientFactory {
    client: Arc<UpstreamClient>,
}

impl UpstreamClientFactory {
    pub fn new(client: UpstreamClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl ClientFactory for UpstreamClientFactory {
    fn create(&self) -> CoreClient {
        self.client.clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HttpEndpoint {
    config: EndpointConfig,
    method: Method,
}

/// `{name}` within one path segment.
fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([^{}/]+)\}").expect("static regex"))
}

impl HttpEndpoint {
    pub fn new(config: EndpointConfig) -> mr_domain::Result<Self> {
        let method = Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| mr_domain::Error::Config(format!("endpoint '{}': method: {e}", config.id)))?;
        Ok(Self { config, method })
    }

    /// Build one endpoint per config entry.
    pub fn from_configs(configs: &[EndpointConfig]) -> mr_domain::Result<Vec<Arc<dyn Endpoint>>> {
        configs
            .iter()
            .map(|c| Self::new(c.clone()).map(|e| Arc::new(e) as Arc<dyn Endpoint>))
            .collect()
    }

    /// Fill path placeholders from `args`, removing the consumed entries.
    fn resolve_url(&self, base: &reqwest::Url, args: &mut Map<String, Value>) -> Result<reqwest::Url, ApiError> {
        let mut url = base.clone();
        let mut missing = Vec::new();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ApiError::Message("upstream base URL cannot carry a path".into()))?;
            segments.pop_if_empty();
            for template in self.config.path.split('/').filter(|s| !s.is_empty()) {
                let segment = placeholder().replace_all(template, |caps: &regex::Captures<'_>| {
                    match args.remove(&caps[1]) {
                        Some(value) => scalar_to_string(&value),
                        None => {
                            missing.push(caps[1].to_owned());
                            String::new()
                        }
                    }
                });
                segments.push(&segment);
            }
        }
        if !missing.is_empty() {
            return Err(ApiError::Message(format!(
                "missing path parameter(s): {}",
                missing.join(", ")
            )));
        }
        Ok(url)
    }
}

#[async_trait]
impl Endpoint for HttpEndpoint {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn group(&self) -> &str {
        &self.config.group
    }

    fn description(&self) -> Option<&str> {
        self.config.description.as_deref()
    }

    fn request_schema(&self) -> Value {
        self.config.input_schema.clone()
    }

    fn validate(&self, args: Value) -> Result<Value, Vec<Value>> {
        validate_args(&self.config.input_schema, args)
    }

    async fn call(&self, client: &CoreClient, mapped: Value) -> Result<ApiResponse, ApiError> {
        let client = client
            .downcast_ref::<UpstreamClient>()
            .ok_or_else(|| ApiError::Message("client factory did not produce an upstream client".into()))?;

        let mut args = match mapped {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let url = self.resolve_url(&client.base_url, &mut args)?;

        let mut request = client.http.request(self.method.clone(), url);
        if matches!(self.method, Method::GET | Method::DELETE | Method::HEAD) {
            let query: Vec<(String, String)> = args
                .iter()
                .flat_map(|(k, v)| match v {
                    Value::Array(items) => items.iter().map(|i| (k.clone(), scalar_to_string(i))).collect(),
                    Value::Null => Vec::new(),
                    other => vec![(k.clone(), scalar_to_string(other))],
                })
                .collect();
            request = request.query(&query);
        } else {
            request = request.json(&Value::Object(args));
        }

        tracing::debug!(endpoint = %self.config.id, method = %self.method, "calling upstream");
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Message(e.to_string()))?;

        let status_code = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_owned(), v.to_owned())))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Message(e.to_string()))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if (200..300).contains(&status_code) {
            Ok(ApiResponse {
                status_code,
                headers,
                body,
            })
        } else {
            Err(ApiError::Response {
                status_code,
                headers,
                body,
            })
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Check `args` against the top level of an object schema: arguments must
/// be an object (`null` counts as `{}`), required properties must be
/// present, and declared primitive types must match.  Nested schemas are
/// not descended into.
pub fn validate_args(schema: &Value, args: Value) -> Result<Value, Vec<Value>> {
    let args = match args {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(vec![json!({
                "path": [],
                "message": format!("expected an object, got {}", type_name(&other)),
            })])
        }
    };

    let mut errors = Vec::new();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(name) {
                errors.push(json!({ "path": [name], "message": "is required" }));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, value) in &args {
            let Some(declared) = properties.get(name).and_then(|p| p.get("type")) else {
                continue;
            };
            if !type_matches(declared, value) {
                errors.push(json!({
                    "path": [name],
                    "message": format!("expected {}, got {}", declared, type_name(value)),
                }));
            }
        }
    }

    if errors.is_empty() {
        Ok(Value::Object(args))
    } else {
        Err(errors)
    }
}

fn type_matches(declared: &Value, value: &Value) -> bool {
    match declared {
        Value::String(t) => single_type_matches(t, value),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| single_type_matches(t, value)),
        _ => true,
    }
}

fn single_type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
