//! HTTP capabilities against the downstream API
//!
//! An [`HttpCapability`] turns a tool invocation into one request to
//! `{base_url}{path}`:
//!
//! - `{name}` placeholders in the path are replaced by the argument of the
//!   same name (percent-encoded), which is then removed from the arguments;
//! - `GET` and `DELETE` send the remaining arguments as query parameters,
//!   the other methods as a JSON body;
//! - a credential, when present, is attached as a bearer token.
//!
//! Non-2xx responses and transport failures become unsuccessful
//! [`ToolResult`]s, not errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::types::Credential;
use crate::error::{Result, ToolgateError};
use crate::tools::secure::Capability;
use crate::tools::ToolResult;

/// HTTP method of a configured tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    #[default]
    #[serde(alias = "get")]
    Get,
    /// POST
    #[serde(alias = "post")]
    Post,
    /// PUT
    #[serde(alias = "put")]
    Put,
    /// PATCH
    #[serde(alias = "patch")]
    Patch,
    /// DELETE
    #[serde(alias = "delete")]
    Delete,
}

impl HttpMethod {
    /// Whether remaining arguments go in the query string
    pub fn uses_query(self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Delete)
    }

    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Calls one endpoint of the downstream API
#[derive(Debug, Clone)]
pub struct HttpCapability {
    client: Arc<reqwest::Client>,
    base_url: String,
    method: HttpMethod,
    path: String,
    parameters: Value,
    max_response_bytes: usize,
}

impl HttpCapability {
    /// Creates a capability for `method` `{base_url}{path}`
    pub fn new(
        client: Arc<reqwest::Client>,
        base_url: impl Into<String>,
        method: HttpMethod,
        path: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            method,
            path: path.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            max_response_bytes: 1024 * 1024,
        }
    }

    /// Sets the JSON schema advertised for the arguments
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the response size limit
    pub fn with_max_response_bytes(mut self, max_response_bytes: usize) -> Self {
        self.max_response_bytes = max_response_bytes;
        self
    }

    /// Substitutes path placeholders, returning the path and leftover args
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Tool`] when a placeholder has no argument or
    /// the arguments are not a JSON object.
    pub fn render_path(&self, args: Value) -> Result<(String, Map<String, Value>)> {
        let mut remaining = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ToolgateError::Tool(format!(
                    "arguments must be a JSON object, got {other}"
                ))
                .into())
            }
        };

        let mut rendered = String::with_capacity(self.path.len());
        let mut rest = self.path.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            let name = &rest[open + 1..open + close];
            let value = remaining.remove(name).ok_or_else(|| {
                ToolgateError::Tool(format!("missing path parameter '{name}'"))
            })?;
            rendered.push_str(&rest[..open]);
            let raw = scalar_to_string(&value);
            rendered.extend(url::form_urlencoded::byte_serialize(raw.as_bytes()));
            rest = &rest[open + close + 1..];
        }
        rendered.push_str(rest);
        Ok((rendered, remaining))
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Capability for HttpCapability {
    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn call(&self, args: Value, credential: Option<Credential>) -> Result<ToolResult> {
        let (path, remaining) = match self.render_path(args) {
            Ok(rendered) => rendered,
            Err(e) => return Ok(ToolResult::error(e.to_string())),
        };
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.client.request(self.method.as_reqwest(), &url);
        if self.method.uses_query() {
            let query: Vec<(String, String)> = remaining
                .iter()
                .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                .collect();
            if !query.is_empty() {
                request = request.query(&query);
            }
        } else {
            request = request.json(&Value::Object(remaining));
        }
        if let Some(credential) = &credential {
            request = request.bearer_auth(&credential.access_token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Downstream request failed");
                return Ok(ToolResult::error(format!("request to {url} failed: {e}")));
            }
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolgateError::Tool(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            tracing::debug!(url = %url, status = status.as_u16(), "Downstream returned error status");
            return Ok(
                ToolResult::error(format!("HTTP {} from {}: {}", status.as_u16(), url, body))
                    .with_metadata("status", status.as_u16().to_string()),
            );
        }

        Ok(ToolResult::success(body)
            .with_metadata("status", status.as_u16().to_string())
            .truncate_if_needed(self.max_response_bytes))
    }
}
