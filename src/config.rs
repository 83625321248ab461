//! Configuration management for Toolgate
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::auth::exchange::ExchangeConfig;
use crate::auth::types::{AgentIdentity, AuthRequirement, ClientCredentials, TokenKind};
use crate::error::{Result, ToolgateError};
use crate::tools::http::HttpMethod;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Main configuration structure for Toolgate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Identity provider endpoints and application client
    #[serde(default)]
    pub identity_provider: IdentityProviderConfig,
    /// Identity of the agent acting in interactive sessions
    #[serde(default)]
    pub agent: AgentIdentity,
    /// Background agent and webhook job
    #[serde(default)]
    pub background: BackgroundConfig,
    /// Authorization timeouts
    #[serde(default)]
    pub auth: AuthConfig,
    /// Downstream API the tools call
    #[serde(default)]
    pub api: ApiConfig,
    /// Tool catalog
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// First message sent on every new session
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_welcome_message() -> String {
    "Connected. Send {\"type\":\"list_tools\"} to see what I can do.".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            welcome_message: default_welcome_message(),
        }
    }
}

/// Identity provider settings
///
/// Endpoints default to `{base_url}/oauth2/authorize` and
/// `{base_url}/oauth2/token`.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityProviderConfig {
    /// Provider base URL
    #[serde(default = "default_idp_base_url")]
    pub base_url: String,
    /// Explicit authorization endpoint
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    /// Explicit token endpoint
    #[serde(default)]
    pub token_endpoint: Option<String>,
    /// Application client id used for delegated flows
    #[serde(default)]
    pub client_id: String,
    /// Application client secret
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Redirect URI registered with the provider; must reach `/callback`
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Timeout for token endpoint requests
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_idp_base_url() -> String {
    "http://localhost:9000".to_string()
}

fn default_redirect_uri() -> String {
    "http://localhost:8000/callback".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl Default for IdentityProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_idp_base_url(),
            authorization_endpoint: None,
            token_endpoint: None,
            client_id: String::new(),
            client_secret: None,
            redirect_uri: default_redirect_uri(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl std::fmt::Debug for IdentityProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProviderConfig")
            .field("base_url", &self.base_url)
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

impl IdentityProviderConfig {
    fn endpoint(&self, explicit: &Option<String>, suffix: &str) -> Result<Url> {
        let raw = match explicit {
            Some(url) => url.clone(),
            None => format!("{}/{}", self.base_url.trim_end_matches('/'), suffix),
        };
        Url::parse(&raw)
            .map_err(|e| ToolgateError::Config(format!("Invalid endpoint URL '{}': {}", raw, e)).into())
    }

    /// Resolved authorization endpoint
    pub fn authorization_endpoint_url(&self) -> Result<Url> {
        self.endpoint(&self.authorization_endpoint, "oauth2/authorize")
    }

    /// Resolved token endpoint
    pub fn token_endpoint_url(&self) -> Result<Url> {
        self.endpoint(&self.token_endpoint, "oauth2/token")
    }

    /// Settings for [`HttpExchangeClient`](crate::auth::exchange::HttpExchangeClient)
    pub fn exchange_config(&self) -> Result<ExchangeConfig> {
        Ok(ExchangeConfig {
            authorization_endpoint: self.authorization_endpoint_url()?,
            token_endpoint: self.token_endpoint_url()?,
            redirect_uri: self.redirect_uri.clone(),
            client: ClientCredentials {
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone().filter(|s| !s.is_empty()),
            },
        })
    }
}

/// Background agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Whether the webhook runs jobs
    #[serde(default)]
    pub enabled: bool,
    /// Machine identity of the background agent
    #[serde(default)]
    pub agent: AgentIdentity,
    /// Overall deadline of one job
    #[serde(default = "default_task_timeout_seconds")]
    pub task_timeout_seconds: u64,
    /// Bearer token the webhook caller must present; required when enabled
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Tool steps run for each auto-assign request
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

fn default_task_timeout_seconds() -> u64 {
    300
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            agent: AgentIdentity::default(),
            task_timeout_seconds: default_task_timeout_seconds(),
            webhook_secret: None,
            steps: Vec::new(),
        }
    }
}

impl BackgroundConfig {
    /// Job deadline
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }
}

/// One step of a background job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Tool to invoke
    pub tool: String,
    /// Arguments; string values may contain `{booking_id}`, `{hotel_id}`,
    /// `{user_id}` and `{priority}` placeholders
    #[serde(default = "empty_object")]
    pub args: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Authorization timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// How long an invocation waits for user consent
    #[serde(default = "default_interactive_timeout_seconds")]
    pub interactive_timeout_seconds: u64,
    /// Lifetime of an unconsumed pending authorization
    #[serde(default = "default_state_ttl_seconds")]
    pub state_ttl_seconds: u64,
    /// Interval of the expired-state sweeper
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_interactive_timeout_seconds() -> u64 {
    300
}

fn default_state_ttl_seconds() -> u64 {
    600
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            interactive_timeout_seconds: default_interactive_timeout_seconds(),
            state_ttl_seconds: default_state_ttl_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl AuthConfig {
    /// Interactive wait ceiling
    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_secs(self.interactive_timeout_seconds)
    }

    /// Pending authorization lifetime
    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_seconds)
    }

    /// Sweeper interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Downstream API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL prepended to every tool path
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Per-request timeout
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// Responses longer than this are truncated
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

fn default_api_base_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_max_response_bytes() -> usize {
    1024 * 1024
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

/// Who may use a configured tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolAudience {
    /// Interactive sessions only
    #[default]
    Session,
    /// The background agent only
    Background,
    /// Both
    All,
}

impl ToolAudience {
    /// Whether sessions get the tool
    pub fn includes_session(self) -> bool {
        matches!(self, ToolAudience::Session | ToolAudience::All)
    }

    /// Whether the background agent gets the tool
    pub fn includes_background(self) -> bool {
        matches!(self, ToolAudience::Background | ToolAudience::All)
    }
}

/// A tool backed by one downstream API endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Unique tool name
    pub name: String,
    /// Description shown to clients
    #[serde(default)]
    pub description: String,
    /// HTTP method
    #[serde(default)]
    pub method: HttpMethod,
    /// Path below `api.base_url`, may contain `{arg}` placeholders
    pub path: String,
    /// JSON schema of the arguments
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    /// Authorization requirement; absent means public
    #[serde(default)]
    pub auth: Option<ToolAuthConfig>,
    /// Who may use the tool
    #[serde(default)]
    pub audience: ToolAudience,
}

/// Authorization requirement of a configured tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAuthConfig {
    /// Required scopes
    pub scopes: Vec<String>,
    /// Target resource
    pub resource: String,
    /// Delegated (user consent) or machine (agent identity)
    #[serde(default)]
    pub token_kind: TokenKind,
}

impl ToolAuthConfig {
    /// Builds the requirement
    pub fn requirement(&self) -> Result<AuthRequirement> {
        AuthRequirement::new(&self.scopes, self.resource.as_str(), self.token_kind)
    }
}

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
    /// Also write logs to this file
    #[serde(default)]
    pub file_path: Option<String>,
}

fn default_log_level() -> String {
    "toolgate=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file_path: None,
        }
    }
}

/// Reads and parses an environment variable, warning on invalid values
fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {}: {}", name, raw);
            None
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Parses a YAML configuration file without applying overrides
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ToolgateError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parses YAML configuration text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| ToolgateError::Config(format!("Failed to parse config: {}", e)).into())
    }

    /// Applies `TOOLGATE_*` environment overrides
    pub fn apply_env_vars(&mut self) {
        // Identity provider
        if let Ok(client_id) = std::env::var("TOOLGATE_CLIENT_ID") {
            self.identity_provider.client_id = client_id;
        }
        if let Ok(client_secret) = std::env::var("TOOLGATE_CLIENT_SECRET") {
            self.identity_provider.client_secret = Some(client_secret);
        }
        if let Ok(base_url) = std::env::var("TOOLGATE_IDP_BASE_URL") {
            self.identity_provider.base_url = base_url;
        }
        if let Ok(redirect_uri) = std::env::var("TOOLGATE_REDIRECT_URI") {
            self.identity_provider.redirect_uri = redirect_uri;
        }

        // Agent identities
        if let Ok(agent_id) = std::env::var("TOOLGATE_AGENT_ID") {
            self.agent.agent_id = agent_id;
        }
        if let Ok(agent_secret) = std::env::var("TOOLGATE_AGENT_SECRET") {
            self.agent.agent_secret = agent_secret;
        }
        if let Ok(agent_id) = std::env::var("TOOLGATE_BACKGROUND_AGENT_ID") {
            self.background.agent.agent_id = agent_id;
        }
        if let Ok(agent_secret) = std::env::var("TOOLGATE_BACKGROUND_AGENT_SECRET") {
            self.background.agent.agent_secret = agent_secret;
        }
        if let Ok(secret) = std::env::var("TOOLGATE_WEBHOOK_SECRET") {
            self.background.webhook_secret = Some(secret);
        }
        if let Some(enabled) = parse_env::<bool>("TOOLGATE_BACKGROUND_ENABLED") {
            self.background.enabled = enabled;
        }

        // Server and API
        if let Ok(bind) = std::env::var("TOOLGATE_BIND") {
            self.server.bind = bind;
        }
        if let Ok(base_url) = std::env::var("TOOLGATE_API_BASE_URL") {
            self.api.base_url = base_url;
        }

        // Timeouts
        if let Some(timeout) = parse_env("TOOLGATE_INTERACTIVE_TIMEOUT_SECONDS") {
            self.auth.interactive_timeout_seconds = timeout;
        }
        if let Some(timeout) = parse_env("TOOLGATE_TASK_TIMEOUT_SECONDS") {
            self.background.task_timeout_seconds = timeout;
        }
    }

    /// Applies command line overrides
    pub fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.logging.level = "toolgate=debug".to_string();
        }
        if let crate::cli::Commands::Serve {
            bind: Some(bind), ..
        } = &cli.command
        {
            self.server.bind = bind.clone();
        }
    }

    /// Parsed listen address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server.bind.parse().map_err(|e| {
            ToolgateError::Config(format!("Invalid server.bind '{}': {}", self.server.bind, e))
                .into()
        })
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Config`] describing the first problem found
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        if self.identity_provider.base_url.trim().is_empty() {
            return Err(ToolgateError::Config(
                "identity_provider.base_url cannot be empty".to_string(),
            )
            .into());
        }
        self.identity_provider.authorization_endpoint_url()?;
        self.identity_provider.token_endpoint_url()?;
        Url::parse(&self.identity_provider.redirect_uri).map_err(|e| {
            ToolgateError::Config(format!("Invalid identity_provider.redirect_uri: {}", e))
        })?;

        if self.auth.interactive_timeout_seconds == 0 {
            return Err(ToolgateError::Config(
                "auth.interactive_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }
        if self.auth.sweep_interval_seconds == 0 {
            return Err(ToolgateError::Config(
                "auth.sweep_interval_seconds must be greater than 0".to_string(),
            )
            .into());
        }
        if self.auth.state_ttl_seconds < self.auth.interactive_timeout_seconds {
            return Err(ToolgateError::Config(
                "auth.state_ttl_seconds must be at least auth.interactive_timeout_seconds"
                    .to_string(),
            )
            .into());
        }

        Url::parse(&self.api.base_url)
            .map_err(|e| ToolgateError::Config(format!("Invalid api.base_url: {}", e)))?;
        if self.api.max_response_bytes == 0 {
            return Err(ToolgateError::Config(
                "api.max_response_bytes must be greater than 0".to_string(),
            )
            .into());
        }

        self.validate_tools()?;
        self.validate_background()?;

        if self.logging.level.trim().is_empty() {
            return Err(
                ToolgateError::Config("logging.level cannot be empty".to_string()).into(),
            );
        }

        Ok(())
    }

    fn validate_tools(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(ToolgateError::Config("Tool name cannot be empty".to_string()).into());
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(
                    ToolgateError::Config(format!("Duplicate tool name: {}", tool.name)).into(),
                );
            }
            if !tool.path.starts_with('/') {
                return Err(ToolgateError::Config(format!(
                    "Tool '{}' path must start with '/'",
                    tool.name
                ))
                .into());
            }
            if let Some(auth) = &tool.auth {
                let requirement = auth.requirement().map_err(|e| {
                    ToolgateError::Config(format!("Tool '{}': {}", tool.name, e))
                })?;
                if requirement.kind() == TokenKind::Delegated
                    && tool.audience.includes_session()
                    && self.identity_provider.client_id.is_empty()
                {
                    return Err(ToolgateError::Config(format!(
                        "Tool '{}' needs delegated authorization but identity_provider.client_id is not set",
                        tool.name
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    fn validate_background(&self) -> Result<()> {
        if !self.background.enabled {
            return Ok(());
        }
        if self.background.agent.agent_id.is_empty() {
            return Err(ToolgateError::Config(
                "background.agent.agent_id is required when the background agent is enabled"
                    .to_string(),
            )
            .into());
        }
        if self
            .background
            .webhook_secret
            .as_deref()
            .map_or(true, |secret| secret.trim().is_empty())
        {
            return Err(ToolgateError::Config(
                "background.webhook_secret is required when the background agent is enabled"
                    .to_string(),
            )
            .into());
        }
        if self.background.task_timeout_seconds == 0 {
            return Err(ToolgateError::Config(
                "background.task_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }
        for step in &self.background.steps {
            let tool = self
                .tools
                .iter()
                .find(|t| t.name == step.tool)
                .ok_or_else(|| {
                    ToolgateError::Config(format!(
                        "Background step references unknown tool: {}",
                        step.tool
                    ))
                })?;
            if !tool.audience.includes_background() {
                return Err(ToolgateError::Config(format!(
                    "Tool '{}' is not available to the background agent",
                    step.tool
                ))
                .into());
            }
            if let Some(auth) = &tool.auth {
                if auth.token_kind == TokenKind::Delegated {
                    return Err(ToolgateError::Config(format!(
                        "Background step '{}' needs a delegated credential, which requires a user session",
                        step.tool
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const SAMPLE: &str = r#"
identity_provider:
  base_url: "https://idp.example.com/"
  client_id: "hotel-app"
  client_secret: "app-secret"
agent:
  agent_id: "agent-1"
  agent_name: "Booking Assistant"
  agent_secret: "s1"
background:
  enabled: true
  agent:
    agent_id: "agent-bg"
    agent_name: "Auto Assigner"
    agent_secret: "s2"
  webhook_secret: "hook-secret"
  steps:
    - tool: admin_read_bookings
      args:
        booking_id: "{booking_id}"
tools:
  - name: list_hotels
    description: List hotels
    path: /hotels
  - name: create_booking
    method: post
    path: /bookings
    auth:
      scopes: [create_bookings]
      resource: booking_api
  - name: admin_read_bookings
    path: /admin/bookings/{booking_id}
    audience: background
    auth:
      scopes: [admin_read_bookings]
      resource: booking_api
      token_kind: machine
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(config.auth.interactive_timeout_seconds, 300);
        assert_eq!(config.auth.state_ttl_seconds, 600);
        assert_eq!(config.background.task_timeout_seconds, 300);
        assert_eq!(config.background.webhook_secret.as_deref(), Some("env-hook"));
        assert!(!config.background.enabled);
        assert!(config.tools.is_empty());
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::from_yaml(SAMPLE).unwrap().validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.tools.len(), 3);
        assert_eq!(config.tools[1].method, HttpMethod::Post);
        assert_eq!(config.tools[2].audience, ToolAudience::Background);

        let requirement = config.tools[2].auth.as_ref().unwrap().requirement().unwrap();
        assert_eq!(requirement.kind(), TokenKind::Machine);
        assert_eq!(config.background.steps[0].tool, "admin_read_bookings");
    }

    #[test]
    fn test_endpoints_default_from_base_url() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let idp = &config.identity_provider;
        assert_eq!(
            idp.authorization_endpoint_url().unwrap().as_str(),
            "https://idp.example.com/oauth2/authorize"
        );
        assert_eq!(
            idp.token_endpoint_url().unwrap().as_str(),
            "https://idp.example.com/oauth2/token"
        );

        let exchange = idp.exchange_config().unwrap();
        assert_eq!(exchange.client.client_id, "hotel-app");
        assert!(!format!("{idp:?}").contains("app-secret"));
    }

    #[test]
    fn test_validation_invalid_bind() {
        let mut config = Config::default();
        config.server.bind = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_ttl_shorter_than_interactive_timeout() {
        let mut config = Config::default();
        config.auth.state_ttl_seconds = 10;
        config.auth.interactive_timeout_seconds = 60;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("state_ttl_seconds"), "{err}");
    }

    #[test]
    fn test_validation_duplicate_tool() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        let duplicate = config.tools[0].clone();
        config.tools.push(duplicate);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Duplicate tool name"), "{err}");
    }

    #[test]
    fn test_validation_empty_scopes() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.tools[1].auth.as_mut().unwrap().scopes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_delegated_tool_needs_client_id() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.identity_provider.client_id.clear();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("client_id"), "{err}");
    }

    #[test]
    fn test_validation_background_step_unknown_tool() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.background.steps.push(StepConfig {
            tool: "missing".to_string(),
            args: empty_object(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_background_step_must_be_machine() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.tools[1].audience = ToolAudience::All;
        config.background.steps.push(StepConfig {
            tool: "create_booking".to_string(),
            args: empty_object(),
        });
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("delegated"), "{err}");
    }

    #[test]
    fn test_validation_background_needs_agent() {
        let mut config = Config::default();
        config.background.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_background_needs_webhook_secret() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.background.webhook_secret = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("background.webhook_secret"));

        config.background.webhook_secret = Some("  ".to_string());
        assert!(config.validate().is_err());

        config.background.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var("TOOLGATE_CLIENT_ID", "env-client");
        env::set_var("TOOLGATE_BACKGROUND_ENABLED", "true");
        env::set_var("TOOLGATE_INTERACTIVE_TIMEOUT_SECONDS", "45");
        env::set_var("TOOLGATE_TASK_TIMEOUT_SECONDS", "not-a-number");
        env::set_var("TOOLGATE_WEBHOOK_SECRET", "env-hook");

        let mut config = Config::default();
        config.apply_env_vars();

        env::remove_var("TOOLGATE_CLIENT_ID");
        env::remove_var("TOOLGATE_BACKGROUND_ENABLED");
        env::remove_var("TOOLGATE_INTERACTIVE_TIMEOUT_SECONDS");
        env::remove_var("TOOLGATE_TASK_TIMEOUT_SECONDS");
        env::remove_var("TOOLGATE_WEBHOOK_SECRET");

        assert_eq!(config.identity_provider.client_id, "env-client");
        assert!(config.background.enabled);
        assert_eq!(config.auth.interactive_timeout_seconds, 45);
        assert_eq!(config.background.task_timeout_seconds, 300);
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults_and_cli_bind() {
        use clap::Parser;
        let cli = crate::cli::Cli::try_parse_from([
            "toolgate",
            "--verbose",
            "serve",
            "--bind",
            "0.0.0.0:9100",
        ])
        .unwrap();

        let config = Config::load("/nonexistent/toolgate.yaml", &cli).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9100");
        assert_eq!(config.logging.level, "toolgate=debug");
    }

    #[test]
    fn test_from_file_reads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.agent.agent_id, "agent-1");
        assert_eq!(config.background.agent.agent_id, "agent-bg");
    }

    #[test]
    fn test_from_file_rejects_invalid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "tools: [unclosed").unwrap();
        assert!(Config::from_file(path.to_str().unwrap()).is_err());
    }
}
