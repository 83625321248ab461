//! HTTP surface
//!
//! Routes:
//!
//! - `GET /chat`: WebSocket session channel, see [`chat`]
//! - `GET /callback`: identity provider redirect, see [`callback`]
//! - `POST /webhook/auto-assign`: background job trigger, see [`webhook`]
//! - `GET /health`: liveness plus session and pending-authorization counts
//!
//! All shared state lives in [`AppState`]; nothing is global.

pub mod callback;
pub mod chat;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::auth::exchange::{AuthorizationExchange, HttpExchangeClient};
use crate::auth::registry::StateRegistry;
use crate::background::BackgroundAgent;
use crate::config::{Config, ToolAudience};
use crate::error::{Result, ToolgateError};
use crate::session::SessionHub;
use crate::tools::catalog::{api_client, ToolCatalog};

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    /// Open sessions and callback routing
    pub hub: Arc<SessionHub>,
    /// Background agent; `None` when disabled
    pub background: Option<Arc<BackgroundAgent>>,
    /// Bearer secret the webhook caller must present
    pub webhook_secret: Option<String>,
    /// First message of every session
    pub welcome_message: String,
}

impl AppState {
    /// Wires hub, background agent and tool catalogs from configuration
    pub fn from_config(config: &Config, exchange: Arc<dyn AuthorizationExchange>) -> Result<Self> {
        let api = api_client(config)?;
        let registry = Arc::new(StateRegistry::new(config.auth.state_ttl()));

        let session_tools = ToolCatalog::from_config(config, api.clone(), ToolAudience::Session)?;
        let hub = Arc::new(SessionHub::new(
            registry,
            exchange.clone(),
            config.agent.clone(),
            Arc::new(session_tools),
            config.auth.interactive_timeout(),
        ));

        let background = if config.background.enabled {
            let background_tools = ToolCatalog::from_config(config, api, ToolAudience::Background)?;
            let agent = BackgroundAgent::new(
                config.background.agent.clone(),
                exchange,
                &background_tools,
                config.background.steps.clone(),
                config.background.task_timeout(),
            )?;
            Some(Arc::new(agent))
        } else {
            None
        };

        Ok(Self {
            hub,
            background,
            webhook_secret: config
                .background
                .webhook_secret
                .clone()
                .filter(|secret| !secret.is_empty()),
            welcome_message: config.server.welcome_message.clone(),
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("hub", &self.hub)
            .field("background", &self.background.is_some())
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Builds the router over `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", get(chat::chat_handler))
        .route("/callback", get(callback::callback_handler))
        .route("/webhook/auto-assign", post(webhook::auto_assign_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.hub.len(),
        "pending_authorizations": state.hub.registry().len(),
    }))
}

/// Identity provider client built from `identity_provider`
pub fn exchange_client(config: &Config) -> Result<Arc<HttpExchangeClient>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(
            config.identity_provider.request_timeout_seconds,
        ))
        .build()
        .map_err(ToolgateError::Http)?;
    Ok(Arc::new(HttpExchangeClient::new(
        Arc::new(http),
        config.identity_provider.exchange_config()?,
    )))
}

/// Runs the server until Ctrl-C
///
/// On shutdown every session is closed, which fails its waiting
/// invocations with `SessionClosed`, and the registry sweeper stops.
pub async fn serve(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = AppState::from_config(&config, exchange_client(&config)?)?;

    let shutdown = CancellationToken::new();
    let sweeper = state
        .hub
        .registry()
        .spawn_sweeper(config.auth.sweep_interval(), shutdown.clone());

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        background = state.background.is_some(),
        tools = config.tools.len(),
        "Toolgate listening"
    );

    let signal = shutdown.clone();
    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown requested"),
                _ = signal.cancelled() => {}
            }
        })
        .await?;

    shutdown.cancel();
    let closed = state.hub.close_all();
    if let Some(background) = &state.background {
        background.shutdown();
    }
    if let Err(err) = sweeper.await {
        tracing::warn!(error = %err, "State registry sweeper ended abnormally");
    }
    tracing::info!(closed_sessions = closed, "Toolgate stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::fake::FakeExchange;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_counts() {
        let state = AppState::from_config(&Config::default(), Arc::new(FakeExchange::new())).unwrap();
        state
            .hub
            .registry()
            .put("s1", "gone", crate::auth::types::AuthRequirement::delegated(["a"], "r").unwrap(), "v");

        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"status": "ok", "sessions": 0, "pending_authorizations": 1}));
    }

    #[test]
    fn test_background_disabled_by_default() {
        let state = AppState::from_config(&Config::default(), Arc::new(FakeExchange::new())).unwrap();
        assert!(state.background.is_none());
        assert!(state.webhook_secret.is_none());
    }

    #[test]
    fn test_empty_webhook_secret_is_ignored() {
        let mut config = Config::default();
        config.background.webhook_secret = Some(String::new());
        let state = AppState::from_config(&config, Arc::new(FakeExchange::new())).unwrap();
        assert!(state.webhook_secret.is_none());
    }

    #[test]
    fn test_exchange_client_uses_default_endpoints() {
        let client = exchange_client(&Config::default()).unwrap();
        assert_eq!(
            client.config().token_endpoint.as_str(),
            "http://localhost:9000/oauth2/token"
        );
    }
}
