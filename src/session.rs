//! Live session arena
//!
//! The [`SessionHub`] owns every open session, indexed by its opaque id. A
//! session is created when its channel connects and destroyed when it
//! disconnects; destroying it closes its [`SessionAuthManager`], which
//! releases its pending authorizations and cached credentials.
//!
//! The hub is also where provider callbacks land: the state token is
//! resolved through the shared [`StateRegistry`] to the owning session, and
//! that session's manager completes the exchange.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::auth::exchange::AuthorizationExchange;
use crate::auth::manager::SessionAuthManager;
use crate::auth::pkce::state_prefix;
use crate::auth::registry::StateRegistry;
use crate::auth::types::{AgentIdentity, Credential};
use crate::error::{auth_error_of, AuthError, AuthResult, Result, ToolgateError};
use crate::protocol::SessionEvent;
use crate::tools::catalog::SessionToolset;
use crate::tools::ToolRegistry;

/// One open session
pub struct SessionHandle {
    id: String,
    manager: Arc<SessionAuthManager>,
    tools: ToolRegistry,
    events: mpsc::UnboundedSender<SessionEvent>,
    opened_at: DateTime<Utc>,
}

impl SessionHandle {
    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The session's authorization manager
    pub fn manager(&self) -> &Arc<SessionAuthManager> {
        &self.manager
    }

    /// Tools available in this session
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// When the session was opened
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Pushes an event to the client; `false` once the channel is gone
    pub fn send(&self, event: SessionEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// The `tools` event listing this session's tool definitions
    pub fn list_tools(&self) -> SessionEvent {
        SessionEvent::Tools {
            tools: self.tools.all_definitions(),
        }
    }

    /// Runs one tool and reports the outcome as a `tool_result` event
    ///
    /// Never fails: unknown tools, capability errors and authorization
    /// failures all become unsuccessful results, the latter tagged with
    /// [`AuthError::kind`].
    pub async fn invoke(&self, id: Option<String>, tool: &str, args: Value) -> SessionEvent {
        let Some(executor) = self.tools.get(tool) else {
            return SessionEvent::ToolResult {
                id,
                tool: tool.to_string(),
                success: false,
                output: None,
                error: Some(ToolgateError::UnknownTool(tool.to_string()).to_string()),
                error_kind: None,
            };
        };

        match executor.execute(args).await {
            Ok(result) => {
                tracing::debug!(session_id = %self.id, tool, success = result.success, "Tool finished");
                SessionEvent::ToolResult {
                    id,
                    tool: tool.to_string(),
                    success: result.success,
                    output: result.success.then_some(result.output),
                    error: result.error,
                    error_kind: None,
                }
            }
            Err(err) => {
                let error_kind = auth_error_of(&err).map(|auth| auth.kind().to_string());
                tracing::warn!(session_id = %self.id, tool, error = %err, "Tool invocation failed");
                SessionEvent::ToolResult {
                    id,
                    tool: tool.to_string(),
                    success: false,
                    output: None,
                    error: Some(err.to_string()),
                    error_kind,
                }
            }
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("tools", &self.tools)
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

/// Arena of open sessions plus callback routing
pub struct SessionHub {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    registry: Arc<StateRegistry>,
    exchange: Arc<dyn AuthorizationExchange>,
    agent: AgentIdentity,
    toolset: Arc<dyn SessionToolset>,
    interactive_timeout: Duration,
}

impl SessionHub {
    /// Creates an empty hub
    pub fn new(
        registry: Arc<StateRegistry>,
        exchange: Arc<dyn AuthorizationExchange>,
        agent: AgentIdentity,
        toolset: Arc<dyn SessionToolset>,
        interactive_timeout: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            registry,
            exchange,
            agent,
            toolset,
            interactive_timeout,
        }
    }

    /// The shared state registry
    pub fn registry(&self) -> &Arc<StateRegistry> {
        &self.registry
    }

    /// Opens a session
    ///
    /// Uses `requested_id` when given and non-empty, otherwise a fresh
    /// UUID. `events` is the session's outbound channel.
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Session`] when the id is already open, or
    /// the toolset's error when the tools cannot be built.
    pub fn open_session(
        &self,
        requested_id: Option<String>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<SessionHandle>> {
        let id = requested_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut sessions = self.sessions.write();
        if sessions.contains_key(&id) {
            return Err(ToolgateError::Session(format!("Session already open: {}", id)).into());
        }

        let manager = Arc::new(SessionAuthManager::new_interactive(
            id.as_str(),
            self.agent.clone(),
            self.exchange.clone(),
            self.registry.clone(),
            events.clone(),
            self.interactive_timeout,
        ));
        let tools = self.toolset.build(&manager)?;

        let handle = Arc::new(SessionHandle {
            id: id.clone(),
            manager,
            tools,
            events,
            opened_at: Utc::now(),
        });
        sessions.insert(id.clone(), handle.clone());
        tracing::info!(session_id = %id, tools = handle.tools.len(), "Session opened");
        Ok(handle)
    }

    /// Closes and forgets a session
    ///
    /// Returns `false` when no such session was open.
    pub fn close_session(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(handle) => {
                handle.manager.close();
                tracing::info!(session_id = %id, "Session closed");
                true
            }
            None => false,
        }
    }

    /// Closes every session
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<SessionHandle>> =
            self.sessions.write().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.manager.close();
        }
        drained.len()
    }

    /// Looks up an open session
    pub fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(id).cloned()
    }

    /// Ids of open sessions
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Number of open sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is open
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Completes the authorization identified by `state` with `code`
    ///
    /// The registry entry is consumed before anything else happens, so a
    /// replayed callback fails even while the first is still exchanging.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnknownOrExpiredState`]: no session is touched
    /// - [`AuthError::SessionClosed`]: the owning session is gone
    /// - [`AuthError::AuthorizationDenied`]: the exchange failed; the waiting
    ///   invocation observes the same error
    pub async fn handle_callback(&self, state: &str, code: &str) -> AuthResult<Credential> {
        let Some(pending) = self.registry.take_if_present(state) else {
            tracing::warn!(state = state_prefix(state), "Callback with unknown or expired state");
            return Err(AuthError::UnknownOrExpiredState);
        };
        let Some(session) = self.get(&pending.session_id) else {
            tracing::warn!(
                session_id = %pending.session_id,
                state = state_prefix(state),
                "Callback for a session that is no longer open"
            );
            return Err(AuthError::SessionClosed);
        };
        session.manager.complete_pending(pending, code).await
    }

    /// Fails the authorization identified by `state` with a provider error
    ///
    /// Returns the error the waiting invocation observes.
    pub fn handle_callback_error(&self, state: &str, reason: &str) -> AuthError {
        let Some(pending) = self.registry.take_if_present(state) else {
            tracing::warn!(state = state_prefix(state), "Provider error for unknown or expired state");
            return AuthError::UnknownOrExpiredState;
        };
        match self.get(&pending.session_id) {
            Some(session) => session.manager.deny_pending(pending, reason),
            None => AuthError::SessionClosed,
        }
    }
}

impl std::fmt::Debug for SessionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHub")
            .field("sessions", &self.len())
            .field("pending_authorizations", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::fake::FakeExchange;
    use crate::auth::types::{AuthRequestEvent, AuthRequirement};
    use crate::tools::catalog::ToolCatalog;
    use crate::tools::{capability_fn, ToolResult};
    use serde_json::json;

    fn booking() -> AuthRequirement {
        AuthRequirement::delegated(["create_bookings"], "booking_api").unwrap()
    }

    fn hub_with(exchange: Arc<FakeExchange>, timeout: Duration) -> SessionHub {
        let catalog = ToolCatalog::new()
            .with(
                "create_booking",
                "Book a room",
                capability_fn(|args, credential| async move {
                    let token = credential.map(|c| c.access_token).unwrap_or_default();
                    Ok(ToolResult::success(format!("booked {} with {}", args["hotel_id"], token)))
                }),
                Some(booking()),
            )
            .unwrap();
        SessionHub::new(
            Arc::new(StateRegistry::new(Duration::from_secs(600))),
            exchange,
            AgentIdentity::new("agent-1", "Booking Agent", "secret"),
            Arc::new(catalog),
            timeout,
        )
    }

    async fn auth_request(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> AuthRequestEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("event expected")
                .expect("channel open");
            if let SessionEvent::AuthRequest(request) = event {
                return request;
            }
        }
    }

    #[test]
    fn test_open_generates_id_and_rejects_duplicates() {
        let hub = hub_with(Arc::new(FakeExchange::new()), Duration::from_secs(5));
        let (tx, _rx) = mpsc::unbounded_channel();

        let generated = hub.open_session(None, tx.clone()).unwrap();
        assert_eq!(generated.id().len(), 36);

        hub.open_session(Some("s-1".to_string()), tx.clone()).unwrap();
        assert!(hub.open_session(Some("s-1".to_string()), tx).is_err());
        assert_eq!(hub.len(), 2);
    }

    #[tokio::test]
    async fn test_callback_resumes_invocation_in_owning_session() {
        let exchange = Arc::new(FakeExchange::new());
        let hub = Arc::new(hub_with(exchange.clone(), Duration::from_secs(5)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = hub.open_session(Some("s-1".to_string()), tx).unwrap();

        let invocation = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .invoke(Some("1".to_string()), "create_booking", json!({"hotel_id": 7}))
                    .await
            })
        };

        let request = auth_request(&mut rx).await;
        let credential = hub.handle_callback(&request.state, "xyz").await.unwrap();
        assert_eq!(credential.access_token, "delegated-xyz");

        match invocation.await.unwrap() {
            SessionEvent::ToolResult {
                id, success, output, ..
            } => {
                assert_eq!(id.as_deref(), Some("1"));
                assert!(success);
                assert_eq!(output.as_deref(), Some("booked 7 with delegated-xyz"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(session.manager().cache().get(&booking()).is_some());
    }

    #[tokio::test]
    async fn test_unknown_state_touches_no_session() {
        let exchange = Arc::new(FakeExchange::new());
        let hub = hub_with(exchange.clone(), Duration::from_secs(5));
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = hub.open_session(Some("s-1".to_string()), tx).unwrap();

        let err = hub
            .handle_callback("expired-or-unknown", "xyz")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::UnknownOrExpiredState);
        assert!(exchange.calls().is_empty());
        assert!(session.manager().cache().is_empty());
    }

    #[tokio::test]
    async fn test_closing_session_fails_waiter_and_releases_state() {
        let hub = Arc::new(hub_with(Arc::new(FakeExchange::new()), Duration::from_secs(30)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = hub.open_session(Some("s-1".to_string()), tx).unwrap();

        let invocation = {
            let session = session.clone();
            tokio::spawn(async move { session.invoke(None, "create_booking", json!({})).await })
        };
        let request = auth_request(&mut rx).await;
        assert_eq!(hub.registry().len(), 1);

        assert!(hub.close_session("s-1"));
        match invocation.await.unwrap() {
            SessionEvent::ToolResult {
                success, error_kind, ..
            } => {
                assert!(!success);
                assert_eq!(error_kind.as_deref(), Some("session_closed"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(hub.registry().is_empty());

        let late = hub.handle_callback(&request.state, "xyz").await.unwrap_err();
        assert_eq!(late, AuthError::UnknownOrExpiredState);
        assert!(!hub.close_session("s-1"));
    }

    #[tokio::test]
    async fn test_callback_for_vanished_session_is_session_closed() {
        let hub = hub_with(Arc::new(FakeExchange::new()), Duration::from_secs(5));
        hub.registry().put("orphan", "gone", booking(), "verifier");

        let err = hub.handle_callback("orphan", "xyz").await.unwrap_err();
        assert_eq!(err, AuthError::SessionClosed);
    }

    #[tokio::test]
    async fn test_provider_error_denies_waiter() {
        let hub = Arc::new(hub_with(Arc::new(FakeExchange::new()), Duration::from_secs(5)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = hub.open_session(None, tx).unwrap();

        let invocation = {
            let session = session.clone();
            tokio::spawn(async move { session.invoke(None, "create_booking", json!({})).await })
        };
        let request = auth_request(&mut rx).await;

        let err = hub.handle_callback_error(&request.state, "access_denied");
        assert_eq!(err.kind(), "authorization_denied");
        match invocation.await.unwrap() {
            SessionEvent::ToolResult { error_kind, .. } => {
                assert_eq!(error_kind.as_deref(), Some("authorization_denied"))
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let hub = hub_with(Arc::new(FakeExchange::new()), Duration::from_secs(5));
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = hub.open_session(None, tx).unwrap();

        match session.invoke(None, "nope", json!({})).await {
            SessionEvent::ToolResult { success, error, .. } => {
                assert!(!success);
                assert!(error.unwrap().contains("Unknown tool"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_close_all() {
        let hub = hub_with(Arc::new(FakeExchange::new()), Duration::from_secs(5));
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = hub.open_session(None, tx.clone()).unwrap();
        hub.open_session(None, tx).unwrap();

        assert_eq!(hub.close_all(), 2);
        assert!(hub.is_empty());
        assert!(a.manager().is_closed());
    }
}
