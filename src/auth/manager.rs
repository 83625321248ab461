//! Session authorization manager
//!
//! One [`SessionAuthManager`] exists per authorization context: one per live
//! chat session (delegated, interactive) and one for the background agent
//! (machine identity only). It owns that context's [`TokenCache`] and turns
//! an [`AuthRequirement`] into a [`Credential`]:
//!
//! 1. A cached, unexpired credential for the exact requirement is returned
//!    immediately.
//! 2. Machine requirements go straight to the client credentials exchange.
//! 3. Delegated requirements register a pending authorization in the shared
//!    [`StateRegistry`], push an `auth_request` event to the session and
//!    suspend the caller until the callback completes the exchange, the wait
//!    times out, or the session closes.
//!
//! Concurrent callers asking for the same delegated requirement share one
//! pending authorization. Each in-flight requirement owns a `watch` channel
//! and every joined caller waits on it, so all of them observe the same
//! outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::exchange::AuthorizationExchange;
use crate::auth::pkce::{self, state_prefix};
use crate::auth::registry::{PendingAuthorization, StateRegistry};
use crate::auth::token_cache::TokenCache;
use crate::auth::types::{
    AgentIdentity, AuthRequestEvent, AuthRequirement, AuthorizationContext, Credential, TokenKind,
};
use crate::error::{AuthError, AuthResult};
use crate::protocol::SessionEvent;

/// Outcome slot shared by every caller waiting on one requirement
type Outcome = Option<AuthResult<Credential>>;

/// A delegated requirement currently waiting for user consent
struct InFlight {
    state: String,
    deadline: Instant,
    outcome: watch::Sender<Outcome>,
}

/// Obtains and caches credentials for one authorization context
pub struct SessionAuthManager {
    context: AuthorizationContext,
    cache: TokenCache,
    registry: Option<Arc<StateRegistry>>,
    exchange: Arc<dyn AuthorizationExchange>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    in_flight: Mutex<HashMap<AuthRequirement, InFlight>>,
    interactive_timeout: Duration,
    closed: CancellationToken,
}

impl SessionAuthManager {
    /// Creates the manager of a live chat session
    ///
    /// `events` is the session's outbound channel; `auth_request` events are
    /// pushed on it. Interactive waits give up after `interactive_timeout`.
    pub fn new_interactive(
        session_id: impl Into<String>,
        agent: AgentIdentity,
        exchange: Arc<dyn AuthorizationExchange>,
        registry: Arc<StateRegistry>,
        events: mpsc::UnboundedSender<SessionEvent>,
        interactive_timeout: Duration,
    ) -> Self {
        let context = AuthorizationContext::Delegated {
            session_id: session_id.into(),
            agent,
        };
        Self::build(
            context,
            exchange,
            Some(registry),
            Some(events),
            interactive_timeout,
        )
    }

    /// Creates a session-less manager acting as `agent`
    ///
    /// Delegated requirements always fail with
    /// [`AuthError::AuthorizationDenied`] here.
    pub fn new_machine(agent: AgentIdentity, exchange: Arc<dyn AuthorizationExchange>) -> Self {
        Self::build(
            AuthorizationContext::Machine { agent },
            exchange,
            None,
            None,
            Duration::ZERO,
        )
    }

    fn build(
        context: AuthorizationContext,
        exchange: Arc<dyn AuthorizationExchange>,
        registry: Option<Arc<StateRegistry>>,
        events: Option<mpsc::UnboundedSender<SessionEvent>>,
        interactive_timeout: Duration,
    ) -> Self {
        Self {
            cache: TokenCache::new(context.principal()),
            context,
            registry,
            exchange,
            events,
            in_flight: Mutex::new(HashMap::new()),
            interactive_timeout,
            closed: CancellationToken::new(),
        }
    }

    /// The context this manager acts for
    pub fn context(&self) -> &AuthorizationContext {
        &self.context
    }

    /// Owning session, `None` for the background context
    pub fn session_id(&self) -> Option<&str> {
        self.context.session_id()
    }

    /// The credential cache of this context
    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Number of delegated requirements waiting for consent
    pub fn pending_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Returns a credential satisfying `requirement`
    ///
    /// # Errors
    ///
    /// - [`AuthError::SessionClosed`] when the context is closed, or closes
    ///   while waiting
    /// - [`AuthError::AuthorizationTimeout`] when the user does not complete
    ///   consent in time
    /// - [`AuthError::AuthorizationDenied`] when the provider rejects the
    ///   exchange or interactive consent is impossible
    pub async fn acquire(&self, requirement: &AuthRequirement) -> AuthResult<Credential> {
        self.acquire_for(requirement, None).await
    }

    /// Like [`acquire`](Self::acquire), naming what the credential is for
    ///
    /// `purpose` (usually the tool name) is shown to the user in the
    /// `auth_request` prompt.
    pub async fn acquire_for(
        &self,
        requirement: &AuthRequirement,
        purpose: Option<&str>,
    ) -> AuthResult<Credential> {
        if self.closed.is_cancelled() {
            return Err(AuthError::SessionClosed);
        }
        if let Some(credential) = self.cache.get(requirement) {
            tracing::debug!(principal = self.context.principal(), requirement = %requirement, "Credential cache hit");
            return Ok(credential);
        }
        self.obtain(requirement, purpose).await
    }

    async fn obtain(
        &self,
        requirement: &AuthRequirement,
        purpose: Option<&str>,
    ) -> AuthResult<Credential> {
        match requirement.kind() {
            TokenKind::Machine => self.obtain_machine(requirement).await,
            TokenKind::Delegated => self.obtain_delegated(requirement, purpose).await,
        }
    }

    async fn obtain_machine(&self, requirement: &AuthRequirement) -> AuthResult<Credential> {
        let agent = self.context.agent();
        if agent.agent_id.is_empty() {
            return Err(AuthError::AuthorizationDenied(
                "no agent identity is configured for machine credentials".to_string(),
            ));
        }
        let credentials = agent.client_credentials();

        let result = tokio::select! {
            _ = self.closed.cancelled() => return Err(AuthError::SessionClosed),
            result = self.exchange.exchange_client_credentials(&credentials, requirement) => result,
        };

        match result {
            Ok(credential) => {
                // Hold the in-flight lock so a concurrent close cannot
                // interleave with the insert.
                let _guard = self.in_flight.lock();
                if self.closed.is_cancelled() {
                    return Err(AuthError::SessionClosed);
                }
                self.cache.insert(credential.clone());
                tracing::info!(agent_id = %agent.agent_id, requirement = %requirement, "Obtained machine credential");
                Ok(credential)
            }
            Err(err) => {
                let err = into_denial(err);
                tracing::warn!(agent_id = %agent.agent_id, requirement = %requirement, error = %err, "Machine credential exchange failed");
                Err(err)
            }
        }
    }

    async fn obtain_delegated(
        &self,
        requirement: &AuthRequirement,
        purpose: Option<&str>,
    ) -> AuthResult<Credential> {
        let (Some(events), Some(registry), Some(session_id)) = (
            self.events.as_ref(),
            self.registry.as_ref(),
            self.context.session_id(),
        ) else {
            return Err(AuthError::AuthorizationDenied(
                "interactive consent is not available without a session".to_string(),
            ));
        };

        let (rx, state, deadline) = {
            let mut in_flight = self.in_flight.lock();
            if self.closed.is_cancelled() {
                return Err(AuthError::SessionClosed);
            }
            // A completion may have landed while we were off the lock.
            if let Some(credential) = self.cache.get(requirement) {
                return Ok(credential);
            }

            if let Some(existing) = in_flight.get(requirement) {
                tracing::debug!(
                    session_id,
                    state = state_prefix(&existing.state),
                    "Joined pending authorization"
                );
                (
                    existing.outcome.subscribe(),
                    existing.state.clone(),
                    existing.deadline,
                )
            } else {
                let challenge = pkce::generate();
                let state = loop {
                    let candidate = pkce::generate_state();
                    if registry.put(
                        candidate.as_str(),
                        session_id,
                        requirement.clone(),
                        challenge.verifier.as_str(),
                    ) {
                        break candidate;
                    }
                };

                let auth_url =
                    match self
                        .exchange
                        .authorization_url(&state, &challenge.challenge, requirement)
                    {
                        Ok(url) => url,
                        Err(err) => {
                            registry.remove(&state);
                            return Err(into_denial(err));
                        }
                    };

                let event = AuthRequestEvent {
                    state: state.clone(),
                    auth_url,
                    context: prompt_context(requirement, purpose),
                    scopes: requirement.scopes().iter().cloned().collect(),
                    resource: requirement.resource().to_string(),
                };
                if events.send(SessionEvent::AuthRequest(event)).is_err() {
                    registry.remove(&state);
                    tracing::warn!(session_id, "Session channel closed before authorization request");
                    return Err(AuthError::SessionClosed);
                }

                let (tx, rx) = watch::channel(None);
                let deadline = Instant::now() + self.interactive_timeout;
                in_flight.insert(
                    requirement.clone(),
                    InFlight {
                        state: state.clone(),
                        deadline,
                        outcome: tx,
                    },
                );
                tracing::info!(
                    session_id,
                    state = state_prefix(&state),
                    requirement = %requirement,
                    "Requested user authorization"
                );
                (rx, state, deadline)
            }
        };

        self.wait_for_outcome(requirement, &state, deadline, rx)
            .await
    }

    async fn wait_for_outcome(
        &self,
        requirement: &AuthRequirement,
        state: &str,
        deadline: Instant,
        mut rx: watch::Receiver<Outcome>,
    ) -> AuthResult<Credential> {
        tokio::select! {
            changed = rx.wait_for(Option::is_some) => {
                return match changed {
                    Ok(outcome) => (*outcome).clone().unwrap_or(Err(AuthError::SessionClosed)),
                    Err(_) => Err(AuthError::SessionClosed),
                };
            }
            _ = tokio::time::sleep_until(deadline) => {}
            _ = self.closed.cancelled() => return Err(AuthError::SessionClosed),
        }

        self.expire(requirement, state);
        // A completion can race the deadline; prefer its outcome.
        let outcome = (*rx.borrow()).clone();
        outcome.unwrap_or(Err(AuthError::AuthorizationTimeout))
    }

    /// Gives up on the pending authorization for `requirement` if it is still
    /// the one identified by `state`
    fn expire(&self, requirement: &AuthRequirement, state: &str) {
        let mut in_flight = self.in_flight.lock();
        let is_current = in_flight
            .get(requirement)
            .is_some_and(|pending| pending.state == state);
        if !is_current {
            return;
        }
        if let Some(pending) = in_flight.remove(requirement) {
            if let Some(registry) = &self.registry {
                registry.remove(&pending.state);
            }
            pending
                .outcome
                .send_replace(Some(Err(AuthError::AuthorizationTimeout)));
            tracing::warn!(
                session_id = self.context.principal(),
                state = state_prefix(state),
                "Authorization timed out waiting for user consent"
            );
        }
    }

    /// Hands `result` to the waiters of the pending authorization `state`
    ///
    /// A successful credential is cached first. Returns `SessionClosed` when
    /// the context closed before the result arrived.
    fn resolve(
        &self,
        requirement: &AuthRequirement,
        state: &str,
        result: AuthResult<Credential>,
    ) -> AuthResult<Credential> {
        let mut in_flight = self.in_flight.lock();
        if self.closed.is_cancelled() {
            return Err(AuthError::SessionClosed);
        }
        if let Ok(credential) = &result {
            self.cache.insert(credential.clone());
        }
        let is_current = in_flight
            .get(requirement)
            .is_some_and(|pending| pending.state == state);
        if is_current {
            if let Some(pending) = in_flight.remove(requirement) {
                pending.outcome.send_replace(Some(result.clone()));
            }
        }
        result
    }

    /// Completes the pending authorization identified by `state`
    ///
    /// Consumes the registry entry, exchanges `code` and resumes every caller
    /// waiting on that requirement.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnknownOrExpiredState`] when `state` was never issued,
    ///   was already used, expired, or belongs to another session; no cache
    ///   is touched
    /// - [`AuthError::AuthorizationDenied`] when the exchange fails; waiters
    ///   observe the same error
    /// - [`AuthError::SessionClosed`] after [`close`](Self::close)
    pub async fn complete_interactive(&self, state: &str, code: &str) -> AuthResult<Credential> {
        let (Some(registry), Some(session_id)) = (self.registry.as_ref(), self.session_id()) else {
            return Err(AuthError::UnknownOrExpiredState);
        };
        let Some(pending) = registry.take_for_session(state, session_id) else {
            tracing::warn!(
                session_id,
                state = state_prefix(state),
                "Callback for unknown or expired state"
            );
            return Err(AuthError::UnknownOrExpiredState);
        };
        self.complete_pending(pending, code).await
    }

    /// Completes an authorization already taken from the registry
    ///
    /// Used by the callback handler, which resolves the owning session from
    /// the registry entry itself.
    pub async fn complete_pending(
        &self,
        pending: PendingAuthorization,
        code: &str,
    ) -> AuthResult<Credential> {
        if self.session_id() != Some(pending.session_id.as_str()) {
            return Err(AuthError::UnknownOrExpiredState);
        }
        if self.closed.is_cancelled() {
            return Err(AuthError::SessionClosed);
        }

        let result = tokio::select! {
            _ = self.closed.cancelled() => return Err(AuthError::SessionClosed),
            result = self.exchange.exchange_code(code, &pending.code_verifier, &pending.requirement) => {
                result.map_err(into_denial)
            }
        };

        match &result {
            Ok(_) => tracing::info!(
                session_id = %pending.session_id,
                state = state_prefix(&pending.state),
                requirement = %pending.requirement,
                "Authorization completed"
            ),
            Err(err) => tracing::warn!(
                session_id = %pending.session_id,
                state = state_prefix(&pending.state),
                error = %err,
                "Authorization code exchange failed"
            ),
        }

        self.resolve(&pending.requirement, &pending.state, result)
    }

    /// Fails the pending authorization with a provider-reported denial
    ///
    /// Called when the redirect carries an `error` instead of a `code`.
    pub fn deny_pending(&self, pending: PendingAuthorization, reason: impl Into<String>) -> AuthError {
        if self.session_id() != Some(pending.session_id.as_str()) {
            return AuthError::UnknownOrExpiredState;
        }
        let err = AuthError::AuthorizationDenied(reason.into());
        tracing::warn!(
            session_id = %pending.session_id,
            state = state_prefix(&pending.state),
            error = %err,
            "User authorization denied"
        );
        match self.resolve(&pending.requirement, &pending.state, Err(err.clone())) {
            Ok(_) => err,
            Err(resolved) => resolved,
        }
    }

    /// Closes the context
    ///
    /// Every waiter resumes with [`AuthError::SessionClosed`], every pending
    /// authorization of the session leaves the registry and the cache is
    /// cleared. Later calls to [`acquire`](Self::acquire) fail with
    /// `SessionClosed`. Calling `close` again does nothing.
    pub fn close(&self) {
        let drained: Vec<InFlight> = {
            let mut in_flight = self.in_flight.lock();
            if self.closed.is_cancelled() {
                return;
            }
            self.closed.cancel();
            self.cache.clear();
            in_flight.drain().map(|(_, pending)| pending).collect()
        };

        if let Some(registry) = &self.registry {
            for pending in &drained {
                registry.remove(&pending.state);
            }
            if let Some(session_id) = self.session_id() {
                registry.remove_session(session_id);
            }
        }
        let abandoned = drained.len();
        for pending in drained {
            pending
                .outcome
                .send_replace(Some(Err(AuthError::SessionClosed)));
        }
        tracing::info!(
            principal = self.context.principal(),
            abandoned,
            "Authorization context closed"
        );
    }
}

impl std::fmt::Debug for SessionAuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuthManager")
            .field("context", &self.context)
            .field("cached", &self.cache.len())
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Exchange implementations report denials, anything else is folded into one
fn into_denial(err: AuthError) -> AuthError {
    match err {
        AuthError::AuthorizationDenied(_) => err,
        other => AuthError::AuthorizationDenied(other.to_string()),
    }
}

fn prompt_context(requirement: &AuthRequirement, purpose: Option<&str>) -> String {
    match purpose {
        Some(purpose) => format!(
            "'{}' needs access to {} with scopes: {}",
            purpose,
            requirement.resource(),
            requirement.scope_string()
        ),
        None => format!(
            "Access to {} with scopes: {}",
            requirement.resource(),
            requirement.scope_string()
        ),
    }
}
