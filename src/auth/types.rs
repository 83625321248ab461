//! Core authorization data model
//!
//! Requirements, credentials, identities and the authorization context a
//! [`SessionAuthManager`](super::manager::SessionAuthManager) acts for.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolgateError};

/// Seconds before `expires_at` at which a credential stops being served,
/// capped at half the credential's lifetime.
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Upper bound applied to provider-reported lifetimes (one year).
const MAX_LIFETIME_SECONDS: u64 = 365 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// TokenKind / AuthRequirement
// ---------------------------------------------------------------------------

/// How a credential is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Acts on behalf of the session's end user; requires interactive consent
    #[default]
    Delegated,
    /// Acts as the agent's own identity; obtained without user interaction
    Machine,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Delegated => write!(f, "delegated"),
            TokenKind::Machine => write!(f, "machine"),
        }
    }
}

/// The credential a capability needs before it may run
///
/// Scopes are held in a sorted set, so two requirements listing the same
/// scopes in a different order compare equal and share cache entries.
///
/// # Examples
///
/// ```
/// use toolgate::auth::types::{AuthRequirement, TokenKind};
///
/// let a = AuthRequirement::new(["write", "read"], "booking_api", TokenKind::Delegated).unwrap();
/// let b = AuthRequirement::new(["read", "write"], "booking_api", TokenKind::Delegated).unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.scope_string(), "read write");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AuthRequirement {
    scopes: BTreeSet<String>,
    resource: String,
    kind: TokenKind,
}

impl AuthRequirement {
    /// Builds a requirement, rejecting an empty scope set or resource
    ///
    /// Scopes are trimmed and blank entries dropped before the emptiness
    /// check.
    ///
    /// # Errors
    ///
    /// Returns [`ToolgateError::Config`] when no scope or no resource is given.
    pub fn new<I, S>(scopes: I, resource: impl Into<String>, kind: TokenKind) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let scopes: BTreeSet<String> = scopes
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if scopes.is_empty() {
            return Err(ToolgateError::Config(
                "an authorization requirement needs at least one scope".to_string(),
            )
            .into());
        }

        let resource = resource.into().trim().to_string();
        if resource.is_empty() {
            return Err(ToolgateError::Config(
                "an authorization requirement needs a resource".to_string(),
            )
            .into());
        }

        Ok(Self {
            scopes,
            resource,
            kind,
        })
    }

    /// Shorthand for a [`TokenKind::Delegated`] requirement
    pub fn delegated<I, S>(scopes: I, resource: impl Into<String>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(scopes, resource, TokenKind::Delegated)
    }

    /// Shorthand for a [`TokenKind::Machine`] requirement
    pub fn machine<I, S>(scopes: I, resource: impl Into<String>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(scopes, resource, TokenKind::Machine)
    }

    /// The required scopes, sorted
    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    /// Space-separated scope string as sent to the identity provider
    pub fn scope_string(&self) -> String {
        self.scopes
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Target resource identifier
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Token kind
    pub fn kind(&self) -> TokenKind {
        self.kind
    }
}

impl fmt::Display for AuthRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} token for {} [{}]",
            self.kind,
            self.resource,
            self.scope_string()
        )
    }
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// A credential obtained for exactly one [`AuthRequirement`]
#[derive(Clone, Serialize)]
pub struct Credential {
    /// Opaque token value
    pub access_token: String,

    /// Token type, normally `"Bearer"`
    pub token_type: String,

    /// When the credential was obtained
    pub issued_at: DateTime<Utc>,

    /// When the provider says the credential expires; `None` means no expiry
    /// was reported
    pub expires_at: Option<DateTime<Utc>>,

    /// The requirement this credential satisfies
    pub requirement: AuthRequirement,
}

impl Credential {
    /// Creates a credential issued now
    ///
    /// `expires_in` is the lifetime in seconds reported by the token endpoint.
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_in: Option<u64>,
        requirement: AuthRequirement,
    ) -> Self {
        let issued_at = Utc::now();
        let expires_at = expires_in.and_then(|secs| {
            let secs = i64::try_from(secs.min(MAX_LIFETIME_SECONDS)).unwrap_or(0);
            issued_at.checked_add_signed(chrono::Duration::seconds(secs))
        });
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            issued_at,
            expires_at,
            requirement,
        }
    }

    /// Returns `true` once the credential is expired or within the skew
    /// buffer of expiring. Short-lived credentials get a skew of half
    /// their lifetime.
    ///
    /// # Examples
    ///
    /// ```
    /// use toolgate::auth::types::{AuthRequirement, Credential};
    ///
    /// let req = AuthRequirement::machine(["admin_read_bookings"], "booking_api").unwrap();
    /// assert!(!Credential::new("tok", "Bearer", Some(3600), req.clone()).is_expired());
    /// assert!(!Credential::new("tok", "Bearer", Some(10), req.clone()).is_expired());
    /// assert!(Credential::new("tok", "Bearer", Some(0), req.clone()).is_expired());
    /// assert!(!Credential::new("tok", "Bearer", None, req).is_expired());
    /// ```
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expiry check against an explicit clock reading
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => {
                let half_life = (expires_at - self.issued_at) / 2;
                let skew = chrono::Duration::seconds(EXPIRY_SKEW_SECONDS).min(half_life);
                now >= expires_at - skew
            }
        }
    }

    /// Exact match on scopes, resource and kind
    pub fn satisfies(&self, requirement: &AuthRequirement) -> bool {
        &self.requirement == requirement
    }

    /// Value for an `Authorization` header
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Inserts `Authorization: Bearer <token>` into a header map
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use toolgate::auth::types::{AuthRequirement, Credential};
    ///
    /// let req = AuthRequirement::delegated(["create_bookings"], "booking_api").unwrap();
    /// let credential = Credential::new("abc", "Bearer", None, req);
    /// let mut headers = HashMap::new();
    /// credential.inject(&mut headers);
    /// assert_eq!(headers.get("Authorization"), Some(&"Bearer abc".to_string()));
    /// ```
    pub fn inject(&self, headers: &mut HashMap<String, String>) {
        headers.insert("Authorization".to_string(), self.authorization_header());
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("requirement", &self.requirement)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Identities and context
// ---------------------------------------------------------------------------

/// Client id and secret presented to the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// OAuth client identifier
    pub client_id: String,
    /// OAuth client secret, absent for public clients
    pub client_secret: Option<String>,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// A registered agent identity
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Identifier registered with the identity provider
    #[serde(default)]
    pub agent_id: String,

    /// Human-readable agent name
    #[serde(default)]
    pub agent_name: String,

    /// Secret used for the non-interactive exchange
    #[serde(default)]
    pub agent_secret: String,
}

impl AgentIdentity {
    /// Creates an identity
    pub fn new(
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        agent_secret: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            agent_secret: agent_secret.into(),
        }
    }

    /// Credentials for the non-interactive exchange
    pub fn client_credentials(&self) -> ClientCredentials {
        ClientCredentials {
            client_id: self.agent_id.clone(),
            client_secret: if self.agent_secret.is_empty() {
                None
            } else {
                Some(self.agent_secret.clone())
            },
        }
    }

    /// Whether both id and secret are present
    pub fn is_configured(&self) -> bool {
        !self.agent_id.is_empty() && !self.agent_secret.is_empty()
    }
}

impl fmt::Debug for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentIdentity")
            .field("agent_id", &self.agent_id)
            .field("agent_name", &self.agent_name)
            .field("agent_secret", &"<redacted>")
            .finish()
    }
}

/// Who a manager obtains credentials for
///
/// Fixed when the manager is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationContext {
    /// On behalf of the end user of a live session
    Delegated {
        /// Owning session
        session_id: String,
        /// Agent acting in the session
        agent: AgentIdentity,
    },
    /// As the agent's own identity, outside any session
    Machine {
        /// Acting agent
        agent: AgentIdentity,
    },
}

impl AuthorizationContext {
    /// The principal used in cache keys: session id or agent id
    pub fn principal(&self) -> &str {
        match self {
            AuthorizationContext::Delegated { session_id, .. } => session_id,
            AuthorizationContext::Machine { agent } => &agent.agent_id,
        }
    }

    /// The acting agent
    pub fn agent(&self) -> &AgentIdentity {
        match self {
            AuthorizationContext::Delegated { agent, .. } => agent,
            AuthorizationContext::Machine { agent } => agent,
        }
    }

    /// Owning session, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            AuthorizationContext::Delegated { session_id, .. } => Some(session_id),
            AuthorizationContext::Machine { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// AuthRequestEvent
// ---------------------------------------------------------------------------

/// Pushed to a session when the user must approve a delegated credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequestEvent {
    /// Single-use correlator echoed back by the provider's redirect
    pub state: String,

    /// Where the user's browser must go
    pub auth_url: String,

    /// Human-readable reason shown to the user
    pub context: String,

    /// Requested scopes
    pub scopes: Vec<String>,

    /// Target resource
    pub resource: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_rejects_empty_scopes() {
        let result = AuthRequirement::delegated(Vec::<String>::new(), "booking_api");
        assert!(result.is_err());

        let blank = AuthRequirement::delegated(["  ", ""], "booking_api");
        assert!(blank.is_err());
    }

    #[test]
    fn test_requirement_rejects_empty_resource() {
        let result = AuthRequirement::machine(["admin_read_bookings"], " ");
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("resource"), "unexpected error: {msg}");
    }

    #[test]
    fn test_requirement_is_order_insensitive() {
        let a = AuthRequirement::delegated(["b", "a"], "api").unwrap();
        let b = AuthRequirement::delegated(["a", "b", "a"], "api").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.scopes().len(), 2);
    }

    #[test]
    fn test_requirement_kind_distinguishes() {
        let delegated = AuthRequirement::delegated(["read"], "api").unwrap();
        let machine = AuthRequirement::machine(["read"], "api").unwrap();
        assert_ne!(delegated, machine);
    }

    #[test]
    fn test_superset_credential_does_not_satisfy_narrower_requirement() {
        let wide = AuthRequirement::delegated(["read", "write"], "api").unwrap();
        let narrow = AuthRequirement::delegated(["read"], "api").unwrap();
        let credential = Credential::new("tok", "Bearer", Some(3600), wide.clone());
        assert!(credential.satisfies(&wide));
        assert!(!credential.satisfies(&narrow));
    }

    #[test]
    fn test_credential_expiry_uses_skew_buffer() {
        let req = AuthRequirement::delegated(["read"], "api").unwrap();
        let credential = Credential::new("tok", "Bearer", Some(120), req);
        assert!(!credential.is_expired());
        let later = Utc::now() + chrono::Duration::seconds(61);
        assert!(credential.is_expired_at(later));
    }

    #[test]
    fn test_short_lived_credential_skew_is_half_its_lifetime() {
        let req = AuthRequirement::delegated(["read"], "api").unwrap();
        let credential = Credential::new("tok", "Bearer", Some(30), req.clone());
        let issued = credential.issued_at;
        assert!(!credential.is_expired());
        assert!(!credential.is_expired_at(issued + chrono::Duration::seconds(14)));
        assert!(credential.is_expired_at(issued + chrono::Duration::seconds(15)));

        let credential = Credential::new("tok", "Bearer", Some(60), req);
        assert!(!credential.is_expired_at(credential.issued_at + chrono::Duration::seconds(29)));
        assert!(credential.is_expired_at(credential.issued_at + chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_credential_debug_redacts_token() {
        let req = AuthRequirement::delegated(["read"], "api").unwrap();
        let credential = Credential::new("super-secret-token", "Bearer", None, req);
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_agent_identity_client_credentials() {
        let agent = AgentIdentity::new("agent-1", "Booking Agent", "s3cret");
        let creds = agent.client_credentials();
        assert_eq!(creds.client_id, "agent-1");
        assert_eq!(creds.client_secret.as_deref(), Some("s3cret"));
        assert!(!format!("{agent:?}").contains("s3cret"));

        let public = AgentIdentity::new("agent-2", "Public", "");
        assert!(public.client_credentials().client_secret.is_none());
        assert!(!public.is_configured());
    }

    #[test]
    fn test_context_principal() {
        let agent = AgentIdentity::new("agent-1", "Agent", "secret");
        let delegated = AuthorizationContext::Delegated {
            session_id: "session-1".to_string(),
            agent: agent.clone(),
        };
        assert_eq!(delegated.principal(), "session-1");
        assert_eq!(delegated.session_id(), Some("session-1"));

        let machine = AuthorizationContext::Machine { agent };
        assert_eq!(machine.principal(), "agent-1");
        assert!(machine.session_id().is_none());
    }
}
