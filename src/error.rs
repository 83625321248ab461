//! Error types for Toolgate
//!
//! Two layers live here. [`AuthError`] is the closed taxonomy of
//! authorization outcomes that a single tool invocation can observe; it is
//! `Clone` because one outcome is fanned out to every invocation waiting on
//! the same pending authorization. [`ToolgateError`] is the crate-wide error
//! enum used by configuration, tools and the HTTP surface.

use thiserror::Error;

/// Terminal authorization failures observed by a single invocation
///
/// None of these are retried inside the broker. Retrying is a decision for
/// whoever issued the invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The callback state was never issued, was already consumed, or expired.
    ///
    /// Replay and expiry deliberately share this variant.
    #[error("Unknown or expired authorization state")]
    UnknownOrExpiredState,

    /// The identity provider rejected the exchange
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// No callback arrived within the interactive wait window
    #[error("Authorization timed out waiting for user consent")]
    AuthorizationTimeout,

    /// The owning session ended while the invocation was waiting
    #[error("Session closed before authorization completed")]
    SessionClosed,

    /// A background task exceeded its overall deadline
    #[error("Background task exceeded its deadline of {seconds} seconds")]
    TaskTimeout {
        /// The configured deadline
        seconds: u64,
    },
}

impl AuthError {
    /// Stable snake_case identifier used on the wire
    ///
    /// # Examples
    ///
    /// ```
    /// use toolgate::error::AuthError;
    ///
    /// assert_eq!(AuthError::SessionClosed.kind(), "session_closed");
    /// ```
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::UnknownOrExpiredState => "unknown_or_expired_state",
            AuthError::AuthorizationDenied(_) => "authorization_denied",
            AuthError::AuthorizationTimeout => "authorization_timeout",
            AuthError::SessionClosed => "session_closed",
            AuthError::TaskTimeout { .. } => "task_timeout",
        }
    }
}

/// Result alias for the authorization core
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Main error type for Toolgate operations
#[derive(Error, Debug)]
pub enum ToolgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Capability execution errors
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Requested tool is not registered for the session
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Session lifecycle errors
    #[error("Session error: {0}")]
    Session(String),

    /// Authorization failures, passed through unchanged
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Toolgate operations
///
/// Uses `anyhow::Error` so application code can attach context freely.
/// Authorization failures can be recovered with
/// `err.downcast_ref::<AuthError>()`.
pub type Result<T> = anyhow::Result<T>;

/// Finds the [`AuthError`] carried by an `anyhow` error, if any
///
/// Looks through both a bare `AuthError` and one wrapped in
/// [`ToolgateError::Auth`].
pub fn auth_error_of(err: &anyhow::Error) -> Option<&AuthError> {
    if let Some(auth) = err.downcast_ref::<AuthError>() {
        return Some(auth);
    }
    match err.downcast_ref::<ToolgateError>() {
        Some(ToolgateError::Auth(auth)) => Some(auth),
        _ => None,
    }
}
