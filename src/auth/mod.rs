//! Tool authorization core
//!
//! # Module Layout
//!
//! - [`types`]       -- requirements, credentials, identities and contexts
//! - [`token_cache`] -- per-context store of unexpired credentials
//! - [`pkce`]        -- state tokens and PKCE `S256` challenges
//! - [`exchange`]    -- authorization code and client credentials exchanges
//! - [`registry`]    -- process-wide `state` correlation with expiry
//! - [`manager`]     -- per-session orchestration of all of the above
//! - [`fake`]        -- scriptable exchange for tests

pub mod exchange;
pub mod fake;
pub mod manager;
pub mod pkce;
pub mod registry;
pub mod token_cache;
pub mod types;

pub use exchange::{AuthorizationExchange, ExchangeConfig, HttpExchangeClient};
pub use manager::SessionAuthManager;
pub use registry::{PendingAuthorization, StateRegistry};
pub use token_cache::TokenCache;
pub use types::{
    AgentIdentity, AuthRequestEvent, AuthRequirement, AuthorizationContext, ClientCredentials,
    Credential, TokenKind,
};
