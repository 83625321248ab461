//! Toolgate - session-scoped tool authorization broker
//!
//! Lets an agent invoke tools that need a delegated user credential without
//! blocking anything but the invoking task. The credential is obtained
//! through an out-of-band browser redirect; the provider's callback, arriving
//! on an unrelated request, is correlated back to the exact session and
//! pending invocation by its state token. Headless agents use a second,
//! non-interactive path with their own machine identity.
//!
//! # Architecture
//!
//! - `auth`: token cache, exchange client, state registry and the per-session
//!   authorization manager
//! - `tools`: tool registry, the secure invocation wrapper and HTTP tools
//! - `session`: the arena of open sessions and callback routing
//! - `background`: the session-less machine-identity agent
//! - `server`: axum routes for the session channel, callback and webhook
//! - `config`, `cli`, `logging`, `error`: ambient plumbing
//!
//! # Example
//!
//! ```no_run
//! use toolgate::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("config/config.yaml")?;
//!     config.validate()?;
//!     toolgate::server::serve(config).await
//! }
//! ```

pub mod auth;
pub mod background;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tools;

// Re-export commonly used types
pub use auth::{AuthRequirement, Credential, SessionAuthManager, StateRegistry};
pub use background::BackgroundAgent;
pub use config::Config;
pub use error::{AuthError, AuthResult, Result, ToolgateError};
pub use session::SessionHub;
pub use tools::{SecureTool, ToolCatalog};
