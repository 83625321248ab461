//! In-memory [`AuthorizationExchange`] for tests
//!
//! Records every exchange and returns programmable outcomes without any
//! network access. Delegated tokens are `delegated-<code>`, machine tokens
//! `machine-<client_id>`.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use crate::auth::exchange::AuthorizationExchange;
use crate::auth::types::{AuthRequirement, ClientCredentials, Credential};
use crate::error::{AuthError, AuthResult};

/// One recorded exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeCall {
    /// Authorization code exchange
    AuthorizationCode {
        /// Code from the callback
        code: String,
        /// PKCE verifier presented
        code_verifier: String,
        /// Requirement the credential was requested for
        requirement: AuthRequirement,
    },
    /// Client credentials exchange
    ClientCredentials {
        /// Client that authenticated
        client_id: String,
        /// Requirement the credential was requested for
        requirement: AuthRequirement,
    },
}

/// Scriptable exchange double
#[derive(Debug)]
pub struct FakeExchange {
    calls: Mutex<Vec<ExchangeCall>>,
    deny_code: Mutex<Option<String>>,
    deny_machine: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    expires_in: Mutex<Option<u64>>,
}

impl Default for FakeExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeExchange {
    /// Creates a fake that grants everything with a one hour lifetime
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            deny_code: Mutex::new(None),
            deny_machine: Mutex::new(None),
            delay: Mutex::new(None),
            expires_in: Mutex::new(Some(3600)),
        }
    }

    /// Makes authorization code exchanges fail with `reason`
    pub fn deny_code(&self, reason: impl Into<String>) {
        *self.deny_code.lock() = Some(reason.into());
    }

    /// Makes client credentials exchanges fail with `reason`
    pub fn deny_machine(&self, reason: impl Into<String>) {
        *self.deny_machine.lock() = Some(reason.into());
    }

    /// Delays every exchange by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Lifetime reported for issued credentials
    pub fn set_expires_in(&self, expires_in: Option<u64>) {
        *self.expires_in.lock() = expires_in;
    }

    /// Every exchange seen so far
    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.calls.lock().clone()
    }

    /// Number of authorization code exchanges
    pub fn code_exchanges(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ExchangeCall::AuthorizationCode { .. }))
            .count()
    }

    /// Number of client credentials exchanges
    pub fn machine_exchanges(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ExchangeCall::ClientCredentials { .. }))
            .count()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AuthorizationExchange for FakeExchange {
    fn authorization_url(
        &self,
        state: &str,
        code_challenge: &str,
        requirement: &AuthRequirement,
    ) -> AuthResult<String> {
        let mut url = Url::parse("https://idp.test/authorize")
            .map_err(|e| AuthError::AuthorizationDenied(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("scope", &requirement.scope_string())
            .append_pair("resource", requirement.resource());
        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        requirement: &AuthRequirement,
    ) -> AuthResult<Credential> {
        self.calls.lock().push(ExchangeCall::AuthorizationCode {
            code: code.to_string(),
            code_verifier: code_verifier.to_string(),
            requirement: requirement.clone(),
        });
        self.pause().await;

        let denial = self.deny_code.lock().clone();
        if let Some(reason) = denial {
            return Err(AuthError::AuthorizationDenied(reason));
        }
        let expires_in = *self.expires_in.lock();
        Ok(Credential::new(
            format!("delegated-{code}"),
            "Bearer",
            expires_in,
            requirement.clone(),
        ))
    }

    async fn exchange_client_credentials(
        &self,
        credentials: &ClientCredentials,
        requirement: &AuthRequirement,
    ) -> AuthResult<Credential> {
        self.calls.lock().push(ExchangeCall::ClientCredentials {
            client_id: credentials.client_id.clone(),
            requirement: requirement.clone(),
        });
        self.pause().await;

        let denial = self.deny_machine.lock().clone();
        if let Some(reason) = denial {
            return Err(AuthError::AuthorizationDenied(reason));
        }
        let expires_in = *self.expires_in.lock();
        Ok(Credential::new(
            format!("machine-{}", credentials.client_id),
            "Bearer",
            expires_in,
            requirement.clone(),
        ))
    }
}
