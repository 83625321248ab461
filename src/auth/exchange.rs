//! Credential acquisition against the identity provider's token endpoint
//!
//! Two protocols are supported:
//!
//! - authorization code exchange with PKCE (interactive, delegated), used
//!   once the provider redirects the user's browser back with a `code`;
//! - client credentials exchange (non-interactive, machine identity).
//!
//! Both POST a form to the token endpoint and include the target `resource`
//! (RFC 8707). The client holds no per-flow state; the PKCE verifier and the
//! requirement travel with each call.
//!
//! # References
//!
//! - RFC 6749 OAuth 2.0 <https://www.rfc-editor.org/rfc/rfc6749>
//! - RFC 7636 PKCE <https://www.rfc-editor.org/rfc/rfc7636>
//! - RFC 8707 Resource Indicators <https://www.rfc-editor.org/rfc/rfc8707>

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::auth::pkce;
use crate::auth::types::{AuthRequirement, ClientCredentials, Credential};
use crate::error::{AuthError, AuthResult};

// ---------------------------------------------------------------------------
// AuthorizationExchange
// ---------------------------------------------------------------------------

/// The boundary between the broker and the identity provider
///
/// Implementations report every failure as
/// [`AuthError::AuthorizationDenied`].
#[async_trait]
pub trait AuthorizationExchange: Send + Sync {
    /// Builds the URL the user's browser is sent to for consent
    fn authorization_url(
        &self,
        state: &str,
        code_challenge: &str,
        requirement: &AuthRequirement,
    ) -> AuthResult<String>;

    /// Exchanges an authorization code for a delegated credential
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        requirement: &AuthRequirement,
    ) -> AuthResult<Credential>;

    /// Obtains a machine credential with the given client credentials
    async fn exchange_client_credentials(
        &self,
        credentials: &ClientCredentials,
        requirement: &AuthRequirement,
    ) -> AuthResult<Credential>;
}

// ---------------------------------------------------------------------------
// Token endpoint responses (raw deserialization)
// ---------------------------------------------------------------------------

/// Successful token endpoint response.
#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    fn into_credential(self, requirement: &AuthRequirement) -> Credential {
        Credential::new(
            self.access_token,
            self.token_type,
            self.expires_in,
            requirement.clone(),
        )
    }
}

/// OAuth error body (RFC 6749 section 5.2).
#[derive(Debug, serde::Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

// ---------------------------------------------------------------------------
// HttpExchangeClient
// ---------------------------------------------------------------------------

/// Endpoints and application credentials for [`HttpExchangeClient`]
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Provider authorization endpoint (browser consent page)
    pub authorization_endpoint: Url,

    /// Provider token endpoint
    pub token_endpoint: Url,

    /// Redirect URI registered for the application; must route to the
    /// callback endpoint
    pub redirect_uri: String,

    /// Application client used for the authorization code exchange
    pub client: ClientCredentials,
}

/// [`AuthorizationExchange`] over HTTP with `reqwest`
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use url::Url;
/// use toolgate::auth::exchange::{ExchangeConfig, HttpExchangeClient};
/// use toolgate::auth::types::ClientCredentials;
///
/// let config = ExchangeConfig {
///     authorization_endpoint: Url::parse("https://idp.example.com/oauth2/authorize").unwrap(),
///     token_endpoint: Url::parse("https://idp.example.com/oauth2/token").unwrap(),
///     redirect_uri: "http://localhost:8000/callback".to_string(),
///     client: ClientCredentials {
///         client_id: "app".to_string(),
///         client_secret: None,
///     },
/// };
/// let client = HttpExchangeClient::new(Arc::new(reqwest::Client::new()), config);
/// ```
pub struct HttpExchangeClient {
    http: Arc<reqwest::Client>,
    config: ExchangeConfig,
}

impl HttpExchangeClient {
    /// Creates a client sharing `http`
    pub fn new(http: Arc<reqwest::Client>, config: ExchangeConfig) -> Self {
        Self { http, config }
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// POSTs `params` to the token endpoint and parses the response.
    async fn post_token_request(
        &self,
        params: &HashMap<&str, &str>,
        requirement: &AuthRequirement,
        grant: &str,
    ) -> AuthResult<Credential> {
        let resp = self
            .http
            .post(self.config.token_endpoint.clone())
            .form(params)
            .send()
            .await
            .map_err(|e| {
                AuthError::AuthorizationDenied(format!("{grant} request failed: {e}"))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {}", err.error, desc),
                    None => err.error,
                },
                Err(_) => format!("token endpoint returned {status}: {body}"),
            };
            tracing::warn!(grant, %status, resource = requirement.resource(), "Token exchange rejected");
            return Err(AuthError::AuthorizationDenied(reason));
        }

        let raw: TokenResponse = resp.json().await.map_err(|e| {
            AuthError::AuthorizationDenied(format!("failed to parse token response: {e}"))
        })?;

        Ok(raw.into_credential(requirement))
    }
}

#[async_trait]
impl AuthorizationExchange for HttpExchangeClient {
    fn authorization_url(
        &self,
        state: &str,
        code_challenge: &str,
        requirement: &AuthRequirement,
    ) -> AuthResult<String> {
        let mut url = self.config.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.config.client.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_uri);
            query.append_pair("scope", &requirement.scope_string());
            query.append_pair("state", state);
            query.append_pair("code_challenge", code_challenge);
            query.append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);
            query.append_pair("resource", requirement.resource());
        }
        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        requirement: &AuthRequirement,
    ) -> AuthResult<Credential> {
        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", &self.config.redirect_uri);
        params.insert("client_id", &self.config.client.client_id);
        params.insert("code_verifier", code_verifier);
        params.insert("resource", requirement.resource());
        if let Some(ref secret) = self.config.client.client_secret {
            params.insert("client_secret", secret);
        }

        self.post_token_request(&params, requirement, "authorization_code")
            .await
    }

    async fn exchange_client_credentials(
        &self,
        credentials: &ClientCredentials,
        requirement: &AuthRequirement,
    ) -> AuthResult<Credential> {
        let scope = requirement.scope_string();

        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("grant_type", "client_credentials");
        params.insert("client_id", &credentials.client_id);
        params.insert("scope", &scope);
        params.insert("resource", requirement.resource());
        if let Some(ref secret) = credentials.client_secret {
            params.insert("client_secret", secret);
        }

        self.post_token_request(&params, requirement, "client_credentials")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client() -> HttpExchangeClient {
        HttpExchangeClient::new(
            Arc::new(reqwest::Client::new()),
            ExchangeConfig {
                authorization_endpoint: Url::parse("https://idp.example.com/oauth2/authorize")
                    .unwrap(),
                token_endpoint: Url::parse("https://idp.example.com/oauth2/token").unwrap(),
                redirect_uri: "http://localhost:8000/callback".to_string(),
                client: ClientCredentials {
                    client_id: "app-client".to_string(),
                    client_secret: Some("app-secret".to_string()),
                },
            },
        )
    }

    #[test]
    fn test_authorization_url_contains_required_parameters() {
        let client = make_client();
        let req = AuthRequirement::delegated(["create_bookings"], "booking_api").unwrap();
        let url = client
            .authorization_url("state-123", "challenge-abc", &req)
            .unwrap();

        let parsed = Url::parse(&url).unwrap();
        let pairs: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("response_type").unwrap(), "code");
        assert_eq!(pairs.get("client_id").unwrap(), "app-client");
        assert_eq!(
            pairs.get("redirect_uri").unwrap(),
            "http://localhost:8000/callback"
        );
        assert_eq!(pairs.get("scope").unwrap(), "create_bookings");
        assert_eq!(pairs.get("state").unwrap(), "state-123");
        assert_eq!(pairs.get("code_challenge").unwrap(), "challenge-abc");
        assert_eq!(pairs.get("code_challenge_method").unwrap(), "S256");
        assert_eq!(pairs.get("resource").unwrap(), "booking_api");
    }

    #[test]
    fn test_authorization_url_never_contains_client_secret() {
        let client = make_client();
        let req = AuthRequirement::delegated(["create_bookings"], "booking_api").unwrap();
        let url = client.authorization_url("s", "c", &req).unwrap();
        assert!(!url.contains("app-secret"));
    }

    #[test]
    fn test_authorization_url_joins_scopes_with_space() {
        let client = make_client();
        let req = AuthRequirement::delegated(["write", "read"], "booking_api").unwrap();
        let url = client.authorization_url("s", "c", &req).unwrap();
        let parsed = Url::parse(&url).unwrap();
        let scope = parsed
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(scope, "read write");
    }

    #[test]
    fn test_token_response_defaults_token_type() {
        let raw: TokenResponse = serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(raw.token_type, "Bearer");
        assert!(raw.expires_in.is_none());
    }
}
