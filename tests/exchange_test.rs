//! Token endpoint integration tests using wiremock
//!
//! Verifies the form parameters `HttpExchangeClient` sends for both grants,
//! that the `resource` parameter (RFC 8707) is always present, and that
//! error responses become `AuthorizationDenied`.

use std::sync::Arc;

use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use toolgate::auth::exchange::{AuthorizationExchange, ExchangeConfig, HttpExchangeClient};
use toolgate::auth::pkce;
use toolgate::auth::types::{AuthRequirement, ClientCredentials};
use toolgate::error::AuthError;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_client(base_url: &str) -> HttpExchangeClient {
    HttpExchangeClient::new(
        Arc::new(reqwest::Client::new()),
        ExchangeConfig {
            authorization_endpoint: Url::parse(&format!("{}/authorize", base_url)).unwrap(),
            token_endpoint: Url::parse(&format!("{}/token", base_url)).unwrap(),
            redirect_uri: "http://localhost:8000/callback".to_string(),
            client: ClientCredentials {
                client_id: "app-client".to_string(),
                client_secret: Some("app-secret".to_string()),
            },
        },
    )
}

fn token_body(token: &str) -> serde_json::Value {
    serde_json::json!({
        "access_token": token,
        "token_type": "Bearer",
        "expires_in": 3600
    })
}

// ---------------------------------------------------------------------------
// Authorization code grant
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_code_exchange_sends_verifier_and_resource() {
    let server = MockServer::start().await;
    let challenge = pkce::generate();

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=xyz"))
        .and(body_string_contains(format!(
            "code_verifier={}",
            challenge.verifier
        )))
        .and(body_string_contains("resource=booking_api"))
        .and(body_string_contains("client_secret=app-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("delegated-token")))
        .expect(1)
        .mount(&server)
        .await;

    let client = make_client(&server.uri());
    let requirement = AuthRequirement::delegated(["create_bookings"], "booking_api").unwrap();
    let credential = client
        .exchange_code("xyz", &challenge.verifier, &requirement)
        .await
        .expect("exchange should succeed");

    assert_eq!(credential.access_token, "delegated-token");
    assert_eq!(credential.token_type, "Bearer");
    assert!(credential.satisfies(&requirement));
    assert!(!credential.is_expired());
}

#[tokio::test]
async fn test_code_exchange_error_body_becomes_denial() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "code already used"
        })))
        .mount(&server)
        .await;

    let client = make_client(&server.uri());
    let requirement = AuthRequirement::delegated(["create_bookings"], "booking_api").unwrap();
    let err = client
        .exchange_code("used", "verifier", &requirement)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        AuthError::AuthorizationDenied("invalid_grant: code already used".to_string())
    );
}

#[tokio::test]
async fn test_unparseable_success_body_is_denial() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = make_client(&server.uri());
    let requirement = AuthRequirement::delegated(["create_bookings"], "booking_api").unwrap();
    let err = client
        .exchange_code("xyz", "verifier", &requirement)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "authorization_denied");
}

// ---------------------------------------------------------------------------
// Client credentials grant
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_client_credentials_sends_agent_identity_and_scopes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=agent-bg"))
        .and(body_string_contains("client_secret=bg-secret"))
        .and(body_string_contains("scope=admin_read_bookings+admin_update_bookings"))
        .and(body_string_contains("resource=booking_api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("machine-token")))
        .expect(1)
        .mount(&server)
        .await;

    let client = make_client(&server.uri());
    let requirement = AuthRequirement::machine(
        ["admin_update_bookings", "admin_read_bookings"],
        "booking_api",
    )
    .unwrap();
    let credentials = ClientCredentials {
        client_id: "agent-bg".to_string(),
        client_secret: Some("bg-secret".to_string()),
    };

    let credential = client
        .exchange_client_credentials(&credentials, &requirement)
        .await
        .expect("machine exchange should succeed");
    assert_eq!(credential.access_token, "machine-token");
}

#[tokio::test]
async fn test_client_credentials_server_error_is_denial() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let client = make_client(&server.uri());
    let requirement = AuthRequirement::machine(["admin_read_staff"], "booking_api").unwrap();
    let credentials = ClientCredentials {
        client_id: "agent-bg".to_string(),
        client_secret: None,
    };

    match client
        .exchange_client_credentials(&credentials, &requirement)
        .await
    {
        Err(AuthError::AuthorizationDenied(reason)) => {
            assert!(reason.contains("500"));
            assert!(reason.contains("upstream down"));
        }
        other => panic!("expected denial, got {:?}", other.map(|c| c.token_type)),
    }
}
