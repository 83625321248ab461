//! Identity provider redirect endpoint
//!
//! The callback arrives on a request unrelated to any session. Its `state`
//! is the only link back to the waiting invocation.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;

use super::AppState;
use crate::auth::pkce::state_prefix;
use crate::error::AuthError;

/// Query parameters of `/callback`
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    /// Authorization code
    pub code: Option<String>,
    /// Correlation state issued with the authorization URL
    pub state: Option<String>,
    /// Provider error code, e.g. `access_denied`
    pub error: Option<String>,
    /// Human-readable provider error
    pub error_description: Option<String>,
}

/// HTTP status reported for an authorization failure
pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::UnknownOrExpiredState => StatusCode::BAD_REQUEST,
        AuthError::AuthorizationDenied(_) => StatusCode::BAD_GATEWAY,
        AuthError::SessionClosed => StatusCode::GONE,
        AuthError::AuthorizationTimeout | AuthError::TaskTimeout { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
    }
}

/// Completes the pending authorization named by `state`
pub async fn callback_handler(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(auth_state) = query.state.as_deref().filter(|s| !s.is_empty()) else {
        return page(StatusCode::BAD_REQUEST, "Authorization failed", "Missing state parameter.");
    };

    if let Some(error) = query.error.as_deref() {
        let reason = match query.error_description.as_deref() {
            Some(description) => format!("{}: {}", error, description),
            None => error.to_string(),
        };
        tracing::warn!(state = state_prefix(auth_state), error, "Provider returned an error");
        let err = state.hub.handle_callback_error(auth_state, &reason);
        return failure_page(&err);
    }

    let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
        return page(StatusCode::BAD_REQUEST, "Authorization failed", "Missing code parameter.");
    };

    match state.hub.handle_callback(auth_state, code).await {
        Ok(credential) => {
            let scopes = credential.requirement.scope_string();
            page(
                StatusCode::OK,
                "Authorization successful",
                &format!(
                    "Access to {} ({}) was granted. You can close this window and return to the assistant.",
                    credential.requirement.resource(),
                    scopes
                ),
            )
        }
        Err(err) => failure_page(&err),
    }
}

fn failure_page(err: &AuthError) -> Response {
    page(status_for(err), "Authorization failed", &err.to_string())
}

fn page(status: StatusCode, title: &str, detail: &str) -> Response {
    let body = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>{title}</title>
</head>
<body style="text-align: center; font-family: sans-serif; margin-top: 50px;">
    <h2>{title}</h2>
    <p>{detail}</p>
</body>
</html>"#,
        title = escape_html(title),
        detail = escape_html(detail),
    );
    (status, Html(body)).into_response()
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
