//! Background job trigger
//!
//! `POST /webhook/auto-assign` answers right away and runs the configured
//! job on the background agent in a spawned task.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::AppState;

/// The only event type this webhook accepts
pub const AUTO_ASSIGN_EVENT: &str = "booking.auto_assign_requested";

/// Webhook payload
#[derive(Debug, Clone, Deserialize)]
pub struct AutoAssignWebhook {
    /// Must be [`AUTO_ASSIGN_EVENT`]
    pub event_type: String,
    /// Booking to act on
    #[serde(deserialize_with = "id_string")]
    pub booking_id: String,
    /// Hotel of the booking
    #[serde(default, deserialize_with = "id_string")]
    pub hotel_id: String,
    /// User who made the booking
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_priority() -> String {
    "normal".to_string()
}

fn default_source() -> String {
    "hotel_api".to_string()
}

/// Accepts ids sent either as strings or as numbers
fn id_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected a string or number id, got {}",
            other
        ))),
    }
}

impl AutoAssignWebhook {
    /// Placeholder values for the job's step arguments
    pub fn vars(&self) -> HashMap<String, String> {
        HashMap::from([
            ("booking_id".to_string(), self.booking_id.clone()),
            ("hotel_id".to_string(), self.hotel_id.clone()),
            ("user_id".to_string(), self.user_id.clone()),
            ("priority".to_string(), self.priority.clone()),
        ])
    }
}

/// Webhook answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub task_id: String,
    /// `queued` or `disabled`
    pub status: String,
    pub message: String,
    /// RFC 3339 timestamp, empty when nothing was queued
    pub estimated_completion: String,
}

/// Queues the auto-assign job
pub async fn auto_assign_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AutoAssignWebhook>,
) -> Response {
    // An enabled agent is never reachable without a configured secret.
    let authorized = match state.webhook_secret.as_deref() {
        Some(secret) => bearer_matches(&headers, secret),
        None => state.background.is_none(),
    };
    if !authorized {
        tracing::warn!(booking_id = %payload.booking_id, "Webhook rejected: bad credentials");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid webhook credentials"})),
        )
            .into_response();
    }

    let Some(agent) = state.background.clone() else {
        tracing::info!(booking_id = %payload.booking_id, "Background agent disabled, skipping auto-assignment");
        return Json(WebhookResponse {
            task_id: "disabled".to_string(),
            status: "disabled".to_string(),
            message: "Background agent auto-assignment is disabled".to_string(),
            estimated_completion: String::new(),
        })
        .into_response();
    };

    if payload.event_type != AUTO_ASSIGN_EVENT {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Invalid event type: {}", payload.event_type)})),
        )
            .into_response();
    }

    let task_id = uuid::Uuid::new_v4().to_string();
    let estimated_completion = (Utc::now() + chrono::Duration::minutes(3)).to_rfc3339();
    let vars = payload.vars();

    let job_id = task_id.clone();
    tokio::spawn(async move {
        if let Err(err) = agent.run_job(&job_id, &vars).await {
            tracing::error!(task_id = %job_id, error = %err, "Background job failed");
        }
    });

    tracing::info!(
        task_id = %task_id,
        booking_id = %payload.booking_id,
        source = %payload.source,
        "Auto-assignment task queued"
    );
    Json(WebhookResponse {
        task_id,
        status: "queued".to_string(),
        message: "Background agent task queued for contact person assignment".to_string(),
        estimated_completion,
    })
    .into_response()
}

fn bearer_matches(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| secret_eq(token, secret))
}

/// Compares digests so the timing does not depend on the secret
fn secret_eq(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented.as_slice().ct_eq(expected.as_slice()).into()
}
