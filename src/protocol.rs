//! Session channel messages
//!
//! Everything sent over the `/chat` WebSocket is JSON tagged with a `type`
//! field. [`SessionEvent`] flows server to client, [`ClientMessage`] client
//! to server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::types::AuthRequestEvent;

/// Outbound event pushed to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Informational text, e.g. the welcome banner
    Message {
        /// Text to display
        content: String,
    },

    /// The user must approve a delegated credential in the browser
    AuthRequest(AuthRequestEvent),

    /// Outcome of one tool invocation
    ToolResult {
        /// Client-supplied invocation id, echoed back
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Tool that was invoked
        tool: String,
        /// Whether the tool ran and succeeded
        success: bool,
        /// Tool output on success
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        /// Error text on failure
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Stable error identifier for authorization failures
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
    },

    /// Tool definitions available to the session
    Tools {
        /// One JSON definition per tool
        tools: Vec<Value>,
    },

    /// The client sent something the server could not process
    Error {
        /// Description of the problem
        message: String,
    },
}

impl SessionEvent {
    /// Builds a [`SessionEvent::Message`]
    pub fn message(content: impl Into<String>) -> Self {
        SessionEvent::Message {
            content: content.into(),
        }
    }

    /// Builds a [`SessionEvent::Error`]
    pub fn error(message: impl Into<String>) -> Self {
        SessionEvent::Error {
            message: message.into(),
        }
    }

    /// Serializes the event as a JSON text frame
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound request from a session client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Invoke a tool with JSON arguments
    Invoke {
        /// Optional correlation id echoed in the matching `tool_result`
        #[serde(default)]
        id: Option<String>,
        /// Tool name
        tool: String,
        /// Tool arguments
        #[serde(default = "empty_args")]
        args: Value,
    },

    /// Ask for the tool definitions of the session
    ListTools,
}

fn empty_args() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ClientMessage {
    /// Parses a text frame
    pub fn parse(text: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
