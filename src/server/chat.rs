//! WebSocket session channel
//!
//! One socket is one session. The session opens on upgrade and closes when
//! the socket does (or the client sends `exit`). Each `invoke` runs in its
//! own task so a tool waiting for user consent never blocks the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::AppState;
use crate::protocol::{ClientMessage, SessionEvent};
use crate::session::{SessionHandle, SessionHub};

/// Query parameters of `/chat`
#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    /// Requested session id; a UUID is generated when absent
    pub session_id: Option<String>,
}

/// Upgrades to a WebSocket and runs the session on it
pub async fn chat_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ChatQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state, query.session_id))
}

async fn run_session(mut socket: WebSocket, state: AppState, session_id: Option<String>) {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let handle = match state.hub.open_session(session_id, events_tx) {
        Ok(handle) => handle,
        Err(err) => {
            tracing::warn!(error = %err, "Rejected session");
            if let Ok(text) = SessionEvent::error(err.to_string()).to_json() {
                let _ = socket.send(Message::Text(text)).await;
            }
            let _ = socket.close().await;
            return;
        }
    };
    handle.send(SessionEvent::message(state.welcome_message.clone()));

    let (mut sink, stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to encode session event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    drive_session(&state.hub, &handle, stream).await;
    writer.abort();
}

/// Feeds inbound frames to the session until the client leaves, then
/// closes the session
async fn drive_session<S, E>(hub: &SessionHub, handle: &Arc<SessionHandle>, mut frames: S)
where
    S: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(frame) = frames.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(session_id = %handle.id(), error = %err, "Socket read failed");
                break;
            }
        };
        if text.trim().eq_ignore_ascii_case("exit") {
            break;
        }
        dispatch(handle, &text);
    }

    hub.close_session(handle.id());
}

fn dispatch(handle: &Arc<SessionHandle>, text: &str) {
    match ClientMessage::parse(text) {
        Ok(ClientMessage::Invoke { id, tool, args }) => {
            let handle = handle.clone();
            tokio::spawn(async move {
                let result = handle.invoke(id, &tool, args).await;
                handle.send(result);
            });
        }
        Ok(ClientMessage::ListTools) => {
            handle.send(handle.list_tools());
        }
        Err(err) => {
            handle.send(SessionEvent::error(format!("Invalid message: {}", err)));
        }
    }
}
