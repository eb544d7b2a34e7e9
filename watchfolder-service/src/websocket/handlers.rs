//! WebSocket message handlers.
//!
//! Contains the logic for handling observer connections and the few
//! messages they may send.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::manager::ObserverManager;
use super::messages::{ClientMessage, ServerMessage};

/// Handle an observer WebSocket connection
///
/// Watch status events are pushed to the connection until it closes.
pub async fn handle_observer_connection(socket: WebSocket, observers: Arc<ObserverManager>, locale: String) {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!(session_id = %session_id, locale = %locale, "New observer connection");

    // Split the socket into sender and receiver
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Create a channel for sending messages to this connection
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ServerMessage>();

    observers.add_connection(session_id.clone(), locale, msg_tx);

    // Spawn task to forward messages from channel to WebSocket
    let session_id_clone = session_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to serialize WebSocket message");
                }
            }
        }
        debug!(session_id = %session_id_clone, "WebSocket send task ended");
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_client_message(&session_id, &text, &observers);
            }
            Ok(Message::Binary(data)) => {
                // Try to parse binary as JSON text
                if let Ok(text) = String::from_utf8(data.to_vec()) {
                    handle_client_message(&session_id, &text, &observers);
                }
            }
            Ok(Message::Ping(data)) => {
                debug!(session_id = %session_id, "Received ping: {:?}", data);
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Observer connection closed by client");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Clean up
    observers.remove_connection(&session_id);
    send_task.abort();
    info!(session_id = %session_id, "Observer connection closed");
}

fn handle_client_message(session_id: &str, text: &str, observers: &ObserverManager) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(
                session_id = %session_id,
                error = %e,
                text = %text,
                "Failed to parse client message"
            );
            observers.send_to(
                session_id,
                ServerMessage::Error {
                    code: "parse_error".to_string(),
                    message: format!("Failed to parse message: {}", e),
                },
            );
            return;
        }
    };

    match msg {
        ClientMessage::Ping => {
            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);

            observers.send_to(session_id, ServerMessage::Pong { timestamp });
        }
    }
}
