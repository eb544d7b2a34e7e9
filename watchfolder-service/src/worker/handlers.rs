//! Worker WebSocket connection handling.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::bridge::WorkerBridge;
use super::messages::{WorkerCommand, WorkerMessage};
use crate::watch::WatchHandle;

/// Handle a worker WebSocket connection
///
/// Attaching implies the worker is available; the connection going away
/// implies it is not. A second worker is told so and disconnected.
pub async fn handle_worker_connection(socket: WebSocket, bridge: Arc<WorkerBridge>, watch: WatchHandle) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, "New worker connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerCommand>();

    let connection_id_clone = connection_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match serde_json::to_string(&command) {
                Ok(json) => {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to serialize worker command");
                }
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
        debug!(connection_id = %connection_id_clone, "Worker send task ended");
    });

    if !bridge.attach(&connection_id, tx.clone()) {
        let _ = tx.send(WorkerCommand::Error {
            code: "worker_already_attached".to_string(),
            message: "Another import worker is already connected".to_string(),
        });
        drop(tx);
        let _ = send_task.await;
        return;
    }
    watch.worker_available();

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_worker_message(&connection_id, &text, &tx, &watch);
            }
            Ok(Message::Binary(data)) => {
                if let Ok(text) = String::from_utf8(data.to_vec()) {
                    handle_worker_message(&connection_id, &text, &tx, &watch);
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Worker closed the connection");
                break;
            }
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "Worker WebSocket error");
                break;
            }
        }
    }

    if bridge.detach(&connection_id) {
        watch.worker_unavailable();
    }
    send_task.abort();
    info!(connection_id = %connection_id, "Worker connection closed");
}

fn handle_worker_message(
    connection_id: &str,
    text: &str,
    tx: &mpsc::UnboundedSender<WorkerCommand>,
    watch: &WatchHandle,
) {
    let msg: WorkerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(
                connection_id = %connection_id,
                error = %e,
                text = %text,
                "Failed to parse worker message"
            );
            let _ = tx.send(WorkerCommand::Error {
                code: "parse_error".to_string(),
                message: format!("Failed to parse message: {}", e),
            });
            return;
        }
    };

    match msg {
        WorkerMessage::Hello { name } => {
            info!(connection_id = %connection_id, name = ?name, "Worker said hello");
            watch.worker_available();
        }
        WorkerMessage::Available => watch.worker_available(),
        WorkerMessage::Unavailable => watch.worker_unavailable(),
        WorkerMessage::Ping => {
            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            let _ = tx.send(WorkerCommand::Pong { timestamp });
        }
        WorkerMessage::Status {
            task_id,
            status,
            result,
            error,
        } => {
            debug!(connection_id = %connection_id, task_id = %task_id, status = ?status, "Worker status");
            watch.worker_status(task_id, status.into_report(result, error));
        }
    }
}
