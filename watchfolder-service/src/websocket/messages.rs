//! WebSocket message types.
//!
//! Defines the client-to-server and server-to-client message formats
//! for observer connections.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::watch::{TaskId, WatchPhase};

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keepalive ping
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A watch status event, with a message in the connection's locale
    WatchStatus {
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_path: Option<PathBuf>,
        phase: WatchPhase,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Keepalive pong response
    Pong { timestamp: u64 },
    /// Error message
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_watch_status_shape() {
        let msg = ServerMessage::WatchStatus {
            task_id: None,
            file_path: Some(PathBuf::from("/inbox/a.pdf")),
            phase: WatchPhase::DispatchRetry,
            message: "Retrying".to_string(),
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "watch_status",
                "file_path": "/inbox/a.pdf",
                "phase": "dispatch-retry",
                "message": "Retrying",
            })
        );
    }
}
