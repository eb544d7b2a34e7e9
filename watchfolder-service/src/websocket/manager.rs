//! WebSocket connection manager.
//!
//! Tracks every observer connection and the locale its messages are
//! rendered in.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::messages::ServerMessage;

/// State for a single observer connection
pub(crate) struct ConnectionState {
    pub(crate) locale: String,
    pub(crate) tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Manager for all observer connections
pub struct ObserverManager {
    pub(crate) connections: DashMap<String, ConnectionState>,
}

impl Default for ObserverManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub(crate) fn add_connection(
        &self,
        session_id: String,
        locale: String,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) {
        debug!(session_id = %session_id, locale = %locale, "Adding observer connection");
        self.connections
            .insert(session_id, ConnectionState { locale, tx });
    }

    pub(crate) fn remove_connection(&self, session_id: &str) {
        debug!(session_id = %session_id, "Removing observer connection");
        self.connections.remove(session_id);
    }

    /// Send a message to a specific connection
    pub fn send_to(&self, session_id: &str, msg: ServerMessage) {
        if let Some(conn) = self.connections.get(session_id)
            && conn.tx.send(msg).is_err()
        {
            warn!(session_id = %session_id, "Failed to send message to connection");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
