//! Broadcast of watch status events to observers.

use std::collections::HashMap;

use tracing::debug;

use super::manager::ObserverManager;
use super::messages::ServerMessage;
use crate::i18n::I18n;
use crate::watch::WatchEvent;

impl ObserverManager {
    /// Send a status event to every observer, rendered once per locale
    pub fn broadcast_watch_event(&self, event: &WatchEvent, i18n: &I18n) {
        let mut rendered: HashMap<String, ServerMessage> = HashMap::new();
        let mut sent_count = 0;

        for entry in self.connections.iter() {
            let conn = entry.value();
            let msg = rendered
                .entry(conn.locale.clone())
                .or_insert_with(|| ServerMessage::WatchStatus {
                    task_id: event.task_id,
                    file_path: event.file_path.clone(),
                    phase: event.phase,
                    message: i18n.watch_message(&conn.locale, event),
                    error: event.error.clone(),
                });
            if conn.tx.send(msg.clone()).is_ok() {
                sent_count += 1;
            }
        }

        if sent_count > 0 {
            debug!(
                sent_count = sent_count,
                phase = %event.phase,
                "Broadcast watch status to observers"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::WatchPhase;
    use tokio::sync::mpsc;

    fn event(phase: WatchPhase) -> WatchEvent {
        WatchEvent {
            task_id: None,
            file_path: Some("/inbox/a.pdf".into()),
            phase,
            attempts: 0,
            error: None,
        }
    }

    #[test]
    fn test_broadcast_uses_each_connection_locale() {
        let manager = ObserverManager::new();
        let i18n = I18n::new();
        let (en_tx, mut en_rx) = mpsc::unbounded_channel();
        let (zh_tx, mut zh_rx) = mpsc::unbounded_channel();
        manager.add_connection("a".to_string(), "en".to_string(), en_tx);
        manager.add_connection("b".to_string(), "zh-CN".to_string(), zh_tx);

        manager.broadcast_watch_event(&event(WatchPhase::Completed), &i18n);

        let ServerMessage::WatchStatus { message: en, phase, .. } = en_rx.try_recv().unwrap() else {
            panic!("expected watch status");
        };
        assert_eq!(phase, WatchPhase::Completed);
        assert!(en.starts_with("Imported"));

        let ServerMessage::WatchStatus { message: zh, .. } = zh_rx.try_recv().unwrap() else {
            panic!("expected watch status");
        };
        assert!(zh.starts_with("已导入"));
    }

    #[test]
    fn test_closed_connections_are_skipped() {
        let manager = ObserverManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        manager.add_connection("a".to_string(), "en".to_string(), tx);
        drop(rx);

        manager.broadcast_watch_event(&event(WatchPhase::Queued), &I18n::new());
        assert_eq!(manager.connection_count(), 1);

        manager.remove_connection("a");
        assert_eq!(manager.connection_count(), 0);
    }
}
