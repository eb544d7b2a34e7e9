//! The single attached import worker.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::WorkerCommand;
use crate::watch::DispatchRequest;

struct AttachedWorker {
    connection_id: String,
    tx: mpsc::UnboundedSender<WorkerCommand>,
}

/// Holds the outbound channel of the one worker connection allowed at a
/// time.
pub struct WorkerBridge {
    attached: Mutex<Option<AttachedWorker>>,
}

impl Default for WorkerBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerBridge {
    pub fn new() -> Self {
        Self {
            attached: Mutex::new(None),
        }
    }

    /// Attach a connection. Fails if another worker is already attached.
    pub fn attach(&self, connection_id: &str, tx: mpsc::UnboundedSender<WorkerCommand>) -> bool {
        let mut attached = self.attached.lock().unwrap();
        if let Some(current) = attached.as_ref() {
            warn!(
                connection_id = %connection_id,
                attached = %current.connection_id,
                "Rejecting second worker connection"
            );
            return false;
        }
        info!(connection_id = %connection_id, "Worker attached");
        *attached = Some(AttachedWorker {
            connection_id: connection_id.to_string(),
            tx,
        });
        true
    }

    /// Detach a connection. Returns `true` if it was the attached one.
    pub fn detach(&self, connection_id: &str) -> bool {
        let mut attached = self.attached.lock().unwrap();
        if attached
            .as_ref()
            .is_some_and(|current| current.connection_id == connection_id)
        {
            *attached = None;
            info!(connection_id = %connection_id, "Worker detached");
            true
        } else {
            false
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.lock().unwrap().is_some()
    }

    /// Put an import request on the worker's wire.
    pub fn send_import(&self, request: &DispatchRequest) -> bool {
        let attached = self.attached.lock().unwrap();
        let Some(worker) = attached.as_ref() else {
            debug!(task_id = %request.task_id, "No worker attached for import");
            return false;
        };
        worker
            .tx
            .send(WorkerCommand::Import {
                task_id: request.task_id,
                file_path: request.file_path.clone(),
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::TaskId;
    use std::path::PathBuf;

    fn request() -> DispatchRequest {
        DispatchRequest {
            task_id: TaskId::new(),
            file_path: PathBuf::from("/inbox/a.pdf"),
        }
    }

    #[test]
    fn test_single_worker() {
        let bridge = WorkerBridge::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        assert!(bridge.attach("one", tx1));
        assert!(!bridge.attach("two", tx2));
        assert!(!bridge.detach("two"));
        assert!(bridge.is_attached());
        assert!(bridge.detach("one"));
        assert!(!bridge.is_attached());
    }

    #[test]
    fn test_send_import() {
        let bridge = WorkerBridge::new();
        assert!(!bridge.send_import(&request()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        bridge.attach("one", tx);
        let req = request();
        assert!(bridge.send_import(&req));
        match rx.try_recv().unwrap() {
            WorkerCommand::Import { task_id, file_path } => {
                assert_eq!(task_id, req.task_id);
                assert_eq!(file_path, req.file_path);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        drop(rx);
        assert!(!bridge.send_import(&request()));
    }
}
