use std::path::PathBuf;

use serde::Serialize;

use super::task::{TaskId, WatchTask};

/// Telemetry phase of a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum WatchPhase {
    Queued,
    Dispatched,
    DispatchRetry,
    Completed,
    Abandoned,
    Cancelled,
    Stalled,
}

/// A status event produced by a scheduler transition.
#[derive(Debug, Clone, Serialize)]
pub struct WatchEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    pub phase: WatchPhase,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WatchEvent {
    pub fn for_task(task: &WatchTask, phase: WatchPhase) -> Self {
        Self {
            task_id: Some(task.id),
            file_path: Some(task.file_path.clone()),
            phase,
            attempts: task.attempts,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Request to hand a file to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub task_id: TaskId,
    pub file_path: PathBuf,
}

/// Side effect queued by the scheduler for the runtime to carry out, in
/// order.
#[derive(Debug, Clone)]
pub enum Effect {
    Dispatch(DispatchRequest),
    Event(WatchEvent),
}
