//! Import worker wire protocol.
//!
//! JSON objects tagged by `type`, in both directions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::watch::{TaskId, WorkerReport};

/// Messages sent from the worker to the service
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Worker introduces itself; implies it can take work
    Hello {
        #[serde(default)]
        name: Option<String>,
    },
    Available,
    Unavailable,
    /// Keepalive ping
    Ping,
    /// Progress or outcome for a dispatched task
    Status {
        task_id: TaskId,
        status: WorkerStatusKind,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatusKind {
    Accepted,
    Busy,
    Progress,
    Error,
    Idle,
}

impl WorkerStatusKind {
    /// Decode into a scheduler report.
    pub fn into_report(self, result: Option<String>, error: Option<String>) -> WorkerReport {
        match self {
            Self::Accepted => WorkerReport::Accepted,
            Self::Busy => WorkerReport::Busy,
            Self::Progress => WorkerReport::Progress,
            Self::Error => {
                WorkerReport::Error(error.unwrap_or_else(|| "worker reported an error".to_string()))
            }
            Self::Idle => WorkerReport::Idle(result),
        }
    }
}

/// Messages sent from the service to the worker
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Import one file
    Import { task_id: TaskId, file_path: PathBuf },
    /// Keepalive pong response
    Pong { timestamp: u64 },
    Error { code: String, message: String },
}
