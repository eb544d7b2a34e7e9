use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier assigned when a file is first queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a file came to be queued.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskOrigin {
    /// Found by the reconciliation scan on start
    Scan,
    /// Reported by the filesystem monitor
    Watch,
}

/// One file waiting for, or currently in, the worker.
#[derive(Debug, Clone, Serialize)]
pub struct WatchTask {
    pub id: TaskId,
    pub file_path: PathBuf,
    pub normalized_path: PathBuf,
    pub attempts: u32,
    pub origin: TaskOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl WatchTask {
    pub fn new(file_path: PathBuf, normalized_path: PathBuf, origin: TaskOrigin) -> Self {
        Self {
            id: TaskId::new(),
            file_path,
            normalized_path,
            attempts: 0,
            origin,
            last_error: None,
            enqueued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_strings() {
        assert_eq!(TaskOrigin::Scan.to_string(), "scan");
        assert_eq!("watch".parse::<TaskOrigin>().unwrap(), TaskOrigin::Watch);
        assert_eq!(
            serde_json::to_string(&TaskOrigin::Watch).unwrap(),
            "\"watch\""
        );
    }

    #[test]
    fn test_task_id_serializes_as_plain_uuid() {
        let id = TaskId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_new_task_starts_clean() {
        let task = WatchTask::new("/w/a".into(), "/w/a".into(), TaskOrigin::Scan);
        assert_eq!(task.attempts, 0);
        assert!(task.last_error.is_none());
    }
}
