use std::path::PathBuf;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use notify_debouncer_full::notify;
use serde::Serialize;
use thiserror::Error;

use crate::watch::TaskId;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Watch(#[from] WatchError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Directory watch and dispatch failures.
///
/// Only `DirectoryUnavailable` and `MonitorInit` stop monitoring; every other
/// variant is contained to a single file and is surfaced as a status event.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watch directory unavailable: {} ({reason})", path.display())]
    DirectoryUnavailable { path: PathBuf, reason: String },

    #[error("Worker was busy and rejected task {task_id}")]
    DispatchRejected { task_id: TaskId },

    #[error("Worker reported failure for task {task_id}: {reason}")]
    WorkerReportedFailure { task_id: TaskId, reason: String },

    #[error("Gave up on {} after {attempts} attempts: {last_error}", path.display())]
    RetryCeilingExceeded {
        path: PathBuf,
        attempts: u32,
        last_error: String,
    },

    #[error("Worker stalled on task {task_id} (no activity for {idle_secs}s)")]
    WorkerStall { task_id: TaskId, idle_secs: u64 },

    #[error("Failed to start filesystem monitor for {}", path.display())]
    MonitorInit {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Watch runtime is not running")]
    RuntimeClosed,
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Watch(WatchError::DirectoryUnavailable { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::Watch(WatchError::RuntimeClosed) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Database(_) => "database_error",
            ServiceError::Watch(WatchError::DirectoryUnavailable { .. }) => {
                "directory_unavailable"
            }
            ServiceError::Watch(WatchError::DispatchRejected { .. }) => "dispatch_rejected",
            ServiceError::Watch(WatchError::WorkerReportedFailure { .. }) => "worker_failure",
            ServiceError::Watch(WatchError::RetryCeilingExceeded { .. }) => {
                "retry_ceiling_exceeded"
            }
            ServiceError::Watch(WatchError::WorkerStall { .. }) => "worker_stall",
            ServiceError::Watch(WatchError::MonitorInit { .. }) => "monitor_init_failed",
            ServiceError::Watch(WatchError::RuntimeClosed) => "watch_runtime_closed",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
