//! Watch API endpoints: status, configuration, suspend / resume and the
//! import record list.

use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use crate::api::AppState;
use crate::config::WatchSettings;
use crate::db::ImportRecord;
use crate::error::ServiceError;
use crate::watch::SchedulerSnapshot;

/// Response for GET /api/watch/records
#[derive(Debug, Serialize)]
pub struct ImportRecordsResponse {
    pub records: Vec<ImportRecord>,
    pub total: usize,
}

/// GET /api/watch - current scheduler state
pub async fn get_watch_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SchedulerSnapshot>, ServiceError> {
    Ok(Json(state.service.watch_snapshot().await?))
}

/// PUT /api/watch/config - persist and apply `{enabled, work_directory}`
pub async fn update_watch_config_handler(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<WatchSettings>,
) -> Result<Json<SchedulerSnapshot>, ServiceError> {
    Ok(Json(state.service.update_watch_config(settings).await?))
}

/// POST /api/watch/suspend
pub async fn suspend_watch_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SchedulerSnapshot>, ServiceError> {
    Ok(Json(state.service.suspend_watch().await?))
}

/// POST /api/watch/resume
pub async fn resume_watch_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SchedulerSnapshot>, ServiceError> {
    Ok(Json(state.service.resume_watch().await?))
}

/// GET /api/watch/records
pub async fn list_records_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ImportRecordsResponse>, ServiceError> {
    let records = state.service.import_records()?;
    let total = records.len();
    Ok(Json(ImportRecordsResponse { records, total }))
}
