//! HTTP API for the watchfolder service.
//!
//! This module provides the REST API endpoints for:
//! - Health monitoring
//! - Watch status, configuration, suspend and resume
//! - Import records
//! - Settings
//! - WebSocket connections for the import worker and for observers

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::service::WatchfolderService;
use crate::websocket::handle_observer_connection;
use crate::worker::handle_worker_connection;

pub mod settings;
pub mod watch;
use settings::{get_settings_handler, update_settings_handler};
use watch::{
    get_watch_handler, list_records_handler, resume_watch_handler, suspend_watch_handler,
    update_watch_config_handler,
};

/// Application state
pub struct AppState {
    pub service: Arc<WatchfolderService>,
    pub start_time: Instant,
}

/// Build the API router
pub fn router(service: Arc<WatchfolderService>) -> Router {
    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Watch endpoints
        .route("/watch", get(get_watch_handler))
        .route("/watch/config", put(update_watch_config_handler))
        .route("/watch/suspend", post(suspend_watch_handler))
        .route("/watch/resume", post(resume_watch_handler))
        .route("/watch/records", get(list_records_handler))
        // Settings endpoints
        .route("/settings", get(get_settings_handler))
        .route("/settings", put(update_settings_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws/worker", get(worker_ws_handler))
        .route("/ws/events", get(events_ws_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health ===

#[derive(Debug, Default, Deserialize)]
struct LocaleQuery {
    locale: Option<String>,
}

impl LocaleQuery {
    fn resolve(self, state: &AppState) -> String {
        self.locale
            .unwrap_or_else(|| state.service.i18n.default_locale().to_string())
    }
}

async fn health_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LocaleQuery>,
) -> Json<HealthResponse> {
    let locale = query.resolve(&state);
    let i18n = &state.service.i18n;
    let worker_attached = state.service.worker_bridge.is_attached();

    let worker = if worker_attached {
        i18n.get(&locale, "health-worker-attached", None)
    } else {
        i18n.get(&locale, "health-worker-detached", None)
    };

    Json(HealthResponse {
        status: i18n.get(&locale, "health-status-healthy", None),
        worker,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        worker_attached,
        observers: state.service.observers.connection_count(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    worker: String,
    version: String,
    uptime_seconds: u64,
    worker_attached: bool,
    observers: usize,
}

// === WebSocket ===

async fn worker_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Worker WebSocket upgrade request received");
    let bridge = state.service.worker_bridge.clone();
    let watch = state.service.watch.clone();
    ws.on_upgrade(move |socket| handle_worker_connection(socket, bridge, watch))
}

async fn events_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LocaleQuery>,
) -> impl IntoResponse {
    info!("Observer WebSocket upgrade request received");
    let locale = query.resolve(&state);
    let observers = state.service.observers.clone();
    ws.on_upgrade(move |socket| handle_observer_connection(socket, observers, locale))
}
