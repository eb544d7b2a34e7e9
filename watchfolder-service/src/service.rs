use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{DynamicConfig, RuntimeConfig, WatchSettings};
use crate::db::{Database, ImportRecord, ImportRecords};
use crate::error::ServiceResult;
use crate::i18n::I18n;
use crate::watch::{
    DispatchRequest, EffectSink, SchedulerSnapshot, WatchEvent, WatchHandle, spawn_watch_runtime,
};
use crate::websocket::ObserverManager;
use crate::worker::WorkerBridge;

/// Main service coordinator
pub struct WatchfolderService {
    pub runtime_config: Arc<RuntimeConfig>,
    pub db: Arc<Database>,
    pub i18n: Arc<I18n>,
    pub observers: Arc<ObserverManager>,
    pub worker_bridge: Arc<WorkerBridge>,
    pub watch: WatchHandle,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl WatchfolderService {
    /// Create the service and spawn the watch runtime.
    /// Accepts a pre-opened database so that RuntimeConfig can load settings from it
    pub fn new(db: Arc<Database>, runtime_config: Arc<RuntimeConfig>) -> Self {
        info!("Initializing watchfolder service");

        let i18n = Arc::new(I18n::with_default_locale(&runtime_config.static_config.locale));
        let observers = Arc::new(ObserverManager::new());
        let worker_bridge = Arc::new(WorkerBridge::new());

        let effects = Arc::new(WatchEffects {
            worker_bridge: worker_bridge.clone(),
            observers: observers.clone(),
            i18n: i18n.clone(),
        });
        let records: Arc<dyn ImportRecords> = db.clone();
        let (watch, watch_task) =
            spawn_watch_runtime(runtime_config.static_config.watch.clone(), records, effects);

        Self {
            runtime_config,
            db,
            i18n,
            observers,
            worker_bridge,
            watch,
            watch_task: Mutex::new(Some(watch_task)),
        }
    }

    /// Start watching according to the persisted settings.
    pub async fn apply_persisted_config(&self) -> ServiceResult<SchedulerSnapshot> {
        let settings = self.runtime_config.dynamic().watch.clone();
        Ok(self.watch.update_config(settings).await?)
    }

    /// Persist new watch settings and apply them.
    ///
    /// Settings are saved even if the directory then fails to start, so the
    /// next boot retries it.
    pub async fn update_watch_config(&self, settings: WatchSettings) -> ServiceResult<SchedulerSnapshot> {
        self.db.set_settings(settings.to_settings())?;
        self.runtime_config.reload_from_db(&self.db)?;
        info!(
            enabled = settings.enabled,
            work_directory = ?settings.work_directory,
            "Watch settings updated"
        );
        Ok(self.watch.update_config(settings).await?)
    }

    /// Update settings by key and apply the watch part.
    pub async fn update_settings(
        &self,
        updates: HashMap<String, serde_json::Value>,
    ) -> ServiceResult<SchedulerSnapshot> {
        DynamicConfig::validate_keys(&updates)?;
        self.db.set_settings(updates)?;
        self.runtime_config.reload_from_db(&self.db)?;

        let settings = self.runtime_config.dynamic().watch.clone();
        Ok(self.watch.update_config(settings).await?)
    }

    pub async fn watch_snapshot(&self) -> ServiceResult<SchedulerSnapshot> {
        Ok(self.watch.snapshot().await?)
    }

    pub async fn suspend_watch(&self) -> ServiceResult<SchedulerSnapshot> {
        Ok(self.watch.suspend().await?)
    }

    pub async fn resume_watch(&self) -> ServiceResult<SchedulerSnapshot> {
        Ok(self.watch.resume().await?)
    }

    pub fn import_records(&self) -> ServiceResult<Vec<ImportRecord>> {
        self.db.list_records()
    }

    /// Stop watching and wait for the runtime to exit.
    pub async fn shutdown(&self) {
        if let Err(e) = self.watch.shutdown().await {
            warn!(error = %e, "Watch runtime already stopped");
        }
        let task = self.watch_task.lock().unwrap().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Watch runtime task failed");
        }
    }
}

/// Carries scheduler effects to the worker and to observers.
struct WatchEffects {
    worker_bridge: Arc<WorkerBridge>,
    observers: Arc<ObserverManager>,
    i18n: Arc<I18n>,
}

impl EffectSink for WatchEffects {
    fn dispatch(&self, request: &DispatchRequest) -> bool {
        self.worker_bridge.send_import(request)
    }

    fn publish(&self, event: &WatchEvent) {
        self.observers.broadcast_watch_event(event, &self.i18n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;
    use crate::error::{ServiceError, WatchError};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn service(tmp: &TempDir) -> WatchfolderService {
        let db = Arc::new(Database::open(&tmp.path().join("test.db")).unwrap());
        let runtime_config = Arc::new(RuntimeConfig::new(StaticConfig::default(), DynamicConfig::default()));
        WatchfolderService::new(db, runtime_config)
    }

    #[tokio::test]
    async fn test_update_watch_config_persists_and_starts() {
        let tmp = TempDir::new().unwrap();
        let inbox = tmp.path().join("inbox");
        fs::create_dir(&inbox).unwrap();
        let service = service(&tmp);

        let snapshot = service
            .update_watch_config(WatchSettings {
                enabled: true,
                work_directory: Some(inbox.clone()),
            })
            .await
            .unwrap();
        assert!(snapshot.enabled);

        let dynamic = service.runtime_config.dynamic();
        assert!(dynamic.watch.enabled);
        assert_eq!(dynamic.watch.work_directory, Some(inbox));

        let stored = service.db.get_all_settings().unwrap();
        assert_eq!(stored["watch.enabled"], json!(true));

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_directory_is_persisted_but_rejected() {
        let tmp = TempDir::new().unwrap();
        let service = service(&tmp);

        let err = service
            .update_watch_config(WatchSettings {
                enabled: true,
                work_directory: Some(tmp.path().join("missing")),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Watch(WatchError::DirectoryUnavailable { .. })
        ));
        assert!(service.runtime_config.dynamic().watch.enabled);
        assert!(!service.watch_snapshot().await.unwrap().enabled);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_setting_keys_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let service = service(&tmp);

        let err = service
            .update_settings(HashMap::from([("watch.speed".to_string(), json!(11))]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest { .. }));
        assert!(service.db.get_all_settings().unwrap().is_empty());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let tmp = TempDir::new().unwrap();
        let service = service(&tmp);
        service.shutdown().await;
        assert!(matches!(
            service.watch_snapshot().await,
            Err(ServiceError::Watch(WatchError::RuntimeClosed))
        ));
    }
}
