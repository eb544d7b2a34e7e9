//! The watch runtime: one task that owns all scheduling state.
//!
//! Everything that can change the scheduler arrives as a [`WatchCommand`] on
//! an unbounded mailbox and runs to completion before the next one is read.
//! After each command the runtime carries out the effects the scheduler
//! queued: import records are updated, events are published and dispatches
//! are handed to the worker.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::coordinator::{SchedulerSnapshot, WorkerReport};
use super::events::{DispatchRequest, Effect, WatchEvent, WatchPhase};
use super::lifecycle::WatchController;
use super::monitor::FsEvent;
use super::paths::path_key;
use super::task::TaskId;
use crate::config::{WatchSettings, WatchTuning};
use crate::db::ImportRecords;
use crate::error::WatchError;

type Reply<T> = oneshot::Sender<T>;

pub enum WatchCommand {
    Start {
        directory: PathBuf,
        reply: Reply<Result<SchedulerSnapshot, WatchError>>,
    },
    Stop {
        reply: Reply<SchedulerSnapshot>,
    },
    Suspend {
        reply: Reply<SchedulerSnapshot>,
    },
    Resume {
        reply: Reply<Result<SchedulerSnapshot, WatchError>>,
    },
    UpdateConfig {
        settings: WatchSettings,
        reply: Reply<Result<SchedulerSnapshot, WatchError>>,
    },
    Snapshot {
        reply: Reply<SchedulerSnapshot>,
    },
    Fs {
        generation: u64,
        event: FsEvent,
    },
    WorkerStatus {
        task_id: TaskId,
        report: WorkerReport,
    },
    WorkerAvailable,
    WorkerUnavailable,
    WatchdogTick,
    Shutdown {
        reply: Reply<()>,
    },
}

/// Where the runtime sends work and telemetry.
pub trait EffectSink: Send + Sync + 'static {
    /// Hand a task to the worker. Returns `false` if nobody could take it.
    fn dispatch(&self, request: &DispatchRequest) -> bool;

    fn publish(&self, event: &WatchEvent);
}

/// Cloneable front door to the watch runtime.
#[derive(Clone)]
pub struct WatchHandle {
    commands: mpsc::UnboundedSender<WatchCommand>,
}

impl WatchHandle {
    pub async fn start(&self, directory: PathBuf) -> Result<SchedulerSnapshot, WatchError> {
        self.request(|reply| WatchCommand::Start { directory, reply })
            .await?
    }

    pub async fn stop(&self) -> Result<SchedulerSnapshot, WatchError> {
        self.request(|reply| WatchCommand::Stop { reply }).await
    }

    pub async fn suspend(&self) -> Result<SchedulerSnapshot, WatchError> {
        self.request(|reply| WatchCommand::Suspend { reply }).await
    }

    pub async fn resume(&self) -> Result<SchedulerSnapshot, WatchError> {
        self.request(|reply| WatchCommand::Resume { reply }).await?
    }

    pub async fn update_config(&self, settings: WatchSettings) -> Result<SchedulerSnapshot, WatchError> {
        self.request(|reply| WatchCommand::UpdateConfig { settings, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<SchedulerSnapshot, WatchError> {
        self.request(|reply| WatchCommand::Snapshot { reply }).await
    }

    /// Stop watching and end the runtime task.
    pub async fn shutdown(&self) -> Result<(), WatchError> {
        self.request(|reply| WatchCommand::Shutdown { reply }).await
    }

    pub fn worker_status(&self, task_id: TaskId, report: WorkerReport) {
        self.post(WatchCommand::WorkerStatus { task_id, report });
    }

    pub fn worker_available(&self) {
        self.post(WatchCommand::WorkerAvailable);
    }

    pub fn worker_unavailable(&self) {
        self.post(WatchCommand::WorkerUnavailable);
    }

    fn post(&self, command: WatchCommand) {
        if self.commands.send(command).is_err() {
            warn!("Watch runtime is gone, dropping command");
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> WatchCommand) -> Result<T, WatchError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| WatchError::RuntimeClosed)?;
        response.await.map_err(|_| WatchError::RuntimeClosed)
    }
}

/// Spawn the runtime task.
pub fn spawn_watch_runtime(
    tuning: WatchTuning,
    records: Arc<dyn ImportRecords>,
    sink: Arc<dyn EffectSink>,
) -> (WatchHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let controller = WatchController::new(tuning, records.clone(), tx.clone());
    let runtime = WatchRuntime {
        controller,
        records,
        sink,
        commands: rx,
    };
    let join = tokio::spawn(runtime.run());
    (WatchHandle { commands: tx }, join)
}

struct WatchRuntime {
    controller: WatchController,
    records: Arc<dyn ImportRecords>,
    sink: Arc<dyn EffectSink>,
    commands: mpsc::UnboundedReceiver<WatchCommand>,
}

impl WatchRuntime {
    async fn run(mut self) {
        info!("Watch runtime started");
        while let Some(command) = self.commands.recv().await {
            if !self.handle(command).await {
                break;
            }
            self.flush();
        }
        self.controller.stop();
        info!("Watch runtime stopped");
    }

    /// Returns `false` when the runtime should exit.
    async fn handle(&mut self, command: WatchCommand) -> bool {
        match command {
            WatchCommand::Start { directory, reply } => {
                let result = self.controller.start(&directory).await;
                self.flush();
                let _ = reply.send(result.map(|()| self.controller.snapshot()));
            }
            WatchCommand::Stop { reply } => {
                self.controller.stop();
                let _ = reply.send(self.controller.snapshot());
            }
            WatchCommand::Suspend { reply } => {
                self.controller.suspend();
                let _ = reply.send(self.controller.snapshot());
            }
            WatchCommand::Resume { reply } => {
                let result = self.controller.resume();
                let _ = reply.send(result.map(|()| self.controller.snapshot()));
            }
            WatchCommand::UpdateConfig { settings, reply } => {
                let result = self.controller.update_config(&settings).await;
                self.flush();
                let _ = reply.send(result.map(|()| self.controller.snapshot()));
            }
            WatchCommand::Snapshot { reply } => {
                let _ = reply.send(self.controller.snapshot());
            }
            WatchCommand::Fs { generation, event } => {
                self.controller.on_fs_event(generation, event).await;
            }
            WatchCommand::WorkerStatus { task_id, report } => {
                self.controller.on_worker_report(task_id, report);
            }
            WatchCommand::WorkerAvailable => self.controller.on_worker_available(),
            WatchCommand::WorkerUnavailable => self.controller.on_worker_unavailable(),
            WatchCommand::WatchdogTick => self.controller.on_watchdog_tick(),
            WatchCommand::Shutdown { reply } => {
                self.controller.stop();
                self.flush();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn flush(&mut self) {
        loop {
            let effects = self.controller.drain_effects();
            if effects.is_empty() {
                return;
            }
            for effect in effects {
                match effect {
                    Effect::Event(event) => {
                        self.record(&event);
                        self.sink.publish(&event);
                    }
                    Effect::Dispatch(request) => {
                        if !self.sink.dispatch(&request) {
                            warn!(task_id = %request.task_id, "No worker to take dispatch, requeueing");
                            self.controller.on_dispatch_undeliverable(request.task_id);
                        }
                    }
                }
            }
        }
    }

    fn record(&self, event: &WatchEvent) {
        let Some(path) = event.file_path.as_deref() else {
            return;
        };
        // one row per file, whatever spelling the event carried
        let key = path_key(path);
        let path = key.as_path();
        let error = event.error.as_deref().unwrap_or_default();
        let result = match event.phase {
            WatchPhase::Queued => self.records.record_detected(path),
            WatchPhase::DispatchRetry => self.records.record_attempt(path, event.attempts, error),
            WatchPhase::Completed => self.records.mark_imported(path),
            WatchPhase::Abandoned => self.records.record_failure(path, event.attempts, error),
            WatchPhase::Cancelled => self.records.forget(path),
            WatchPhase::Dispatched | WatchPhase::Stalled => return,
        };
        if let Err(e) = result {
            warn!(path = %path.display(), phase = %event.phase, error = %e, "Failed to update import record");
        } else {
            debug!(path = %path.display(), phase = %event.phase, "Import record updated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::db::models::ImportStatus;
    use crate::watch::coordinator::IDLE_SUCCESS;
    use crate::watch::paths::normalize;
    use std::fs;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct RecordingSink {
        worker_attached: AtomicBool,
        dispatched: Mutex<Vec<DispatchRequest>>,
        events: Mutex<Vec<WatchEvent>>,
    }

    impl EffectSink for RecordingSink {
        fn dispatch(&self, request: &DispatchRequest) -> bool {
            if !self.worker_attached.load(Ordering::SeqCst) {
                return false;
            }
            self.dispatched.lock().unwrap().push(request.clone());
            true
        }

        fn publish(&self, event: &WatchEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        db: Arc<Database>,
        sink: Arc<RecordingSink>,
        handle: WatchHandle,
        join: JoinHandle<()>,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("inbox");
        fs::create_dir(&root).unwrap();
        let root = normalize(&root).unwrap();
        let db = Arc::new(Database::open(&tmp.path().join("test.db")).unwrap());
        let sink = Arc::new(RecordingSink::default());
        let (handle, join) = spawn_watch_runtime(WatchTuning::default(), db.clone(), sink.clone());
        Fixture {
            _tmp: tmp,
            root,
            db,
            sink,
            handle,
            join,
        }
    }

    fn dispatched(sink: &RecordingSink) -> Vec<DispatchRequest> {
        sink.dispatched.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_full_import_cycle_updates_records() {
        let f = fixture();
        let file = f.root.join("report.txt");
        fs::write(&file, b"x").unwrap();

        let snapshot = f.handle.start(f.root.clone()).await.unwrap();
        assert!(snapshot.enabled);
        assert_eq!(snapshot.queue.len(), 1);

        f.sink.worker_attached.store(true, Ordering::SeqCst);
        f.handle.worker_available();
        let snapshot = f.handle.snapshot().await.unwrap();
        let active = snapshot.active.unwrap();
        assert_eq!(dispatched(&f.sink).len(), 1);

        f.handle.worker_status(active.task.id, WorkerReport::Accepted);
        f.handle
            .worker_status(active.task.id, WorkerReport::Idle(Some(IDLE_SUCCESS.to_string())));
        let snapshot = f.handle.snapshot().await.unwrap();
        assert!(snapshot.active.is_none());
        assert!(snapshot.queue.is_empty());

        let records = f.db.list_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ImportStatus::Imported);

        let phases: Vec<WatchPhase> = f.sink.events.lock().unwrap().iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            [WatchPhase::Queued, WatchPhase::Dispatched, WatchPhase::Completed]
        );

        f.handle.shutdown().await.unwrap();
        f.join.await.unwrap();
    }

    #[tokio::test]
    async fn test_undeliverable_dispatch_is_requeued_at_head() {
        let f = fixture();
        fs::write(f.root.join("a.txt"), b"x").unwrap();
        fs::write(f.root.join("b.txt"), b"x").unwrap();
        f.handle.start(f.root.clone()).await.unwrap();

        // worker claims availability but nothing is attached to deliver to
        f.handle.worker_available();
        let snapshot = f.handle.snapshot().await.unwrap();
        assert!(snapshot.active.is_none());
        assert!(snapshot.worker_busy);
        let names: Vec<_> = snapshot
            .queue
            .iter()
            .map(|t| t.file_path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
        assert_eq!(snapshot.queue[0].attempts, 0);

        f.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_file_is_recorded_failed() {
        let f = fixture();
        fs::write(f.root.join("bad.txt"), b"x").unwrap();
        f.handle.start(f.root.clone()).await.unwrap();
        f.sink.worker_attached.store(true, Ordering::SeqCst);
        f.handle.worker_available();

        for _ in 0..3 {
            let snapshot = f.handle.snapshot().await.unwrap();
            let id = snapshot.active.unwrap().task.id;
            f.handle
                .worker_status(id, WorkerReport::Error("unreadable".to_string()));
        }

        let snapshot = f.handle.snapshot().await.unwrap();
        assert!(snapshot.active.is_none());
        assert!(snapshot.last_error.unwrap().contains("unreadable"));

        let records = f.db.list_records().unwrap();
        assert_eq!(records[0].status, ImportStatus::Failed);
        assert_eq!(records[0].attempts, 3);
        assert_eq!(dispatched(&f.sink).len(), 3);

        f.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_error_is_returned() {
        let f = fixture();
        let err = assert_err!(f.handle.start(f.root.join("missing")).await);
        assert!(matches!(err, WatchError::DirectoryUnavailable { .. }));
        assert_ok!(f.handle.shutdown().await);
    }

    #[tokio::test]
    async fn test_handle_reports_closed_runtime() {
        let f = fixture();
        f.handle.shutdown().await.unwrap();
        f.join.await.unwrap();
        assert!(matches!(
            f.handle.snapshot().await,
            Err(WatchError::RuntimeClosed)
        ));
    }
}
