//! Start, stop, suspend and resume of directory monitoring.
//!
//! [`WatchController`] owns the scheduler together with the monitor and the
//! watchdog ticker, and turns filesystem events into registry operations.
//! It lives inside the watch runtime and is never shared.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::coordinator::{Scheduler, SchedulerOptions, SchedulerSnapshot, WorkerReport};
use super::events::Effect;
use super::monitor::{FsEvent, FsEventKind, FsMonitor, MonitorOptions};
use super::paths::{depth_below, is_within, normalize, path_key};
use super::runtime::WatchCommand;
use super::task::{TaskId, TaskOrigin};
use super::watchdog::IdleWatchdog;
use crate::config::{WatchSettings, WatchTuning};
use crate::db::ImportRecords;
use crate::error::WatchError;

pub struct WatchController {
    scheduler: Scheduler,
    watchdog: IdleWatchdog,
    watchdog_cancel: Option<CancellationToken>,
    monitor: Option<FsMonitor>,
    /// Attach counter; events tagged with an older value are stale
    generation: u64,
    tuning: WatchTuning,
    records: Arc<dyn ImportRecords>,
    commands: UnboundedSender<WatchCommand>,
}

impl WatchController {
    pub fn new(
        tuning: WatchTuning,
        records: Arc<dyn ImportRecords>,
        commands: UnboundedSender<WatchCommand>,
    ) -> Self {
        let scheduler = Scheduler::new(SchedulerOptions {
            max_attempts: tuning.max_attempts,
            error_frees_worker: tuning.error_frees_worker,
        });
        let watchdog = IdleWatchdog::new(tuning.watchdog_interval(), tuning.stall_ticks);

        Self {
            scheduler,
            watchdog,
            watchdog_cancel: None,
            monitor: None,
            generation: 0,
            tuning,
            records,
            commands,
        }
    }

    // --- lifecycle -------------------------------------------------------

    /// Begin watching `directory`. Restarts if a different directory is
    /// being watched; does nothing if it is the same one.
    pub async fn start(&mut self, directory: &Path) -> Result<(), WatchError> {
        if self.scheduler.is_enabled()
            && let (Some(current), Some(requested)) =
                (self.scheduler.work_directory(), normalize(directory))
            && path_key(current) == path_key(&requested)
        {
            debug!(path = %requested.display(), "Already watching directory");
            return Ok(());
        }

        if self.scheduler.is_enabled() {
            self.stop();
        }

        let root = match validate_directory(directory).await {
            Ok(root) => root,
            Err(e) => {
                warn!(error = %e, "Not starting directory watch");
                return Err(e);
            }
        };

        self.scheduler.begin(root.clone());
        self.seed(&root).await;

        if let Err(e) = self.attach_monitor(&root) {
            warn!(error = %e, "Stopping directory watch");
            self.stop();
            return Err(e);
        }
        self.start_watchdog();

        info!(
            path = %root.display(),
            queued = self.scheduler.queue_len(),
            "Directory watch started"
        );
        Ok(())
    }

    /// Drop all queued and active work and release the monitor and
    /// watchdog.
    pub fn stop(&mut self) {
        let was_enabled = self.scheduler.is_enabled();
        self.detach_monitor();
        self.stop_watchdog();
        self.scheduler.reset();
        if was_enabled {
            info!("Directory watch stopped");
        }
    }

    /// Detach the monitor, keeping queued and active work.
    pub fn suspend(&mut self) {
        if !self.scheduler.is_enabled() || self.scheduler.is_suspended() {
            return;
        }
        self.detach_monitor();
        self.scheduler.set_suspended(true);
        info!("Directory watch suspended");
    }

    /// Reattach the monitor after [`suspend`](Self::suspend).
    pub fn resume(&mut self) -> Result<(), WatchError> {
        if !self.scheduler.is_enabled() || !self.scheduler.is_suspended() {
            return Ok(());
        }
        let Some(root) = self.scheduler.work_directory().map(Path::to_path_buf) else {
            return Ok(());
        };
        self.attach_monitor(&root)?;
        self.scheduler.set_suspended(false);
        info!(path = %root.display(), "Directory watch resumed");
        Ok(())
    }

    /// Apply the hot-reloadable watch settings.
    pub async fn update_config(&mut self, settings: &WatchSettings) -> Result<(), WatchError> {
        match (settings.enabled, &settings.work_directory) {
            (false, _) => {
                self.stop();
                Ok(())
            }
            (true, Some(directory)) => self.start(directory).await,
            (true, None) => {
                warn!("Watching enabled without a work directory, ignoring");
                Ok(())
            }
        }
    }

    // --- inputs ----------------------------------------------------------

    pub async fn on_fs_event(&mut self, generation: u64, event: FsEvent) {
        if self.monitor.as_ref().map(FsMonitor::generation) != Some(generation) {
            debug!(generation, current = self.generation, path = %event.path.display(), "Dropping event from detached monitor");
            return;
        }
        let Some(root) = self.scheduler.work_directory().map(Path::to_path_buf) else {
            return;
        };
        let Some(normalized) = normalize(&event.path) else {
            debug!(path = %event.path.display(), "Ignoring event for unresolvable path");
            return;
        };
        if !is_within(&root, &normalized) {
            return;
        }

        match event.kind {
            FsEventKind::Add | FsEventKind::Change => {
                let metadata = match tokio::fs::metadata(&normalized).await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        debug!(path = %normalized.display(), error = %e, "File vanished before it could be queued");
                        return;
                    }
                };
                if metadata.is_file() {
                    if self.accepts(&normalized) {
                        self.scheduler.enqueue(normalized.clone(), normalized, TaskOrigin::Watch);
                    }
                } else if metadata.is_dir() && event.kind == FsEventKind::Add {
                    // A directory moved in whole reports only itself
                    for file in self.collect_files(&root, &normalized).await {
                        self.scheduler.enqueue(file.clone(), file, TaskOrigin::Watch);
                    }
                }
            }
            FsEventKind::Unlink => {
                self.scheduler.remove(&normalized);
            }
        }
    }

    pub fn on_watchdog_tick(&mut self) {
        if !self.scheduler.is_enabled() {
            return;
        }
        let verdict = self.watchdog.tick(&mut self.scheduler, Instant::now());
        debug!(?verdict, "Watchdog tick");
    }

    pub fn on_worker_report(&mut self, task_id: TaskId, report: WorkerReport) {
        self.scheduler.handle_report(task_id, report);
    }

    pub fn on_worker_available(&mut self) {
        self.scheduler.worker_available();
    }

    pub fn on_worker_unavailable(&mut self) {
        self.scheduler.worker_unavailable();
    }

    pub fn on_dispatch_undeliverable(&mut self, task_id: TaskId) {
        self.scheduler.dispatch_undeliverable(task_id);
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        self.scheduler.drain_effects()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.scheduler.snapshot()
    }

    // --- internals -------------------------------------------------------

    /// Queue everything under the root the record store does not list as
    /// imported.
    async fn seed(&mut self, root: &Path) {
        let discovered: Vec<PathBuf> = self
            .collect_files(root, root)
            .await
            .iter()
            .map(|file| path_key(file))
            .collect();
        if let Err(e) = self.records.record_discovered(&discovered) {
            warn!(error = %e, "Failed to record discovered files");
        }

        let candidates = match self.records.find_paths_not_yet_imported() {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "Failed to read import records, skipping seed scan");
                return;
            }
        };

        let mut seeded = 0;
        for path in candidates {
            let Some(normalized) = normalize(&path) else {
                continue;
            };
            if !is_within(root, &normalized) || !self.accepts(&normalized) {
                continue;
            }
            if !tokio::fs::metadata(&normalized)
                .await
                .is_ok_and(|m| m.is_file())
            {
                continue;
            }
            if self.scheduler.enqueue(path, normalized, TaskOrigin::Scan) {
                seeded += 1;
            }
        }

        info!(path = %root.display(), seeded, "Seed scan complete");
    }

    /// Regular files at or below `dir` that pass the depth and extension
    /// filters, in path order.
    async fn collect_files(&self, root: &Path, dir: &Path) -> Vec<PathBuf> {
        let root = root.to_path_buf();
        let dir = dir.to_path_buf();
        let max_depth = self.tuning.max_depth;
        let extensions = self.tuning.extensions.clone();

        let walked = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            collect_files_recursive(&dir, &root, max_depth, &mut files);
            files.retain(|file| has_accepted_extension(file, &extensions));
            files.sort();
            files
        })
        .await;

        match walked {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Directory walk panicked");
                Vec::new()
            }
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        has_accepted_extension(path, &self.tuning.extensions)
    }

    fn attach_monitor(&mut self, root: &Path) -> Result<(), WatchError> {
        self.detach_monitor();
        self.generation += 1;
        let options = MonitorOptions {
            stability_debounce: self.tuning.stability_debounce(),
            max_depth: self.tuning.max_depth,
        };
        self.monitor = Some(FsMonitor::attach(
            root,
            options,
            self.generation,
            self.commands.clone(),
        )?);
        Ok(())
    }

    fn detach_monitor(&mut self) {
        self.monitor = None;
    }

    fn start_watchdog(&mut self) {
        self.stop_watchdog();
        let cancel = CancellationToken::new();
        self.watchdog.spawn_ticker(self.commands.clone(), cancel.clone());
        self.watchdog_cancel = Some(cancel);
    }

    fn stop_watchdog(&mut self) {
        if let Some(cancel) = self.watchdog_cancel.take() {
            cancel.cancel();
        }
    }
}

impl Drop for WatchController {
    fn drop(&mut self) {
        self.stop_watchdog();
    }
}

/// Resolve `directory` and check it is a readable directory.
async fn validate_directory(directory: &Path) -> Result<PathBuf, WatchError> {
    let unavailable = |reason: String| WatchError::DirectoryUnavailable {
        path: directory.to_path_buf(),
        reason,
    };

    let root = normalize(directory).ok_or_else(|| unavailable("path does not resolve".to_string()))?;
    let metadata = tokio::fs::metadata(&root)
        .await
        .map_err(|e| unavailable(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(unavailable("not a directory".to_string()));
    }
    tokio::fs::read_dir(&root)
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    Ok(root)
}

/// Recursively collect regular files, honouring `max_depth` relative to
/// `root`. Unreadable directories are skipped.
fn collect_files_recursive(dir: &Path, root: &Path, max_depth: Option<usize>, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Failed to read directory");
            return;
        }
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let within_depth = match (max_depth, depth_below(root, &path)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(max), Some(depth)) => depth <= max,
        };

        if file_type.is_dir() {
            // files inside sit one level deeper than the directory itself
            if max_depth.is_none_or(|max| depth_below(root, &path).is_some_and(|d| d < max)) {
                collect_files_recursive(&path, root, max_depth, files);
            }
        } else if file_type.is_file() && within_depth {
            files.push(path);
        }
    }
}

/// Extension filter; an empty list accepts everything
fn has_accepted_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}
