//! Single-flight dispatcher.
//!
//! [`Scheduler`] holds every piece of scheduling state and is driven
//! synchronously by the watch runtime. It never performs I/O: dispatches and
//! status events are queued as [`Effect`]s which the runtime drains after
//! each call.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::events::{DispatchRequest, Effect, WatchEvent, WatchPhase};
use super::paths::is_within;
use super::registry::TaskRegistry;
use super::retry::{DispatchOutcome, RetryAction, RetryPolicy};
use super::task::{TaskId, TaskOrigin, WatchTask};
use crate::error::WatchError;

/// What the scheduler believes about the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkerState {
    Free,
    Busy,
}

/// Progress of the in-flight task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActivePhase {
    /// Sent, not yet acknowledged
    Dispatched,
    /// Worker accepted it
    Running,
    /// Worker reported progress; only a terminal message is expected now
    AwaitingTerminal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveTask {
    #[serde(flatten)]
    pub task: WatchTask,
    pub phase: ActivePhase,
    pub dispatched_at: DateTime<Utc>,
}

/// A status message from the worker, already decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReport {
    Accepted,
    Busy,
    Progress,
    Error(String),
    /// Worker went idle; carries its result string.
    Idle(Option<String>),
}

/// Result string marking a successful import in an `idle` report.
pub const IDLE_SUCCESS: &str = "success";

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub max_attempts: u32,
    /// Free the worker when it reports `error`, without waiting for `idle`.
    pub error_frees_worker: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_attempts: super::retry::MAX_ATTEMPTS,
            error_frees_worker: true,
        }
    }
}

/// Point-in-time view for the API.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub enabled: bool,
    pub work_directory: Option<PathBuf>,
    pub suspended: bool,
    pub worker: WorkerState,
    pub worker_busy: bool,
    pub last_activity_at: DateTime<Utc>,
    pub active: Option<ActiveTask>,
    pub queue: Vec<WatchTask>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub struct Scheduler {
    enabled: bool,
    work_directory: Option<PathBuf>,
    suspended: bool,
    registry: TaskRegistry,
    active: Option<ActiveTask>,
    worker: WorkerState,
    /// Busy because the worker said so or is not attached, not inferred.
    worker_held: bool,
    /// Task the worker reported `error` on while it still holds the worker.
    errored: Option<TaskId>,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
    last_error: Option<String>,
    retry: RetryPolicy,
    error_frees_worker: bool,
    effects: Vec<Effect>,
}

impl Scheduler {
    /// The worker starts out `Busy` until it announces itself.
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            enabled: false,
            work_directory: None,
            suspended: false,
            registry: TaskRegistry::new(),
            active: None,
            worker: WorkerState::Busy,
            worker_held: false,
            errored: None,
            last_activity: Instant::now(),
            last_activity_at: Utc::now(),
            last_error: None,
            retry: RetryPolicy::new(options.max_attempts),
            error_frees_worker: options.error_frees_worker,
            effects: Vec::new(),
        }
    }

    // --- lifecycle -------------------------------------------------------

    /// Enable scheduling for a freshly validated directory.
    pub fn begin(&mut self, work_directory: PathBuf) {
        self.clear_work();
        self.enabled = true;
        self.work_directory = Some(work_directory);
    }

    /// Disable scheduling and drop all queued and active work. The worker
    /// belief is kept.
    pub fn reset(&mut self) {
        self.clear_work();
        self.enabled = false;
        self.work_directory = None;
    }

    fn clear_work(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(task_id = %active.task.id, "Dropping active task");
        }
        self.registry.clear();
        self.suspended = false;
        self.last_error = None;
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    // --- registry operations ---------------------------------------------

    /// Track a detected file. Returns `false` if the path is already queued
    /// or active, or if scheduling is disabled.
    pub fn enqueue(&mut self, file_path: PathBuf, normalized_path: PathBuf, origin: TaskOrigin) -> bool {
        if !self.enabled {
            return false;
        }
        let task = WatchTask::new(file_path, normalized_path, origin);
        let event = WatchEvent::for_task(&task, WatchPhase::Queued);
        if !self.registry.insert(task) {
            return false;
        }
        debug!(file = %event_path(&event), origin = %origin, "Queued file");
        self.effects.push(Effect::Event(event));
        self.maybe_dispatch();
        true
    }

    /// Cancel the task for `normalized_path`, or every task below it when it
    /// names a directory. Cancelling the active task frees the worker.
    pub fn remove(&mut self, normalized_path: &Path) -> bool {
        let mut cancelled = self.registry.remove_queued_under(normalized_path);

        let mut freed = false;
        if self
            .active
            .as_ref()
            .is_some_and(|active| is_within(normalized_path, &active.task.normalized_path))
            && let Some(active) = self.active.take()
        {
            self.registry.forget(&active.task);
            self.set_free();
            freed = true;
            cancelled.push(active.task);
        }

        let removed = !cancelled.is_empty();
        for task in cancelled {
            info!(task_id = %task.id, file = %task.file_path.display(), "Cancelled task");
            self.effects
                .push(Effect::Event(WatchEvent::for_task(&task, WatchPhase::Cancelled)));
        }
        if freed {
            self.maybe_dispatch();
        }
        removed
    }

    // --- worker protocol -------------------------------------------------

    /// Interpret a status message from the worker.
    pub fn handle_report(&mut self, task_id: TaskId, report: WorkerReport) {
        self.touch();

        if report == WorkerReport::Progress {
            self.worker = WorkerState::Busy;
        }

        let Some(active) = self.active.as_mut().filter(|active| active.task.id == task_id) else {
            if matches!(report, WorkerReport::Idle(_)) && self.errored == Some(task_id) {
                debug!(task_id = %task_id, "Worker idle after reporting an error");
                self.set_free();
                self.maybe_dispatch();
            } else {
                debug!(task_id = %task_id, ?report, "Status for a task that is not active");
            }
            return;
        };

        match report {
            WorkerReport::Accepted => {
                active.phase = ActivePhase::Running;
                self.worker = WorkerState::Busy;
            }
            WorkerReport::Progress => {
                active.phase = ActivePhase::AwaitingTerminal;
            }
            WorkerReport::Busy => {
                self.worker = WorkerState::Busy;
                if let Some(active) = self.active.take() {
                    let rejected = WatchError::DispatchRejected { task_id };
                    warn!(file = %active.task.file_path.display(), error = %rejected, "Dispatch rejected");
                    self.apply_outcome(active.task, DispatchOutcome::BusyRejected);
                }
            }
            WorkerReport::Error(reason) => {
                if self.error_frees_worker {
                    self.set_free();
                } else {
                    self.errored = Some(task_id);
                }
                if let Some(active) = self.active.take() {
                    let failure = WatchError::WorkerReportedFailure {
                        task_id,
                        reason: reason.clone(),
                    };
                    warn!(file = %active.task.file_path.display(), error = %failure, "Import failed");
                    self.apply_outcome(active.task, DispatchOutcome::Failed(reason));
                }
                self.maybe_dispatch();
            }
            WorkerReport::Idle(result) => {
                self.set_free();
                if let Some(active) = self.active.take() {
                    let outcome = match result {
                        Some(result) if result == IDLE_SUCCESS => DispatchOutcome::Success,
                        Some(result) => DispatchOutcome::Failed(result),
                        None => DispatchOutcome::Failed("worker went idle without a result".to_string()),
                    };
                    self.apply_outcome(active.task, outcome);
                }
                self.maybe_dispatch();
            }
        }
    }

    /// The worker announced it can take work.
    pub fn worker_available(&mut self) {
        self.touch();
        if self.active.is_none() {
            self.set_free();
            self.maybe_dispatch();
        }
    }

    /// The worker went away. An active task goes back to the head of the
    /// queue without counting as an attempt. Only `available` (or a fresh
    /// attachment) lifts this.
    pub fn worker_unavailable(&mut self) {
        self.worker = WorkerState::Busy;
        self.worker_held = true;
        if let Some(active) = self.active.take() {
            info!(task_id = %active.task.id, "Worker unavailable, returning task to queue head");
            self.registry.requeue_front(active.task);
        }
    }

    /// The dispatch for `task_id` could not be delivered.
    pub fn dispatch_undeliverable(&mut self, task_id: TaskId) {
        if self.active.as_ref().is_some_and(|active| active.task.id == task_id) {
            self.worker_unavailable();
        }
    }

    // --- watchdog hooks --------------------------------------------------

    /// Take back a task the worker has gone silent on and hand the head of
    /// the queue out again.
    pub fn reclaim_stalled(&mut self, idle: Duration) {
        if let Some(active) = self.active.take() {
            let stall = WatchError::WorkerStall {
                task_id: active.task.id,
                idle_secs: idle.as_secs(),
            };
            warn!(file = %active.task.file_path.display(), error = %stall, "Reclaiming stalled task");
            self.last_error = Some(stall.to_string());
            self.effects.push(Effect::Event(
                WatchEvent::for_task(&active.task, WatchPhase::Stalled).with_error(stall.to_string()),
            ));
            self.registry.requeue_front(active.task);
        }
        self.set_free();
        self.maybe_dispatch();
    }

    /// Drop a busy belief that nothing has confirmed for too long. A worker
    /// that declared itself unavailable stays busy.
    pub fn release_stale_busy(&mut self) {
        if self.active.is_none() && !self.worker_held {
            info!("No worker activity while marked busy, assuming it is free");
            self.set_free();
            self.maybe_dispatch();
        }
    }

    // --- dispatch --------------------------------------------------------

    /// Hand the head of the queue to the worker if nothing blocks it.
    pub fn maybe_dispatch(&mut self) {
        if !self.enabled || self.worker == WorkerState::Busy || self.active.is_some() {
            return;
        }
        let Some(task) = self.registry.dequeue_next() else {
            return;
        };

        self.touch();
        self.worker = WorkerState::Busy;
        info!(task_id = %task.id, file = %task.file_path.display(), attempts = task.attempts, "Dispatching");
        self.effects
            .push(Effect::Event(WatchEvent::for_task(&task, WatchPhase::Dispatched)));
        self.effects.push(Effect::Dispatch(DispatchRequest {
            task_id: task.id,
            file_path: task.file_path.clone(),
        }));
        self.active = Some(ActiveTask {
            task,
            phase: ActivePhase::Dispatched,
            dispatched_at: Utc::now(),
        });
    }

    fn apply_outcome(&mut self, mut task: WatchTask, outcome: DispatchOutcome) {
        match self.retry.on_dispatch_outcome(&mut task, &outcome) {
            RetryAction::Discard => {
                info!(task_id = %task.id, file = %task.file_path.display(), "Import completed");
                self.registry.forget(&task);
                self.effects
                    .push(Effect::Event(WatchEvent::for_task(&task, WatchPhase::Completed)));
            }
            RetryAction::Requeue => {
                let reason = task.last_error.clone().unwrap_or_default();
                self.last_error = Some(reason.clone());
                self.effects.push(Effect::Event(
                    WatchEvent::for_task(&task, WatchPhase::DispatchRetry).with_error(reason),
                ));
                self.registry.requeue(task);
            }
            RetryAction::Abandon => {
                let ceiling = WatchError::RetryCeilingExceeded {
                    path: task.file_path.clone(),
                    attempts: task.attempts,
                    last_error: task.last_error.clone().unwrap_or_default(),
                };
                warn!(task_id = %task.id, error = %ceiling, "Abandoning file");
                self.last_error = Some(ceiling.to_string());
                self.registry.forget(&task);
                self.effects.push(Effect::Event(
                    WatchEvent::for_task(&task, WatchPhase::Abandoned).with_error(ceiling.to_string()),
                ));
            }
        }
    }

    fn set_free(&mut self) {
        self.worker = WorkerState::Free;
        self.worker_held = false;
        self.errored = None;
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }

    // --- accessors -------------------------------------------------------

    /// Take the effects queued since the last drain.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn work_directory(&self) -> Option<&Path> {
        self.work_directory.as_deref()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker
    }

    pub fn is_worker_held(&self) -> bool {
        self.worker_held
    }

    pub fn active(&self) -> Option<&ActiveTask> {
        self.active.as_ref()
    }

    pub fn queue_len(&self) -> usize {
        self.registry.len()
    }

    #[cfg(test)]
    pub fn is_tracked(&self, normalized_path: &Path) -> bool {
        self.registry.is_tracked(normalized_path)
    }

    /// Time since the worker last showed any sign of life.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            enabled: self.enabled,
            work_directory: self.work_directory.clone(),
            suspended: self.suspended,
            worker: self.worker,
            worker_busy: self.worker == WorkerState::Busy,
            last_activity_at: self.last_activity_at,
            active: self.active.clone(),
            queue: self.registry.iter().cloned().collect(),
            last_error: self.last_error.clone(),
        }
    }
}

fn event_path(event: &WatchEvent) -> String {
    event
        .file_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}
