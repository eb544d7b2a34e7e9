//! Directory watching and single-flight import scheduling.
//!
//! - `paths`: path normalization and containment checks
//! - `registry`: FIFO queue plus the set of tracked paths
//! - `retry`: attempt counting and the retry ceiling
//! - `coordinator`: the scheduler state machine
//! - `watchdog`: idle detection for a silent worker
//! - `monitor`: filesystem notifications
//! - `lifecycle`: start / stop / suspend / resume of a watch
//! - `runtime`: the task that owns all of the above

mod coordinator;
mod events;
mod lifecycle;
mod monitor;
pub mod paths;
mod registry;
mod retry;
mod runtime;
mod task;
mod watchdog;

pub use coordinator::{SchedulerSnapshot, WorkerReport};
pub use events::{DispatchRequest, WatchEvent, WatchPhase};
pub use retry::MAX_ATTEMPTS;
pub use runtime::{EffectSink, WatchHandle, spawn_watch_runtime};
pub use task::TaskId;
