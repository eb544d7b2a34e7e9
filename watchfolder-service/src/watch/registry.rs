//! Pending-task queue with a by-path index.
//!
//! The index covers queued tasks and the single active task; the active task
//! itself is held by the scheduler, which calls [`TaskRegistry::forget`] once
//! it is finished with it.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use super::paths::{is_within, path_key};
use super::task::{TaskId, WatchTask};

#[derive(Debug, Default)]
pub struct TaskRegistry {
    queue: VecDeque<WatchTask>,
    index: HashMap<PathBuf, TaskId>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A task for this normalized path is queued or active.
    #[cfg(test)]
    pub fn is_tracked(&self, normalized_path: &Path) -> bool {
        self.index.contains_key(&path_key(normalized_path))
    }

    /// Append a new task. Returns `false` (and drops the task) if its path is
    /// already tracked.
    pub fn insert(&mut self, task: WatchTask) -> bool {
        let key = path_key(&task.normalized_path);
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, task.id);
        self.queue.push_back(task);
        true
    }

    /// Pop the head. The path stays indexed until the caller forgets it.
    pub fn dequeue_next(&mut self) -> Option<WatchTask> {
        self.queue.pop_front()
    }

    /// Put a task back at the tail.
    pub fn requeue(&mut self, task: WatchTask) {
        self.index.insert(path_key(&task.normalized_path), task.id);
        self.queue.push_back(task);
    }

    /// Put a task back at the head.
    pub fn requeue_front(&mut self, task: WatchTask) {
        self.index.insert(path_key(&task.normalized_path), task.id);
        self.queue.push_front(task);
    }

    /// Drop the index entry of a task that is no longer queued.
    pub fn forget(&mut self, task: &WatchTask) {
        let key = path_key(&task.normalized_path);
        if self.index.get(&key) == Some(&task.id) {
            self.index.remove(&key);
        }
    }

    /// Remove every queued task at or below `dir`.
    pub fn remove_queued_under(&mut self, dir: &Path) -> Vec<WatchTask> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .queue
            .drain(..)
            .partition(|task| is_within(dir, &task.normalized_path));
        self.queue = kept.into();
        for task in &removed {
            self.index.remove(&path_key(&task.normalized_path));
        }
        removed
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchTask> {
        self.queue.iter()
    }

    /// Number of indexed paths (queued plus active).
    #[cfg(test)]
    pub fn tracked_count(&self) -> usize {
        self.index.len()
    }
}
