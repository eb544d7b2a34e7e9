//! Debounced filesystem monitor for the watched directory.
//!
//! Raw notify events are reduced to add / change / unlink and posted into the
//! runtime mailbox tagged with the attach generation, so events from a
//! monitor that has since been detached can be recognised and dropped.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_full::notify::event::{ModifyKind, RenameMode};
use notify_debouncer_full::notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache, new_debouncer};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::paths::depth_below;
use super::runtime::WatchCommand;
use crate::error::WatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FsEventKind {
    Add,
    Change,
    Unlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

impl FsEvent {
    fn new(kind: FsEventKind, path: &Path) -> Self {
        Self {
            kind,
            path: path.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    /// How long a file must be quiet before its events are delivered.
    pub stability_debounce: Duration,
    /// Deepest directory level reported; files directly in the root are 0.
    pub max_depth: Option<usize>,
}

/// A live watch on one directory. Dropping it stops the watch.
pub struct FsMonitor {
    root: PathBuf,
    generation: u64,
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl fmt::Debug for FsMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsMonitor")
            .field("root", &self.root)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl FsMonitor {
    pub fn attach(
        root: &Path,
        options: MonitorOptions,
        generation: u64,
        commands: UnboundedSender<WatchCommand>,
    ) -> Result<Self, WatchError> {
        let event_root = root.to_path_buf();
        let max_depth = options.max_depth;

        let mut debouncer = new_debouncer(
            options.stability_debounce,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        for fs_event in classify(&event) {
                            if !within_depth(&event_root, &fs_event, max_depth) {
                                continue;
                            }
                            debug!(kind = %fs_event.kind, path = %fs_event.path.display(), "Filesystem event");
                            // Receiver gone means the runtime is shutting down
                            let _ = commands.send(WatchCommand::Fs {
                                generation,
                                event: fs_event,
                            });
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "Filesystem watcher error");
                    }
                }
            },
        )
        .map_err(|source| WatchError::MonitorInit {
            path: root.to_path_buf(),
            source,
        })?;

        debouncer
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::MonitorInit {
                path: root.to_path_buf(),
                source,
            })?;

        info!(path = %root.display(), generation, "Filesystem monitor attached");

        Ok(Self {
            root: root.to_path_buf(),
            generation,
            _debouncer: debouncer,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for FsMonitor {
    fn drop(&mut self) {
        debug!(path = %self.root.display(), generation = self.generation, "Filesystem monitor detached");
    }
}

fn classify(event: &DebouncedEvent) -> Vec<FsEvent> {
    let paths = &event.event.paths;
    match event.event.kind {
        EventKind::Create(_) => paths.iter().map(|p| FsEvent::new(FsEventKind::Add, p)).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.iter().map(|p| FsEvent::new(FsEventKind::Add, p)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().map(|p| FsEvent::new(FsEventKind::Unlink, p)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match paths.as_slice() {
            [from, to] => vec![
                FsEvent::new(FsEventKind::Unlink, from),
                FsEvent::new(FsEventKind::Add, to),
            ],
            _ => Vec::new(),
        },
        // Other rename flavours carry no direction; let the stat decide
        EventKind::Modify(ModifyKind::Name(_)) => {
            paths.iter().map(|p| FsEvent::new(FsEventKind::Change, p)).collect()
        }
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Metadata(_) | ModifyKind::Any) => {
            paths.iter().map(|p| FsEvent::new(FsEventKind::Change, p)).collect()
        }
        EventKind::Remove(_) => paths.iter().map(|p| FsEvent::new(FsEventKind::Unlink, p)).collect(),
        _ => Vec::new(),
    }
}

fn within_depth(root: &Path, event: &FsEvent, max_depth: Option<usize>) -> bool {
    match (max_depth, depth_below(root, &event.path)) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(max), Some(depth)) => depth <= max,
    }
}
