//! Periodic liveness check for the scheduler.

use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::coordinator::{Scheduler, WorkerState};
use super::runtime::WatchCommand;

/// What a tick should do to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Worker is free and idle; try to dispatch.
    Nudge,
    /// The active task has been silent past the threshold.
    ReclaimStalled(Duration),
    /// Worker inferred busy with nothing in flight past the threshold.
    ReleaseStaleBusy,
    Wait,
}

#[derive(Debug, Clone, Copy)]
pub struct IdleWatchdog {
    interval: Duration,
    stall_ticks: u32,
}

impl IdleWatchdog {
    pub fn new(interval: Duration, stall_ticks: u32) -> Self {
        Self {
            interval,
            stall_ticks: stall_ticks.max(1),
        }
    }

    /// Silence longer than this counts as a stall.
    pub fn threshold(&self) -> Duration {
        self.interval * self.stall_ticks
    }

    pub fn evaluate(&self, scheduler: &Scheduler, now: Instant) -> WatchdogVerdict {
        let idle = scheduler.idle_for(now);
        match (scheduler.worker_state(), scheduler.active()) {
            (WorkerState::Free, None) => WatchdogVerdict::Nudge,
            (WorkerState::Busy, Some(_)) if idle > self.threshold() => {
                WatchdogVerdict::ReclaimStalled(idle)
            }
            (WorkerState::Busy, None) if !scheduler.is_worker_held() && idle > self.threshold() => {
                WatchdogVerdict::ReleaseStaleBusy
            }
            _ => WatchdogVerdict::Wait,
        }
    }

    /// Evaluate and act on one tick.
    pub fn tick(&self, scheduler: &mut Scheduler, now: Instant) -> WatchdogVerdict {
        let verdict = self.evaluate(scheduler, now);
        match verdict {
            WatchdogVerdict::Nudge => scheduler.maybe_dispatch(),
            WatchdogVerdict::ReclaimStalled(idle) => scheduler.reclaim_stalled(idle),
            WatchdogVerdict::ReleaseStaleBusy => scheduler.release_stale_busy(),
            WatchdogVerdict::Wait => {}
        }
        verdict
    }

    /// Post a tick into the runtime mailbox every interval until cancelled.
    pub fn spawn_ticker(
        &self,
        commands: UnboundedSender<WatchCommand>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let period = self.interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if commands.send(WatchCommand::WatchdogTick).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Watchdog ticker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::coordinator::{SchedulerOptions, WorkerReport};
    use crate::watch::task::TaskOrigin;
    use std::path::PathBuf;

    fn watchdog() -> IdleWatchdog {
        IdleWatchdog::new(Duration::from_secs(30), 4)
    }

    fn scheduler() -> Scheduler {
        let mut scheduler = Scheduler::new(SchedulerOptions::default());
        scheduler.begin(PathBuf::from("/w"));
        scheduler
    }

    fn past_threshold(watchdog: &IdleWatchdog) -> Instant {
        Instant::now() + watchdog.threshold() + Duration::from_secs(1)
    }

    #[test]
    fn test_threshold() {
        assert_eq!(watchdog().threshold(), Duration::from_secs(120));
        assert_eq!(
            IdleWatchdog::new(Duration::from_secs(5), 0).threshold(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_free_and_idle_nudges() {
        let watchdog = watchdog();
        let mut scheduler = scheduler();
        scheduler.worker_available();
        assert_eq!(watchdog.evaluate(&scheduler, Instant::now()), WatchdogVerdict::Nudge);
    }

    #[test]
    fn test_recent_activity_waits() {
        let watchdog = watchdog();
        let mut scheduler = scheduler();
        scheduler.worker_available();
        scheduler.enqueue("/w/a".into(), "/w/a".into(), TaskOrigin::Watch);
        assert_eq!(watchdog.evaluate(&scheduler, Instant::now()), WatchdogVerdict::Wait);
    }

    #[test]
    fn test_stalled_task_is_reclaimed_and_redispatched() {
        let watchdog = watchdog();
        let mut scheduler = scheduler();
        scheduler.worker_available();
        scheduler.enqueue("/w/a".into(), "/w/a".into(), TaskOrigin::Watch);
        scheduler.enqueue("/w/b".into(), "/w/b".into(), TaskOrigin::Watch);
        let stalled = scheduler.active().unwrap().task.id;

        let verdict = watchdog.tick(&mut scheduler, past_threshold(&watchdog));
        assert!(matches!(verdict, WatchdogVerdict::ReclaimStalled(_)));
        // reclaimed task is back at the head and goes out again first
        assert_eq!(scheduler.active().unwrap().task.id, stalled);
        assert_eq!(scheduler.queue_len(), 1);
    }

    #[test]
    fn test_stale_busy_belief_is_dropped() {
        let watchdog = watchdog();
        let mut scheduler = scheduler();
        scheduler.enqueue("/w/a".into(), "/w/a".into(), TaskOrigin::Scan);
        assert!(scheduler.active().is_none());

        assert_eq!(
            watchdog.tick(&mut scheduler, past_threshold(&watchdog)),
            WatchdogVerdict::ReleaseStaleBusy
        );
        assert!(scheduler.active().is_some());
    }

    #[test]
    fn test_unavailable_worker_is_never_released() {
        let watchdog = watchdog();
        let mut scheduler = scheduler();
        scheduler.worker_available();
        scheduler.worker_unavailable();
        scheduler.enqueue("/w/a".into(), "/w/a".into(), TaskOrigin::Watch);
        scheduler.enqueue("/w/b".into(), "/w/b".into(), TaskOrigin::Watch);
        scheduler.drain_effects();

        for _ in 0..5 {
            assert_eq!(
                watchdog.tick(&mut scheduler, past_threshold(&watchdog)),
                WatchdogVerdict::Wait
            );
        }
        assert!(scheduler.active().is_none());
        assert_eq!(scheduler.queue_len(), 2);
        assert!(scheduler.drain_effects().is_empty());

        scheduler.worker_available();
        assert_eq!(scheduler.active().unwrap().task.attempts, 0);
    }

    #[test]
    fn test_detached_worker_is_not_redispatched_each_tick() {
        let watchdog = watchdog();
        let mut scheduler = scheduler();
        scheduler.enqueue("/w/a".into(), "/w/a".into(), TaskOrigin::Scan);

        // startup belief expires and the dispatch finds nobody attached
        watchdog.tick(&mut scheduler, past_threshold(&watchdog));
        let id = scheduler.active().unwrap().task.id;
        scheduler.dispatch_undeliverable(id);
        scheduler.drain_effects();

        for _ in 0..3 {
            assert_eq!(
                watchdog.tick(&mut scheduler, past_threshold(&watchdog)),
                WatchdogVerdict::Wait
            );
        }
        assert!(scheduler.drain_effects().is_empty());
        assert_eq!(scheduler.queue_len(), 1);
    }

    #[test]
    fn test_progress_resets_stall_clock() {
        let watchdog = watchdog();
        let mut scheduler = scheduler();
        scheduler.worker_available();
        scheduler.enqueue("/w/a".into(), "/w/a".into(), TaskOrigin::Watch);
        let id = scheduler.active().unwrap().task.id;

        let later = Instant::now() + watchdog.threshold() / 2;
        scheduler.handle_report(id, WorkerReport::Progress);
        assert_eq!(watchdog.evaluate(&scheduler, later), WatchdogVerdict::Wait);
    }

    #[tokio::test]
    async fn test_ticker_posts_ticks_until_cancelled() {
        let watchdog = IdleWatchdog::new(Duration::from_millis(10), 1);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = watchdog.spawn_ticker(tx, cancel.clone());

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(matches!(first, Some(WatchCommand::WatchdogTick)));

        cancel.cancel();
        handle.await.unwrap();
    }
}
