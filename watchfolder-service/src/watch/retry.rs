use super::task::WatchTask;

/// Default number of unsuccessful dispatches before a file is abandoned.
pub const MAX_ATTEMPTS: u32 = 3;

/// What happened to one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    BusyRejected,
    Failed(String),
}

/// What the scheduler should do with the task next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Discard,
    Requeue,
    Abandon,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Record the outcome on the task and decide its fate.
    pub fn on_dispatch_outcome(&self, task: &mut WatchTask, outcome: &DispatchOutcome) -> RetryAction {
        let reason = match outcome {
            DispatchOutcome::Success => return RetryAction::Discard,
            DispatchOutcome::BusyRejected => "worker busy".to_string(),
            DispatchOutcome::Failed(reason) => reason.clone(),
        };

        task.attempts += 1;
        task.last_error = Some(reason);

        if task.attempts >= self.max_attempts {
            RetryAction::Abandon
        } else {
            RetryAction::Requeue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::task::TaskOrigin;

    fn task() -> WatchTask {
        WatchTask::new("/w/a".into(), "/w/a".into(), TaskOrigin::Scan)
    }

    #[test]
    fn test_success_discards_without_counting() {
        let policy = RetryPolicy::default();
        let mut task = task();
        assert_eq!(
            policy.on_dispatch_outcome(&mut task, &DispatchOutcome::Success),
            RetryAction::Discard
        );
        assert_eq!(task.attempts, 0);
    }

    #[test]
    fn test_abandons_on_third_failure() {
        let policy = RetryPolicy::default();
        let mut task = task();
        let failed = DispatchOutcome::Failed("corrupt".to_string());

        assert_eq!(policy.on_dispatch_outcome(&mut task, &failed), RetryAction::Requeue);
        assert_eq!(
            policy.on_dispatch_outcome(&mut task, &DispatchOutcome::BusyRejected),
            RetryAction::Requeue
        );
        assert_eq!(task.last_error.as_deref(), Some("worker busy"));
        assert_eq!(policy.on_dispatch_outcome(&mut task, &failed), RetryAction::Abandon);
        assert_eq!(task.attempts, 3);
        assert_eq!(task.last_error.as_deref(), Some("corrupt"));
    }

    #[test]
    fn test_max_attempts_floor_is_one() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts(), 1);
        let mut task = task();
        assert_eq!(
            policy.on_dispatch_outcome(&mut task, &DispatchOutcome::BusyRejected),
            RetryAction::Abandon
        );
    }
}
