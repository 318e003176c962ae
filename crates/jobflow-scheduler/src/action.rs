use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::job::Job;

/// What an [`Action`] asks the action loop to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Return the job to `pending`, whatever its state.
    Reset,
    /// Terminate a running or about-to-run job.
    Kill,
    /// Find a host and start the job.
    Run,
    /// Like `Run`, but only if every dependency has succeeded.
    RunFromSchedule,
    /// Launch the job process on its reserved host.
    Spawn,
    /// Sleep, then search for a host again.
    RetryAfterDelay { delay: Duration },
    /// Sleep, then rerun a failed job.
    RerunAfterDelay { delay: Duration },
    SetCompletedSuccess,
    SetCompletedFailure,
    /// Exit the action loop.
    Stop,
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Reset => "reset",
            ActionKind::Kill => "kill",
            ActionKind::Run => "run",
            ActionKind::RunFromSchedule => "run_from_schedule",
            ActionKind::Spawn => "spawn",
            ActionKind::RetryAfterDelay { .. } => "retry_after_delay",
            ActionKind::RerunAfterDelay { .. } => "rerun_after_delay",
            ActionKind::SetCompletedSuccess => "set_completed_success",
            ActionKind::SetCompletedFailure => "set_completed_failure",
            ActionKind::Stop => "stop",
        }
    }
}

/// Outcome annotation written by the handler once an action is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Completed(Option<String>),
    Aborted(Option<String>),
}

impl ActionStatus {
    pub(crate) fn completed() -> Self {
        ActionStatus::Completed(None)
    }

    pub(crate) fn completed_with(detail: impl Into<String>) -> Self {
        ActionStatus::Completed(Some(detail.into()))
    }

    pub(crate) fn aborted() -> Self {
        ActionStatus::Aborted(None)
    }

    pub(crate) fn aborted_with(reason: impl Into<String>) -> Self {
        ActionStatus::Aborted(Some(reason.into()))
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ActionStatus::Completed(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, ActionStatus::Aborted(_))
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Completed(None) => write!(f, "completed"),
            ActionStatus::Completed(Some(detail)) => write!(f, "completed ({detail})"),
            ActionStatus::Aborted(None) => write!(f, "aborted"),
            ActionStatus::Aborted(Some(reason)) => write!(f, "aborted ({reason})"),
        }
    }
}

/// A queued request to transition one job.
///
/// The job's status counter is captured at creation; if the job has moved on
/// by the time the action is dequeued, the action is dropped unprocessed.
#[derive(Debug)]
pub struct Action {
    pub id: Uuid,
    pub kind: ActionKind,
    /// `None` only for [`ActionKind::Stop`].
    pub job: Option<Arc<Job>>,
    pub status_counter_snapshot: u64,
    pub status: Option<ActionStatus>,
}

impl Action {
    pub fn new(kind: ActionKind, job: &Arc<Job>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status_counter_snapshot: job.status_counter(),
            job: Some(Arc::clone(job)),
            status: None,
        }
    }

    pub fn stop() -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: ActionKind::Stop,
            job: None,
            status_counter_snapshot: 0,
            status: None,
        }
    }

    /// True when the target job's counter no longer matches the snapshot.
    pub fn is_stale(&self) -> bool {
        self.job
            .as_ref()
            .is_some_and(|job| job.status_counter() != self.status_counter_snapshot)
    }

    pub fn job_name(&self) -> Option<&str> {
        self.job.as_deref().map(Job::name)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, self.job_name()) {
            (
                ActionKind::RetryAfterDelay { delay } | ActionKind::RerunAfterDelay { delay },
                Some(name),
            ) => write!(f, "{}({name}, {delay:?})", self.kind.name()),
            (_, Some(name)) => write!(f, "{}({name})", self.kind.name()),
            (_, None) => write!(f, "{}", self.kind.name()),
        }
    }
}
