use std::time::Duration;

use chrono::{DateTime, Utc};
use jobflow_core::{JobDefinition, Schedule};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a scheduled job.
///
/// `Succeeded`, `Failed` and `Killed` are resting states: a job in any of them
/// can be run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Idle, waiting for a manual, scheduled or cascading run.
    Pending,
    /// A `Run` is looking for a host with enough free RAM.
    PendingSearchingForHost,
    /// No host had enough free RAM on the last search.
    PendingNoHostFound,
    /// Sleeping before the next host search.
    PendingWaitingToRetry,
    /// Host reserved, `Spawn` queued.
    PendingAboutToRun,
    /// The job process is executing.
    Running,
    Succeeded,
    Failed,
    /// Failed, sleeping before a rerun.
    FailedWaitingToRerun,
    Killed,
}

impl JobStatus {
    /// States from which a `Run` action may start the job.
    pub fn is_runnable(self) -> bool {
        matches!(
            self,
            JobStatus::Pending
                | JobStatus::PendingWaitingToRetry
                | JobStatus::Killed
                | JobStatus::Failed
                | JobStatus::FailedWaitingToRerun
                | JobStatus::Succeeded
        )
    }

    /// States whose `min_ram` counts against the assigned host.
    pub fn holds_host(self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::PendingAboutToRun)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::PendingSearchingForHost => "pending_searching_for_host",
            JobStatus::PendingNoHostFound => "pending_no_host_found",
            JobStatus::PendingWaitingToRetry => "pending_waiting_to_retry",
            JobStatus::PendingAboutToRun => "pending_about_to_run",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::FailedWaitingToRerun => "failed_waiting_to_rerun",
            JobStatus::Killed => "killed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "pending_searching_for_host" => Ok(JobStatus::PendingSearchingForHost),
            "pending_no_host_found" => Ok(JobStatus::PendingNoHostFound),
            "pending_waiting_to_retry" => Ok(JobStatus::PendingWaitingToRetry),
            "pending_about_to_run" => Ok(JobStatus::PendingAboutToRun),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "failed_waiting_to_rerun" => Ok(JobStatus::FailedWaitingToRerun),
            "killed" => Ok(JobStatus::Killed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Result reported by a [`crate::runner::JobRunner`] for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

/// Static configuration of a job, immutable once the scheduler is built.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Unique key in the job table.
    pub name: String,
    /// Opaque payload for the runner; the subprocess runner executes it via `sh -c`.
    pub command: String,
    /// Jobs whose success gates this one.
    pub depends_on: Vec<String>,
    pub min_ram: f64,
    /// Delay before each successive rerun after a failed execution.
    pub rerun_delays: Vec<Duration>,
    pub schedule: Option<Schedule>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            depends_on: Vec::new(),
            min_ram: 0.0,
            rerun_delays: Vec::new(),
            schedule: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn min_ram(mut self, ram: f64) -> Self {
        self.min_ram = ram;
        self
    }

    pub fn rerun_delays(mut self, delays: Vec<Duration>) -> Self {
        self.rerun_delays = delays;
        self
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }
}

impl From<&JobDefinition> for JobSpec {
    fn from(def: &JobDefinition) -> Self {
        Self {
            name: def.name.clone(),
            command: def.command.clone(),
            depends_on: def.depends_on.clone(),
            min_ram: def.min_ram,
            rerun_delays: def
                .rerun_delays_secs
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
            schedule: def.schedule.clone(),
        }
    }
}

/// Point-in-time copy of a job's runtime state, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: String,
    pub status: JobStatus,
    pub host: Option<String>,
    /// Bumped on every status change.
    pub status_counter: u64,
    /// Consecutive host searches that found no capacity.
    pub failed_spawns: u32,
    /// Consecutive failed executions.
    pub failures: u32,
    pub next_run: Option<DateTime<Utc>>,
}
