//! Runtime job record: static [`JobSpec`] plus the mutable state the action
//! loop drives.
//!
//! The status counter lives in an atomic so background tasks can compare it
//! against their snapshot without touching the state lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::types::{JobSnapshot, JobSpec, JobStatus};

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    host: Option<String>,
    failed_spawns: u32,
    failures: u32,
    next_run: Option<DateTime<Utc>>,
}

/// One schedulable unit of work. Created once per scheduler, never removed.
#[derive(Debug)]
pub struct Job {
    spec: JobSpec,
    status_counter: AtomicU64,
    state: RwLock<JobState>,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            spec,
            status_counter: AtomicU64::new(0),
            state: RwLock::new(JobState {
                status: JobStatus::Pending,
                host: None,
                failed_spawns: 0,
                failures: 0,
                next_run: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    pub fn host(&self) -> Option<String> {
        self.read().host.clone()
    }

    pub fn status_counter(&self) -> u64 {
        self.status_counter.load(Ordering::Acquire)
    }

    pub fn failed_spawns(&self) -> u32 {
        self.read().failed_spawns
    }

    pub fn failures(&self) -> u32 {
        self.read().failures
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.read();
        JobSnapshot {
            name: self.spec.name.clone(),
            status: state.status,
            host: state.host.clone(),
            status_counter: self.status_counter(),
            failed_spawns: state.failed_spawns,
            failures: state.failures,
            next_run: state.next_run,
        }
    }

    /// Set a new status and bump the counter. Returns the new counter value.
    ///
    /// Both happen under the write lock so a snapshot never pairs a new status
    /// with an old counter.
    pub(crate) fn update(&self, status: JobStatus) -> u64 {
        let mut state = self.write();
        state.status = status;
        match status {
            JobStatus::Pending => {
                state.failed_spawns = 0;
                state.failures = 0;
            }
            JobStatus::PendingAboutToRun => state.failed_spawns = 0,
            JobStatus::Succeeded => state.failures = 0,
            _ => {}
        }
        self.status_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn update_host(&self, host: Option<String>) {
        self.write().host = host;
    }

    pub(crate) fn increment_failed_spawns(&self) -> u32 {
        let mut state = self.write();
        state.failed_spawns += 1;
        state.failed_spawns
    }

    pub(crate) fn increment_failures(&self) -> u32 {
        let mut state = self.write();
        state.failures += 1;
        state.failures
    }

    pub(crate) fn set_next_run(&self, next_run: Option<DateTime<Utc>>) {
        self.write().next_run = next_run;
    }

    // A panicking handler must not brick the job for every later action.
    fn read(&self) -> RwLockReadGuard<'_, JobState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.spec.name, self.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_pending_with_zero_counter() {
        let job = Job::new(JobSpec::new("a", "true"));
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.status_counter(), 0);
        assert!(job.host().is_none());
    }

    #[test]
    fn every_update_bumps_counter() {
        let job = Job::new(JobSpec::new("a", "true"));
        assert_eq!(job.update(JobStatus::PendingSearchingForHost), 1);
        assert_eq!(job.update(JobStatus::PendingAboutToRun), 2);
        // Same status again still counts as a transition.
        assert_eq!(job.update(JobStatus::PendingAboutToRun), 3);
        assert_eq!(job.snapshot().status_counter, 3);
    }

    #[test]
    fn reset_clears_backoff_counters() {
        let job = Job::new(JobSpec::new("a", "true"));
        job.increment_failed_spawns();
        job.increment_failures();
        job.increment_failures();
        assert_eq!(job.failures(), 2);

        job.update(JobStatus::Pending);
        assert_eq!(job.failed_spawns(), 0);
        assert_eq!(job.failures(), 0);
    }

    #[test]
    fn host_assignment_clears_failed_spawns_only() {
        let job = Job::new(JobSpec::new("a", "true"));
        job.increment_failed_spawns();
        job.increment_failures();
        job.update(JobStatus::PendingAboutToRun);
        assert_eq!(job.failed_spawns(), 0);
        assert_eq!(job.failures(), 1);
    }
}
