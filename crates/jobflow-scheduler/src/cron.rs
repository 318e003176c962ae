//! Cron dispatcher: turns job schedules into `RunFromSchedule` actions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jobflow_core::{compute_next_run, Schedule};
use tokio::sync::watch;
use tracing::{error, info};

use crate::{
    action::{Action, ActionKind},
    job::Job,
    queue::ActionQueue,
};

#[derive(Debug)]
struct CronEntry {
    job: Arc<Job>,
    schedule: Schedule,
    next_run: Option<DateTime<Utc>>,
}

/// Polls every scheduled job at a fixed cadence and enqueues a
/// `RunFromSchedule` action for each one whose trigger time has arrived.
///
/// A trigger missed while the dispatcher was not polling fires once, then the
/// next trigger is computed from the current time.
#[derive(Debug)]
pub struct CronDispatcher {
    entries: Vec<CronEntry>,
    queue: ActionQueue,
    poll_interval: Duration,
}

impl CronDispatcher {
    /// Register every job that has a schedule. Must be done once per job set,
    /// otherwise scheduled jobs would be triggered twice.
    pub fn new(
        jobs: &[Arc<Job>],
        queue: ActionQueue,
        poll_interval: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let entries = jobs
            .iter()
            .filter_map(|job| {
                let schedule = job.spec().schedule.clone()?;
                let next_run = compute_next_run(&schedule, now);
                job.set_next_run(next_run);
                info!(job = %job.name(), %schedule, next_run = ?next_run, "schedule registered");
                Some(CronEntry {
                    job: Arc::clone(job),
                    schedule,
                    next_run,
                })
            })
            .collect();

        Self {
            entries,
            queue,
            poll_interval,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fire all entries due at `now`. Returns how many actions were enqueued.
    pub fn tick(&mut self, now: DateTime<Utc>) -> usize {
        let mut fired = 0;
        for entry in &mut self.entries {
            let Some(due) = entry.next_run else { continue };
            if due > now {
                continue;
            }

            info!(job = %entry.job.name(), "running job from its schedule");
            match self
                .queue
                .enqueue(Action::new(ActionKind::RunFromSchedule, &entry.job))
            {
                Ok(()) => fired += 1,
                Err(e) => error!(job = %entry.job.name(), "cannot enqueue scheduled run: {e}"),
            }

            entry.next_run = compute_next_run(&entry.schedule, now);
            entry.job.set_next_run(entry.next_run);
            info!(job = %entry.job.name(), next_run = ?entry.next_run, "next run");
        }
        fired
    }

    /// Poll loop. Runs until `shutdown` broadcasts `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(jobs = self.entries.len(), "cron dispatcher started");
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("cron dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }
}
