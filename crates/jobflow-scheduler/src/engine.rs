use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use jobflow_core::{
    config::{DEFAULT_HOST, DEFAULT_HOST_RAM, DEFAULT_MAX_PARALLEL_RUNS, DEFAULT_POLL_INTERVAL_MS},
    HostDefinition, JobflowConfig,
};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    action::{Action, ActionKind, ActionStatus},
    cron::CronDispatcher,
    error::{Result, SchedulerError},
    graph::DependencyGraph,
    hosts::HostTable,
    job::Job,
    queue::{self, ActionQueue},
    runner::{JobRunner, SubprocessRunner},
    types::{JobOutcome, JobSnapshot, JobSpec, JobStatus},
};

/// Construction parameters that are not part of the job set.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub name: String,
    /// Host name → total RAM. Searched in this order.
    pub hosts: Vec<HostDefinition>,
    /// Backoff between host searches when no host has room, applied to every job.
    pub retry_delays: Vec<Duration>,
    pub poll_interval: Duration,
    pub max_parallel_runs: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            name: jobflow_core::config::DEFAULT_SCHEDULER_NAME.to_string(),
            hosts: vec![HostDefinition {
                name: DEFAULT_HOST.to_string(),
                ram: DEFAULT_HOST_RAM,
            }],
            retry_delays: Vec::new(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_parallel_runs: DEFAULT_MAX_PARALLEL_RUNS,
        }
    }
}

impl From<&JobflowConfig> for SchedulerOptions {
    fn from(config: &JobflowConfig) -> Self {
        Self {
            name: config.scheduler.name.clone(),
            hosts: config.effective_hosts(),
            retry_delays: config
                .scheduler
                .retry_delays_secs
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
            poll_interval: Duration::from_millis(config.scheduler.poll_interval_ms),
            max_parallel_runs: config.scheduler.max_parallel_runs,
        }
    }
}

/// Handles of the two long-lived scheduler tasks. Either is `None` when it
/// was not started by this call.
pub struct SchedulerTasks {
    pub queue: Option<JoinHandle<()>>,
    pub cron: Option<JoinHandle<()>>,
}

struct RunningProcess {
    status_counter: u64,
    cancel: CancellationToken,
}

struct Inner {
    name: String,
    jobs: Vec<Arc<Job>>,
    lookup: HashMap<String, Arc<Job>>,
    graph: DependencyGraph,
    hosts: HostTable,
    retry_delays: Vec<Duration>,
    queue: ActionQueue,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Action>>,
    runner: Arc<dyn JobRunner>,
    running: Mutex<HashMap<String, RunningProcess>>,
    run_slots: Arc<Semaphore>,
    loop_started: AtomicBool,
    cron: Mutex<Option<CronDispatcher>>,
}

/// In-memory job orchestrator.
///
/// Every job state change goes through one FIFO of [`Action`]s consumed by a
/// single loop ([`Scheduler::process_queue`]). Job processes and backoff
/// timers run on their own tasks and only ever report back by enqueuing
/// further actions. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Build a scheduler over `specs`. Nothing runs until [`Scheduler::start`]
    /// is called or actions are processed by hand.
    pub fn new(
        options: SchedulerOptions,
        specs: Vec<JobSpec>,
        runner: Arc<dyn JobRunner>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(SchedulerError::DuplicateJob {
                    name: spec.name.clone(),
                });
            }
        }
        let graph = DependencyGraph::build(&specs)?;
        let hosts = HostTable::new(options.hosts)?;

        let jobs: Vec<Arc<Job>> = specs.into_iter().map(|s| Arc::new(Job::new(s))).collect();
        let lookup = jobs
            .iter()
            .map(|j| (j.name().to_string(), Arc::clone(j)))
            .collect();

        let (queue, receiver) = queue::channel();
        let cron = CronDispatcher::new(&jobs, queue.clone(), options.poll_interval, Utc::now());

        info!(
            scheduler = %options.name,
            jobs = jobs.len(),
            scheduled = cron.len(),
            hosts = hosts.hosts().len(),
            "scheduler created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                name: options.name,
                jobs,
                lookup,
                graph,
                hosts,
                retry_delays: options.retry_delays,
                queue,
                receiver: tokio::sync::Mutex::new(receiver),
                runner,
                running: Mutex::new(HashMap::new()),
                run_slots: Arc::new(Semaphore::new(options.max_parallel_runs.max(1))),
                loop_started: AtomicBool::new(false),
                cron: Mutex::new(Some(cron)),
            }),
        })
    }

    /// Build a scheduler from a loaded config, running jobs as subprocesses.
    pub fn from_config(config: &JobflowConfig) -> Result<Self> {
        config.validate()?;
        let runner = SubprocessRunner::new(&config.scheduler.name, &config.scheduler.log_dir);
        let specs = config.jobs.iter().map(JobSpec::from).collect();
        Self::new(SchedulerOptions::from(config), specs, Arc::new(runner))
    }

    /// Spawn the action loop and the cron dispatcher.
    ///
    /// The action loop ends on [`Scheduler::stop`]; the dispatcher when
    /// `shutdown` broadcasts `true`. Each is started at most once per
    /// scheduler; the dispatcher not at all when no job has a schedule.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> SchedulerTasks {
        let queue = if self.inner.loop_started.swap(true, Ordering::SeqCst) {
            warn!(scheduler = %self.inner.name, "action loop already started");
            None
        } else {
            let this = self.clone();
            Some(tokio::spawn(async move { this.process_queue().await }))
        };

        let cron = self
            .inner
            .cron
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .filter(|cron| !cron.is_empty())
            .map(|cron| tokio::spawn(cron.run(shutdown)));

        SchedulerTasks { queue, cron }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // --- public operations -------------------------------------------------

    /// Queue a run of `job_name`. A job that is already on its way is left alone.
    pub fn run(&self, job_name: &str) -> Result<()> {
        let job = self.get_job(job_name)?;
        self.inner.queue.enqueue(Action::new(ActionKind::Run, &job))
    }

    pub fn force_kill(&self, job_name: &str) -> Result<()> {
        let job = self.get_job(job_name)?;
        self.inner.queue.enqueue(Action::new(ActionKind::Kill, &job))
    }

    pub fn reset(&self, job_name: &str) -> Result<()> {
        let job = self.get_job(job_name)?;
        self.inner.queue.enqueue(Action::new(ActionKind::Reset, &job))
    }

    /// Queue a run of every job with no dependencies that is still pending.
    /// Returns the number of runs queued.
    pub fn run_all_leaf_nodes(&self) -> Result<usize> {
        let mut queued = 0;
        for job in &self.inner.jobs {
            if job.spec().depends_on.is_empty() && job.status() == JobStatus::Pending {
                self.inner.queue.enqueue(Action::new(ActionKind::Run, job))?;
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Ask the action loop to exit once it reaches this point of the queue.
    pub fn stop(&self) -> Result<()> {
        self.inner.queue.enqueue(Action::stop())
    }

    /// Enqueue an arbitrary action.
    pub fn enqueue(&self, action: Action) -> Result<()> {
        self.inner.queue.enqueue(action)
    }

    // --- queries -----------------------------------------------------------

    pub fn get_job(&self, job_name: &str) -> Result<Arc<Job>> {
        self.inner
            .lookup
            .get(job_name)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound {
                name: job_name.to_string(),
            })
    }

    pub fn job(&self, job_name: &str) -> Result<JobSnapshot> {
        Ok(self.get_job(job_name)?.snapshot())
    }

    /// Snapshots of all jobs in definition order.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.inner.jobs.iter().map(|j| j.snapshot()).collect()
    }

    pub fn hosts(&self) -> &[HostDefinition] {
        self.inner.hosts.hosts()
    }

    pub fn free_ram(&self) -> Vec<(String, f64)> {
        self.inner.hosts.free_ram(&self.inner.jobs)
    }

    // --- action loop -------------------------------------------------------

    /// Consume actions until a `Stop` action is processed.
    pub async fn process_queue(&self) {
        info!(scheduler = %self.inner.name, "processing queue");
        while let Some(action) = self.process_next().await {
            if action.kind == ActionKind::Stop {
                info!(scheduler = %self.inner.name, "action loop stopped");
                return;
            }
        }
    }

    /// Wait for the next action, process it and return it with its status set.
    pub async fn process_next(&self) -> Option<Action> {
        let action = {
            let mut rx = self.inner.receiver.lock().await;
            rx.recv().await?
        };
        Some(self.process(action))
    }

    /// Process the next action if one is already queued.
    pub fn try_process_next(&self) -> Option<Action> {
        let action = {
            let mut rx = self.inner.receiver.try_lock().ok()?;
            rx.try_recv().ok()?
        };
        Some(self.process(action))
    }

    fn process(&self, mut action: Action) -> Action {
        debug!(%action, "got action from queue");

        if action.is_stale() {
            info!(
                %action,
                snapshot = action.status_counter_snapshot,
                "job moved on since action was queued; aborting"
            );
            action.status = Some(ActionStatus::aborted());
            return action;
        }

        let status = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&action)))
            .unwrap_or_else(|_| {
                error!(%action, "action handler panicked");
                if let Some(job) = action.job.as_ref() {
                    self.recover_after_panic(job);
                }
                ActionStatus::aborted_with("handler panicked")
            });
        debug!(%action, %status, "action processed");
        action.status = Some(status);
        action
    }

    fn dispatch(&self, action: &Action) -> ActionStatus {
        let Some(job) = action.job.as_ref() else {
            return ActionStatus::completed();
        };
        match action.kind {
            ActionKind::Reset => self.reset_job(job),
            ActionKind::Kill => self.kill_job(job),
            ActionKind::Run => self.run_job(job),
            ActionKind::RunFromSchedule => self.run_job_from_schedule(job),
            ActionKind::Spawn => self.spawn_job(job),
            ActionKind::RetryAfterDelay { delay } | ActionKind::RerunAfterDelay { delay } => {
                self.run_after_delay(job, delay)
            }
            ActionKind::SetCompletedSuccess => self.set_completed_success(job),
            ActionKind::SetCompletedFailure => self.set_completed_failure(job),
            ActionKind::Stop => ActionStatus::completed(),
        }
    }

    // --- handlers ----------------------------------------------------------

    fn reset_job(&self, job: &Arc<Job>) -> ActionStatus {
        // A reset job must not keep a process or a host behind its back.
        if let Some(process) = self.take_running(job.name()) {
            process.cancel.cancel();
        }
        self.inner.hosts.release(job);
        job.update(JobStatus::Pending);
        info!(job = %job.name(), "job reset");
        ActionStatus::completed()
    }

    fn kill_job(&self, job: &Arc<Job>) -> ActionStatus {
        let status = job.status();
        if !status.holds_host() {
            return ActionStatus::aborted_with(format!("cannot kill job in state {status}"));
        }

        match self.take_running(job.name()) {
            Some(process) => process.cancel.cancel(),
            // about to run: the queued Spawn goes stale once the counter moves
            None => debug!(job = %job.name(), %status, "no process to terminate"),
        }
        self.inner.hosts.release(job);
        job.update(JobStatus::Killed);
        info!(job = %job.name(), "job killed");
        ActionStatus::completed()
    }

    fn run_job_from_schedule(&self, job: &Arc<Job>) -> ActionStatus {
        if self.all_dependencies_succeeded(job) {
            info!(job = %job.name(), "running on schedule, all dependencies completed");
            self.run_job(job)
        } else {
            info!(job = %job.name(), "cannot run on schedule, dependencies not completed");
            ActionStatus::aborted_with("dependencies not completed")
        }
    }

    fn run_job(&self, job: &Arc<Job>) -> ActionStatus {
        let status = job.status();
        if !status.is_runnable() {
            info!(job = %job.name(), %status, "job is not in a runnable state");
            return ActionStatus::aborted_with(format!("not runnable ({status})"));
        }

        job.update(JobStatus::PendingSearchingForHost);
        if let Some(host) = self.inner.hosts.reserve(job, &self.inner.jobs) {
            info!(job = %job.name(), %host, "host assigned");
            self.enqueue_for(job, ActionKind::Spawn);
            return ActionStatus::completed_with("-> spawn job");
        }

        job.update(JobStatus::PendingNoHostFound);
        let attempts = job.increment_failed_spawns();
        info!(job = %job.name(), attempts, "no host with enough free RAM");

        match self.inner.retry_delays.get(attempts as usize - 1) {
            Some(&delay) => {
                info!(job = %job.name(), ?delay, "will retry host search");
                self.enqueue_for(job, ActionKind::RetryAfterDelay { delay });
                ActionStatus::aborted_with("no host found -> retry after delay")
            }
            None => {
                info!(job = %job.name(), "giving up on host search, returning job to pending");
                self.enqueue_for(job, ActionKind::Reset);
                ActionStatus::aborted_with("no host found -> reset job")
            }
        }
    }

    fn spawn_job(&self, job: &Arc<Job>) -> ActionStatus {
        let Some(host) = job.host() else {
            warn!(job = %job.name(), "spawn without an assigned host");
            return ActionStatus::aborted_with("no host assigned");
        };

        let expected = job.update(JobStatus::Running);
        let cancel = CancellationToken::new();
        self.running().insert(
            job.name().to_string(),
            RunningProcess {
                status_counter: expected,
                cancel: cancel.clone(),
            },
        );
        info!(job = %job.name(), %host, counter = expected, "spawning job");

        let this = self.clone();
        let job = Arc::clone(job);
        tokio::spawn(async move {
            let slots = Arc::clone(&this.inner.run_slots);
            // Cancellation wins over a result that is ready at the same time.
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = async {
                    let _permit = slots.acquire_owned().await.ok()?;
                    Some(this.inner.runner.run(job.spec(), &host).await)
                } => outcome,
            };

            this.finish_running(&job, expected);
            match outcome {
                Some(outcome) => this.handle_completion(&job, outcome, expected),
                None => info!(job = %job.name(), "run cancelled"),
            }
        });

        ActionStatus::completed()
    }

    /// Turn a finished run into a completion action, unless the job has moved
    /// on since the run was spawned.
    pub(crate) fn handle_completion(&self, job: &Arc<Job>, outcome: JobOutcome, expected: u64) {
        info!(job = %job.name(), ?outcome, "job completed");
        let counter = job.status_counter();
        if counter != expected {
            warn!(
                job = %job.name(),
                expected,
                counter,
                "job changed while running; ignoring its result"
            );
            return;
        }

        let kind = match outcome {
            JobOutcome::Succeeded => ActionKind::SetCompletedSuccess,
            JobOutcome::Failed => ActionKind::SetCompletedFailure,
        };
        self.enqueue_for(job, kind);
    }

    /// Move the job to `pending_waiting_to_retry`, then queue a `Run` after
    /// `delay` on a timer task, unless something else happened to the job
    /// meanwhile. Host-search retries and reruns after failure share this.
    fn run_after_delay(&self, job: &Arc<Job>, delay: Duration) -> ActionStatus {
        let snapshot = job.update(JobStatus::PendingWaitingToRetry);

        let this = self.clone();
        let job = Arc::clone(job);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let counter = job.status_counter();
            if counter != snapshot {
                warn!(
                    job = %job.name(),
                    expected = snapshot,
                    counter,
                    "job changed while waiting; delayed run aborted"
                );
                return;
            }
            this.enqueue_for(&job, ActionKind::Run);
        });

        ActionStatus::completed_with(format!("run again in {delay:?}"))
    }

    fn set_completed_success(&self, job: &Arc<Job>) -> ActionStatus {
        let status = job.status();
        if status != JobStatus::Running {
            warn!(job = %job.name(), %status, "completion for a job that is not running");
            return ActionStatus::aborted_with(format!("expected running, found {status}"));
        }

        self.inner.hosts.release(job);
        job.update(JobStatus::Succeeded);
        info!(job = %job.name(), "job succeeded");

        for name in self.inner.graph.downstream(job.name()) {
            let Some(downstream) = self.inner.lookup.get(name) else {
                continue;
            };
            if self.all_dependencies_succeeded(downstream) {
                info!(job = %name, upstream = %job.name(), "all dependencies succeeded, triggering run");
                self.enqueue_for(downstream, ActionKind::Run);
            }
        }

        ActionStatus::completed()
    }

    fn set_completed_failure(&self, job: &Arc<Job>) -> ActionStatus {
        let status = job.status();
        if status != JobStatus::Running {
            warn!(job = %job.name(), %status, "completion for a job that is not running");
            return ActionStatus::aborted_with(format!("expected running, found {status}"));
        }

        self.inner.hosts.release(job);
        let failures = job.increment_failures();

        match job.spec().rerun_delays.get(failures as usize - 1) {
            Some(&delay) => {
                job.update(JobStatus::FailedWaitingToRerun);
                info!(job = %job.name(), failures, ?delay, "job failed, will rerun");
                self.enqueue_for(job, ActionKind::RerunAfterDelay { delay });
                ActionStatus::completed_with("will rerun job after delay")
            }
            None => {
                job.update(JobStatus::Failed);
                info!(job = %job.name(), failures, "job failed, will not rerun");
                ActionStatus::completed_with("job -> failed")
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    /// A handler died part way through: put the job back where reset would.
    fn recover_after_panic(&self, job: &Arc<Job>) {
        if let Some(process) = self.take_running(job.name()) {
            process.cancel.cancel();
        }
        self.inner.hosts.release(job);
        job.update(JobStatus::Pending);
        warn!(job = %job.name(), "job returned to pending after handler panic");
    }

    fn all_dependencies_succeeded(&self, job: &Job) -> bool {
        job.spec().depends_on.iter().all(|dep| {
            self.inner
                .lookup
                .get(dep)
                .is_some_and(|d| d.status() == JobStatus::Succeeded)
        })
    }

    fn enqueue_for(&self, job: &Arc<Job>, kind: ActionKind) {
        if let Err(e) = self.inner.queue.enqueue(Action::new(kind, job)) {
            error!(job = %job.name(), "cannot enqueue follow-up action: {e}");
        }
    }

    fn running(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunningProcess>> {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn take_running(&self, job_name: &str) -> Option<RunningProcess> {
        self.running().remove(job_name)
    }

    /// Drop the process-table entry for a run that ended, if it is still ours.
    fn finish_running(&self, job: &Job, status_counter: u64) {
        let mut running = self.running();
        if running
            .get(job.name())
            .is_some_and(|p| p.status_counter == status_counter)
        {
            running.remove(job.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysSucceeds;

    #[async_trait]
    impl JobRunner for AlwaysSucceeds {
        async fn run(&self, _job: &JobSpec, _host: &str) -> JobOutcome {
            JobOutcome::Succeeded
        }
    }

    fn scheduler(specs: Vec<JobSpec>) -> Scheduler {
        Scheduler::new(SchedulerOptions::default(), specs, Arc::new(AlwaysSucceeds)).unwrap()
    }

    #[test]
    fn duplicate_job_names_are_rejected() {
        let err = Scheduler::new(
            SchedulerOptions::default(),
            vec![JobSpec::new("a", "true"), JobSpec::new("a", "false")],
            Arc::new(AlwaysSucceeds),
        )
        .err()
        .unwrap();
        assert!(matches!(err, SchedulerError::DuplicateJob { name } if name == "a"));
    }

    #[test]
    fn unknown_job_is_an_error() {
        let s = scheduler(vec![JobSpec::new("a", "true")]);
        assert!(matches!(s.run("nope"), Err(SchedulerError::JobNotFound { .. })));
        assert!(matches!(s.job("nope"), Err(SchedulerError::JobNotFound { .. })));
    }

    #[tokio::test]
    async fn stale_completion_is_dropped() {
        let s = scheduler(vec![JobSpec::new("j", "true")]);
        let job = s.get_job("j").unwrap();

        job.update(JobStatus::PendingAboutToRun);
        let expected = job.update(JobStatus::Running);
        job.update(JobStatus::Killed);

        s.handle_completion(&job, JobOutcome::Succeeded, expected);
        assert!(s.try_process_next().is_none());
        assert_eq!(job.status(), JobStatus::Killed);
    }

    #[test]
    fn action_queued_before_a_transition_is_aborted() {
        let s = scheduler(vec![JobSpec::new("j", "true")]);
        let job = s.get_job("j").unwrap();
        s.run("j").unwrap();
        job.update(JobStatus::Failed);

        let action = s.try_process_next().unwrap();
        assert!(action.is_stale());
        assert_eq!(action.status, Some(ActionStatus::aborted()));
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn current_completion_is_enqueued() {
        let s = scheduler(vec![JobSpec::new("j", "true")]);
        let job = s.get_job("j").unwrap();
        let expected = job.update(JobStatus::Running);

        s.handle_completion(&job, JobOutcome::Failed, expected);
        let action = s.try_process_next().unwrap();
        assert_eq!(action.kind, ActionKind::SetCompletedFailure);
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn schedule_trigger_waits_for_dependencies() {
        let s = scheduler(vec![
            JobSpec::new("up", "true"),
            JobSpec::new("down", "true").depends_on(["up"]),
        ]);
        let down = s.get_job("down").unwrap();

        s.enqueue(Action::new(ActionKind::RunFromSchedule, &down)).unwrap();
        let action = s.try_process_next().unwrap();
        assert_eq!(
            action.status,
            Some(ActionStatus::aborted_with("dependencies not completed"))
        );
        assert_eq!(down.status(), JobStatus::Pending);

        s.get_job("up").unwrap().update(JobStatus::Succeeded);
        s.enqueue(Action::new(ActionKind::RunFromSchedule, &down)).unwrap();
        let action = s.try_process_next().unwrap();
        assert!(action.status.unwrap().is_completed());
        assert_eq!(down.status(), JobStatus::PendingAboutToRun);
    }

    #[tokio::test]
    async fn kill_of_idle_job_is_aborted() {
        let s = scheduler(vec![JobSpec::new("j", "true")]);
        s.force_kill("j").unwrap();
        let action = s.try_process_next().unwrap();
        assert_eq!(
            action.status,
            Some(ActionStatus::aborted_with("cannot kill job in state pending"))
        );
        assert_eq!(s.job("j").unwrap().status_counter, 0);
    }

    #[tokio::test]
    async fn kill_of_running_job_releases_host() {
        let s = scheduler(vec![JobSpec::new("j", "true")]);
        s.run("j").unwrap();
        s.try_process_next().unwrap(); // Run -> about to run, Spawn queued
        s.force_kill("j").unwrap();

        let spawn = s.try_process_next().unwrap();
        assert_eq!(spawn.kind, ActionKind::Spawn);
        let kill = s.try_process_next().unwrap();
        assert_eq!(kill.kind, ActionKind::Kill);
        assert!(kill.status.unwrap().is_completed());
        assert_eq!(s.job("j").unwrap().status, JobStatus::Killed);
        assert!(s.job("j").unwrap().host.is_none());
    }

    #[tokio::test]
    async fn reset_returns_any_state_to_pending() {
        let s = scheduler(vec![JobSpec::new("j", "true")]);
        let job = s.get_job("j").unwrap();
        job.update(JobStatus::Failed);
        s.reset("j").unwrap();
        assert!(s.try_process_next().unwrap().status.unwrap().is_completed());
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[tokio::test]
    async fn leaf_nodes_are_only_pending_jobs_without_dependencies() {
        let s = scheduler(vec![
            JobSpec::new("a", "true"),
            JobSpec::new("b", "true"),
            JobSpec::new("c", "true").depends_on(["a"]),
        ]);
        s.get_job("b").unwrap().update(JobStatus::Succeeded);

        assert_eq!(s.run_all_leaf_nodes().unwrap(), 1);
        let action = s.try_process_next().unwrap();
        assert_eq!(action.job_name(), Some("a"));
        assert!(s.try_process_next().is_some()); // Spawn(a)
        assert!(s.try_process_next().is_none());
    }

    #[tokio::test]
    async fn stop_ends_process_queue() {
        let s = scheduler(vec![]);
        let (_tx, rx) = watch::channel(false);
        let tasks = s.start(rx);
        s.stop().unwrap();
        tasks.queue.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn action_loop_is_started_once() {
        let s = scheduler(vec![JobSpec::new("j", "true")]);
        let (_tx, rx) = watch::channel(false);
        let first = s.start(rx.clone());
        let second = s.start(rx);
        assert!(second.queue.is_none());

        s.stop().unwrap();
        first.queue.unwrap().await.unwrap();
    }

    // No runtime here, so the Spawn handler panics inside tokio::spawn after
    // the job has already been marked running.
    #[test]
    fn handler_panic_leaves_job_pending_and_loop_running() {
        let s = scheduler(vec![JobSpec::new("j", "true").min_ram(4.0)]);
        s.run("j").unwrap();
        let run = s.try_process_next().unwrap();
        assert!(run.status.unwrap().is_completed());

        let spawn = s.try_process_next().unwrap();
        assert_eq!(spawn.kind, ActionKind::Spawn);
        assert_eq!(spawn.status, Some(ActionStatus::aborted_with("handler panicked")));

        let snap = s.job("j").unwrap();
        assert_eq!(snap.status, JobStatus::Pending);
        assert!(snap.host.is_none());
        assert_eq!(s.free_ram(), vec![(DEFAULT_HOST.to_string(), DEFAULT_HOST_RAM)]);

        // The queue keeps being served.
        s.run("j").unwrap();
        let again = s.try_process_next().unwrap();
        assert!(again.status.unwrap().is_completed());
        assert_eq!(s.job("j").unwrap().status, JobStatus::PendingAboutToRun);
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let config = JobflowConfig {
            jobs: vec![jobflow_core::JobDefinition {
                name: "j".into(),
                command: "true".into(),
                depends_on: vec![],
                min_ram: -1.0,
                rerun_delays_secs: vec![],
                schedule: None,
            }],
            ..JobflowConfig::default()
        };
        let err = Scheduler::from_config(&config).err().unwrap();
        assert!(matches!(err, SchedulerError::Config(_)));
    }
}
