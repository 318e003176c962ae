//! Job execution collaborators.
//!
//! The scheduler never runs job code itself: it hands a [`JobSpec`] and the
//! reserved host to a [`JobRunner`] on a background task and turns the
//! reported [`JobOutcome`] into a completion action.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::types::{JobOutcome, JobSpec};

/// Executes one run of a job on a host.
///
/// Cancellation is by drop: when a job is killed the scheduler drops the
/// future returned by `run`, so implementations must release whatever they
/// started when dropped.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &JobSpec, host: &str) -> JobOutcome;
}

/// Runs `job.command` through `sh -c` as a child process.
///
/// Each job gets its own append-only log file at
/// `<log_dir>/<scheduler name>/<job name>.log` and sees its identity in the
/// `JOBFLOW_SCHEDULER_NAME`, `JOBFLOW_JOB_NAME` and `JOBFLOW_HOST` variables.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    scheduler_name: String,
    log_dir: PathBuf,
}

impl SubprocessRunner {
    pub fn new(scheduler_name: impl Into<String>, log_dir: impl AsRef<Path>) -> Self {
        Self {
            scheduler_name: scheduler_name.into(),
            log_dir: log_dir.as_ref().to_path_buf(),
        }
    }

    pub fn log_path(&self, job_name: &str) -> PathBuf {
        self.log_dir
            .join(&self.scheduler_name)
            .join(format!("{job_name}.log"))
    }

    async fn open_log(&self, job_name: &str) -> std::io::Result<std::fs::File> {
        let path = self.log_path(job_name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(file.into_std().await)
    }
}

#[async_trait]
impl JobRunner for SubprocessRunner {
    async fn run(&self, job: &JobSpec, host: &str) -> JobOutcome {
        let stdout = match self.open_log(&job.name).await {
            Ok(f) => f,
            Err(e) => {
                error!(job = %job.name, "cannot open job log: {e}");
                return JobOutcome::Failed;
            }
        };
        let stderr = match stdout.try_clone() {
            Ok(f) => f,
            Err(e) => {
                error!(job = %job.name, "cannot duplicate job log handle: {e}");
                return JobOutcome::Failed;
            }
        };

        let child = Command::new("sh")
            .arg("-c")
            .arg(&job.command)
            .env("JOBFLOW_SCHEDULER_NAME", &self.scheduler_name)
            .env("JOBFLOW_JOB_NAME", &job.name)
            .env("JOBFLOW_HOST", host)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            // Dropping the run future (kill) takes the process down with it.
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(c) => c,
            Err(e) => {
                error!(job = %job.name, "spawn failed: {e}");
                return JobOutcome::Failed;
            }
        };
        info!(job = %job.name, %host, pid = ?child.id(), "job process started");

        match child.wait().await {
            Ok(status) if status.success() => JobOutcome::Succeeded,
            Ok(status) => {
                warn!(job = %job.name, exit_code = ?status.code(), "job process failed");
                JobOutcome::Failed
            }
            Err(e) => {
                error!(job = %job.name, "wait failed: {e}");
                JobOutcome::Failed
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn runner(dir: &tempfile::TempDir) -> SubprocessRunner {
        SubprocessRunner::new("test-sched", dir.path())
    }

    #[tokio::test]
    async fn zero_exit_is_success_and_output_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(&dir);
        let job = JobSpec::new("hello", "echo hi from $JOBFLOW_JOB_NAME on $JOBFLOW_HOST");

        assert_eq!(r.run(&job, "box-1").await, JobOutcome::Succeeded);

        let log = std::fs::read_to_string(r.log_path("hello")).unwrap();
        assert!(log.contains("hi from hello on box-1"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobSpec::new("broken", "echo oops >&2; exit 3");
        assert_eq!(runner(&dir).run(&job, "localhost").await, JobOutcome::Failed);

        let log = std::fs::read_to_string(runner(&dir).log_path("broken")).unwrap();
        assert!(log.contains("oops"));
    }

    #[tokio::test]
    async fn log_is_appended_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(&dir);
        let job = JobSpec::new("twice", "echo line");
        r.run(&job, "localhost").await;
        r.run(&job, "localhost").await;

        let log = std::fs::read_to_string(r.log_path("twice")).unwrap();
        assert_eq!(log.lines().count(), 2);
    }

    #[tokio::test]
    async fn dropping_the_run_future_stops_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(&dir);
        let job = JobSpec::new("sleeper", "sleep 30");
        let res = tokio::time::timeout(Duration::from_millis(200), r.run(&job, "localhost")).await;
        assert!(res.is_err());
    }
}
