use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::schedule::Schedule;

pub const DEFAULT_SCHEDULER_NAME: &str = "jobflow";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_HOST_RAM: f64 = 10.0; // assumed RAM of the local machine when no hosts are configured
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000; // cron dispatcher cadence
pub const DEFAULT_MAX_PARALLEL_RUNS: usize = 64;

/// Top-level config (jobflow.toml + JOBFLOW_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobflowConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub hosts: Vec<HostDefinition>,
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Distinguishes schedulers sharing a machine; also the log sub-directory.
    #[serde(default = "default_scheduler_name")]
    pub name: String,
    /// Backoff (seconds) between host searches when no host has enough free RAM.
    #[serde(default)]
    pub retry_delays_secs: Vec<u64>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on job processes running at the same time.
    #[serde(default = "default_max_parallel_runs")]
    pub max_parallel_runs: usize,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: default_scheduler_name(),
            retry_delays_secs: Vec::new(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_parallel_runs: DEFAULT_MAX_PARALLEL_RUNS,
            log_dir: default_log_dir(),
        }
    }
}

/// A named compute resource with a fixed RAM budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostDefinition {
    pub name: String,
    pub ram: f64,
}

/// One `[[jobs]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    /// Shell command executed by the subprocess runner (`sh -c`).
    pub command: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub min_ram: f64,
    /// Backoff (seconds) before each rerun after a failed execution.
    #[serde(default)]
    pub rerun_delays_secs: Vec<u64>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
}

fn default_scheduler_name() -> String {
    DEFAULT_SCHEDULER_NAME.to_string()
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_max_parallel_runs() -> usize {
    DEFAULT_MAX_PARALLEL_RUNS
}
fn default_log_dir() -> String {
    format!("{}/logs", jobflow_home())
}

fn jobflow_home() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.jobflow")
}

impl JobflowConfig {
    /// Load config from a TOML file with JOBFLOW_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `JOBFLOW_CONFIG` env var
    ///   3. ~/.jobflow/jobflow.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("JOBFLOW_CONFIG").ok())
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("JOBFLOW_").split("__")),
        )
    }

    /// Extract and validate a config from an already-assembled figment.
    pub fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        let config: JobflowConfig = figment
            .extract()
            .map_err(|e| crate::error::JobflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Host table with the single synthetic `localhost` host filled in when empty.
    pub fn effective_hosts(&self) -> Vec<HostDefinition> {
        if self.hosts.is_empty() {
            vec![HostDefinition {
                name: DEFAULT_HOST.to_string(),
                ram: DEFAULT_HOST_RAM,
            }]
        } else {
            self.hosts.clone()
        }
    }

    /// Check values figment cannot: schedule ranges, RAM and run limits.
    pub fn validate(&self) -> crate::error::Result<()> {
        for job in &self.jobs {
            if let Some(schedule) = &job.schedule {
                schedule.validate().map_err(|e| {
                    crate::error::JobflowError::Config(format!("job {}: {e}", job.name))
                })?;
            }
            if job.min_ram < 0.0 {
                return Err(crate::error::JobflowError::Config(format!(
                    "job {}: min_ram must not be negative",
                    job.name
                )));
            }
        }
        if self.scheduler.max_parallel_runs == 0 {
            return Err(crate::error::JobflowError::Config(
                "scheduler.max_parallel_runs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    format!("{}/jobflow.toml", jobflow_home())
}
