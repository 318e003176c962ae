//! Plain-text rendering for `jobflow check`.

use std::fmt::Write;

use jobflow_core::JobflowConfig;
use jobflow_scheduler::Scheduler;

/// Hosts, then one line per job: name, RAM, dependencies, schedule.
pub fn job_table(config: &JobflowConfig, scheduler: &Scheduler) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "scheduler: {}", scheduler.name());
    for host in scheduler.hosts() {
        let _ = writeln!(out, "host {:<20} ram {}", host.name, host.ram);
    }

    let width = config.jobs.iter().map(|j| j.name.len()).max().unwrap_or(0);
    for job in &config.jobs {
        let deps = if job.depends_on.is_empty() {
            "-".to_string()
        } else {
            job.depends_on.join(",")
        };
        let schedule = job
            .schedule
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "job  {:<width$}  ram {:<6} after {:<24} schedule {}",
            job.name, job.min_ram, deps, schedule
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobflow_core::{JobDefinition, Schedule};

    #[test]
    fn table_lists_hosts_and_jobs() {
        let config = JobflowConfig {
            jobs: vec![
                JobDefinition {
                    name: "extract".into(),
                    command: "true".into(),
                    depends_on: vec![],
                    min_ram: 2.0,
                    rerun_delays_secs: vec![],
                    schedule: Some(Schedule::Daily { hour: 3, minute: 0 }),
                },
                JobDefinition {
                    name: "load".into(),
                    command: "true".into(),
                    depends_on: vec!["extract".into()],
                    min_ram: 1.0,
                    rerun_delays_secs: vec![],
                    schedule: None,
                },
            ],
            ..JobflowConfig::default()
        };
        let scheduler = Scheduler::from_config(&config).unwrap();
        let table = job_table(&config, &scheduler);

        assert!(table.contains("host localhost"));
        assert!(table.contains("daily at 03:00"));
        assert!(table.lines().any(|l| l.contains("load") && l.contains("extract")));
    }
}
