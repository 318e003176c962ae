//! Host resource table and first-fit RAM assignment.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use jobflow_core::HostDefinition;
use tracing::debug;

use crate::{
    error::{Result, SchedulerError},
    job::Job,
    types::JobStatus,
};

/// Static map of host name → total RAM, in configuration order.
///
/// Free capacity is never stored: it is recomputed from the jobs currently
/// holding a host, under `lock`, together with the reservation that follows.
#[derive(Debug)]
pub struct HostTable {
    hosts: Vec<HostDefinition>,
    lock: Mutex<()>,
}

impl HostTable {
    pub fn new(hosts: Vec<HostDefinition>) -> Result<Self> {
        if hosts.is_empty() {
            return Err(SchedulerError::NoHosts);
        }
        let mut seen = std::collections::HashSet::new();
        for host in &hosts {
            if !seen.insert(host.name.as_str()) {
                return Err(SchedulerError::InvalidHost(format!(
                    "host {} listed twice",
                    host.name
                )));
            }
            if host.ram.is_nan() || host.ram < 0.0 {
                return Err(SchedulerError::InvalidHost(format!(
                    "host {} has invalid RAM {}",
                    host.name, host.ram
                )));
            }
        }
        Ok(Self {
            hosts,
            lock: Mutex::new(()),
        })
    }

    pub fn hosts(&self) -> &[HostDefinition] {
        &self.hosts
    }

    /// Free RAM per host: total minus `min_ram` of every job running or about
    /// to run there.
    pub fn free_ram(&self, jobs: &[Arc<Job>]) -> Vec<(String, f64)> {
        let mut used: HashMap<String, f64> = HashMap::new();
        for job in jobs {
            let snap = job.snapshot();
            if !snap.status.holds_host() {
                continue;
            }
            if let Some(host) = snap.host {
                *used.entry(host).or_default() += job.spec().min_ram;
            }
        }

        self.hosts
            .iter()
            .map(|h| {
                let free = h.ram - used.get(&h.name).copied().unwrap_or(0.0);
                (h.name.clone(), free)
            })
            .collect()
    }

    /// First host, in table order, whose free RAM covers `job.min_ram`.
    pub fn find_host(&self, job: &Job, jobs: &[Arc<Job>]) -> Option<String> {
        let needed = job.spec().min_ram;
        self.free_ram(jobs)
            .into_iter()
            .find(|(_, free)| *free >= needed)
            .map(|(name, _)| name)
    }

    /// Pick a host for `job` and claim it in one critical section.
    ///
    /// On success the job leaves with its host set and status
    /// `pending_about_to_run`, so its RAM counts against the host before the
    /// lock is released.
    pub(crate) fn reserve(&self, job: &Job, jobs: &[Arc<Job>]) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let host = self.find_host(job, jobs);
        debug!(job = %job.name(), host = ?host, "host search");
        job.update_host(host.clone());
        if host.is_some() {
            job.update(JobStatus::PendingAboutToRun);
        }
        host
    }

    pub(crate) fn release(&self, job: &Job) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        job.update_host(None);
    }
}
