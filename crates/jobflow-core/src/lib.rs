//! `jobflow-core`: definitions shared by the scheduler and the CLI,
//! configuration loading, job/host definitions and trigger schedules.

pub mod config;
pub mod error;
pub mod schedule;

pub use config::{HostDefinition, JobDefinition, JobflowConfig, SchedulerConfig};
pub use error::{JobflowError, Result};
pub use schedule::{compute_next_run, Schedule};
