use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No job with the given name exists in the job table.
    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    /// Two job definitions share a name.
    #[error("Duplicate job name: {name}")]
    DuplicateJob { name: String },

    /// A job depends on a name that is not in the job table.
    #[error("Job {job} depends on unknown job {dependency}")]
    UnknownDependency { job: String, dependency: String },

    /// The dependency graph is not acyclic.
    #[error("Dependency cycle through job {job}")]
    DependencyCycle { job: String },

    #[error("No hosts configured")]
    NoHosts,

    #[error("Invalid host: {0}")]
    InvalidHost(String),

    /// The action loop is gone; nothing can be enqueued.
    #[error("Action queue closed")]
    QueueClosed,

    #[error(transparent)]
    Config(#[from] jobflow_core::JobflowError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
