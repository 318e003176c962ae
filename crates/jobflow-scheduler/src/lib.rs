//! `jobflow-scheduler`: in-memory job orchestrator driven by a single action queue.
//!
//! # Overview
//!
//! Jobs form a dependency graph and may carry a trigger [`jobflow_core::Schedule`].
//! Every state change is an [`action::Action`] processed by one loop in
//! [`engine::Scheduler`]; job processes and backoff timers run on background
//! tasks and report back by enqueuing more actions. Each job carries a status
//! counter so results from an outdated run are recognised and dropped.
//!
//! # Job lifecycle
//!
//! | Trigger                 | Transition                                                  |
//! |-------------------------|-------------------------------------------------------------|
//! | `Run`                   | runnable → searching for host → about to run (or no host found) |
//! | `Spawn`                 | about to run → running                                      |
//! | `SetCompletedSuccess`   | running → succeeded, dependents whose inputs all succeeded run |
//! | `SetCompletedFailure`   | running → failed waiting to rerun, or failed                |
//! | `RetryAfterDelay`       | no host found → waiting to retry → `Run`                    |
//! | `Kill`                  | running / about to run → killed                             |
//! | `Reset`                 | anything → pending                                          |

pub mod action;
pub mod cron;
pub mod engine;
pub mod error;
pub mod graph;
pub mod hosts;
pub mod job;
pub mod queue;
pub mod runner;
pub mod types;

pub use action::{Action, ActionKind, ActionStatus};
pub use engine::{Scheduler, SchedulerOptions, SchedulerTasks};
pub use error::{Result, SchedulerError};
pub use runner::{JobRunner, SubprocessRunner};
pub use types::{JobOutcome, JobSnapshot, JobSpec, JobStatus};
