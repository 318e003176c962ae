use std::collections::HashMap;
use std::time::Duration;

use clap::{Parser, Subcommand};
use jobflow_core::JobflowConfig;
use jobflow_scheduler::{JobStatus, Scheduler};
use tracing::{info, warn};

mod report;

#[derive(Parser)]
#[command(name = "jobflow", version, about = "Dependency-aware job scheduler")]
struct Cli {
    /// Config file (defaults to $JOBFLOW_CONFIG, then ~/.jobflow/jobflow.toml).
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the config and print the job table.
    Check,
    /// Run the scheduler until Ctrl-C.
    Run {
        /// Queue every job without dependencies at startup.
        #[arg(long)]
        leaves: bool,
        /// Queue the named job at startup (repeatable).
        #[arg(long = "job", value_name = "NAME")]
        jobs: Vec<String>,
        /// How often job status changes are reported, in seconds.
        #[arg(long, default_value_t = 2)]
        report_every: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobflow=info,jobflow_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = JobflowConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Check => {
            // Building the scheduler runs every structural check on the job set.
            let scheduler = Scheduler::from_config(&config)?;
            print!("{}", report::job_table(&config, &scheduler));
            Ok(())
        }
        Command::Run {
            leaves,
            jobs,
            report_every,
        } => run(config, leaves, jobs, Duration::from_secs(report_every.max(1))).await,
    }
}

async fn run(
    config: JobflowConfig,
    leaves: bool,
    jobs: Vec<String>,
    report_every: Duration,
) -> anyhow::Result<()> {
    let scheduler = Scheduler::from_config(&config)?;
    info!(
        scheduler = %scheduler.name(),
        log_dir = %config.scheduler.log_dir,
        "starting scheduler"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let tasks = scheduler.start(shutdown_rx.clone());

    if leaves {
        let queued = scheduler.run_all_leaf_nodes()?;
        info!(queued, "leaf jobs queued");
    }
    for name in &jobs {
        scheduler.run(name)?;
        info!(job = %name, "job queued");
    }

    let reporter = tokio::spawn(report_changes(scheduler.clone(), report_every, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    scheduler.stop()?;
    if let Some(queue) = tasks.queue {
        if let Err(e) = queue.await {
            warn!("action loop ended abnormally: {e}");
        }
    }
    if let Some(cron) = tasks.cron {
        let _ = cron.await;
    }
    let _ = reporter.await;
    Ok(())
}

/// Log every job whose status changed since the previous poll.
async fn report_changes(
    scheduler: Scheduler,
    every: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut last: HashMap<String, JobStatus> = scheduler
        .jobs()
        .into_iter()
        .map(|j| (j.name, j.status))
        .collect();
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for job in scheduler.jobs() {
                    let previous = last.insert(job.name.clone(), job.status);
                    if previous != Some(job.status) {
                        info!(
                            job = %job.name,
                            from = %previous.map(|s| s.to_string()).unwrap_or_default(),
                            to = %job.status,
                            host = job.host.as_deref().unwrap_or("-"),
                            "status changed"
                        );
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
