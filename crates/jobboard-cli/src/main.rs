//! jobboard - drive the job queue against an in-memory store.
//!
//! `simulate` enqueues jobs, runs a pool of workers (one of which crashes
//! while holding claims) and the reconcile loop, then prints the final
//! statistics as JSON.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use jobboard_core::ports::{IdGenerator, UlidGenerator};
use jobboard_core::{
    InMemoryStore, JobBoardConfig, JobId, JobQueue, JobQueueError, JobQueueReconciler,
    ReconcileLoop, SystemClock, observability,
};

#[derive(Debug, Parser)]
#[command(name = "jobboard", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run producers, workers and the reconciler in-process.
    Simulate(SimulateArgs),
    /// Print the configuration resolved from the environment.
    Config,
}

#[derive(Debug, Args)]
struct SimulateArgs {
    #[arg(long, default_value = "org")]
    site: String,

    #[arg(long, default_value = "builds")]
    queue: String,

    #[arg(long, default_value_t = 20)]
    jobs: usize,

    #[arg(long, default_value_t = 3)]
    workers: usize,

    #[arg(long, default_value_t = 2)]
    capacity: u32,

    /// Time each job takes to "run".
    #[arg(long, default_value_t = 50)]
    work_ms: u64,

    /// Worker lease TTL; overrides the environment.
    #[arg(long, default_value_t = 1000)]
    ttl_ms: u64,

    /// Reconcile interval; overrides the environment.
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    /// Give up if the queue is not drained by then.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct ConfigView {
    worker_ttl_secs: u64,
    default_capacity: u32,
    reconcile_interval_ms: u64,
    sites: BTreeMap<String, SiteView>,
}

#[derive(Debug, Serialize)]
struct SiteView {
    job_state_url: String,
    log_parts_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init();

    let cli = Cli::parse();
    let config = JobBoardConfig::from_env().context("reading configuration")?;

    match cli.command {
        Commands::Simulate(args) => simulate(args, config).await,
        Commands::Config => print_config(&config),
    }
}

fn print_config(config: &JobBoardConfig) -> Result<()> {
    let view = ConfigView {
        worker_ttl_secs: config.worker_ttl.as_secs(),
        default_capacity: config.default_capacity,
        reconcile_interval_ms: u64::try_from(config.reconcile_interval.as_millis())?,
        sites: config
            .site_urls
            .iter()
            .map(|(site, urls)| {
                (
                    site.clone(),
                    SiteView {
                        job_state_url: urls.job_state_url.clone(),
                        log_parts_url: urls.log_parts_url.clone(),
                    },
                )
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn simulate(args: SimulateArgs, config: JobBoardConfig) -> Result<()> {
    let config = config
        .with_worker_ttl(Duration::from_millis(args.ttl_ms))
        .with_reconcile_interval(Duration::from_millis(args.interval_ms));

    let store = Arc::new(InMemoryStore::new());
    let queue = JobQueue::new(Arc::clone(&store), args.site.as_str(), args.queue.as_str())
        .with_config(&config);

    let ids = UlidGenerator::new(SystemClock);
    for _ in 0..args.jobs {
        queue.add(ids.generate_job_id()).await?;
    }
    info!(jobs = args.jobs, site = %args.site, queue = %args.queue, "jobs enqueued");

    let reconciler = JobQueueReconciler::new(Arc::clone(&store));
    let reconcile = ReconcileLoop::spawn(reconciler.clone(), config.reconcile_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let work = Duration::from_millis(args.work_ms);
    let mut workers: Vec<JoinHandle<Result<usize, JobQueueError>>> = Vec::new();

    // claims a batch and vanishes without releasing it
    let crasher = queue.clone();
    let capacity = args.capacity;
    workers.push(tokio::spawn(async move {
        let held = crasher.claim("crasher", Some(capacity)).await?;
        warn!(held = held.len(), "worker crasher exiting with claims");
        Ok::<_, JobQueueError>(0)
    }));

    for n in 0..args.workers {
        let name = format!("worker-{n}");
        workers.push(tokio::spawn(run_worker(
            queue.clone(),
            name,
            args.capacity,
            work,
            shutdown_rx.clone(),
        )));
    }

    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    let drained = loop {
        let listing = JobQueue::for_queue(store.as_ref(), &args.site, &args.queue).await?;
        if listing.is_empty() {
            break true;
        }
        if Instant::now() >= deadline {
            break false;
        }
        sleep(Duration::from_millis(50)).await;
    };

    let _ = shutdown_tx.send(true);
    let mut completed = 0;
    for worker in workers {
        completed += worker.await.context("worker task panicked")??;
    }
    reconcile.shutdown_and_join().await;

    let stats = reconciler.reconcile().await?;
    info!(completed, drained, "simulation finished");
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if !drained {
        anyhow::bail!("queue not drained within {}s", args.timeout_secs);
    }
    Ok(())
}

/// Claim, confirm, "run" and remove jobs until told to stop.
async fn run_worker(
    queue: JobQueue<InMemoryStore>,
    name: String,
    capacity: u32,
    work: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<usize, JobQueueError> {
    queue.register(&name, Some(capacity)).await?;
    let mut completed = 0;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let claimed = queue.claim(&name, Some(capacity)).await?;
        if claimed.is_empty() {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = sleep(work) => {}
            }
            continue;
        }

        for id in claimed {
            if !still_held(&queue, &name, &id).await? {
                warn!(worker = %name, job_id = %id, "claim lost before start");
                continue;
            }
            sleep(work).await;
            queue.remove(id).await?;
            completed += 1;
        }
    }

    info!(worker = %name, completed, "worker stopped");
    Ok(completed)
}

async fn still_held(
    queue: &JobQueue<InMemoryStore>,
    worker: &str,
    id: &JobId,
) -> Result<bool, JobQueueError> {
    let held = queue.check_claims(worker, [id.clone()]).await?;
    Ok(!held.is_empty())
}
