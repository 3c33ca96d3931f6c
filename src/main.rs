//! CloudVid transfer engine.
//!
//! Wires configuration, storage, providers and the dispatcher together and
//! exposes a few operator commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use cloudvid_core::config::{AppConfig, LogFormat};
use cloudvid_core::traits::{Clock, SourceProvider, SystemClock};
use cloudvid_core::types::{JobId, UploadMetadata};
use cloudvid_database::memory::{MemoryHistoryStore, MemoryJobStore, MemoryQuotaStore};
use cloudvid_database::repositories::{PgHistoryStore, PgJobStore, PgQuotaStore};
use cloudvid_database::{DatabasePool, HistoryStore, JobStore, QuotaStore};
use cloudvid_entity::job::{JobStatus, SourceRef};
use cloudvid_transfer::providers::{LocalDestination, LocalSource};
use cloudvid_transfer::{SizePolicy, Spool, TransferPipeline};
use cloudvid_worker::queue::{BatchItem, BatchRequest};
use cloudvid_worker::{CycleOutcome, Dispatcher, HistoryIndex, JobQueue, QuotaTracker, RetryPolicy};

#[derive(Debug, Parser)]
#[command(name = "cloudvid", version, about = "Resumable cloud-to-cloud video transfer engine")]
struct Cli {
    /// Directory holding default.toml and the environment overlays
    #[arg(long, global = true, env = "CLOUDVID_CONFIG_DIR", default_value = "config")]
    config_dir: String,

    /// Environment overlay to merge over the defaults
    #[arg(long, global = true, env = "CLOUDVID_ENV", default_value = "development")]
    env: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the dispatcher
    Run(RunArgs),
    /// Apply database migrations
    Migrate,
    /// Print job counts per status
    Status {
        /// Only count jobs of this owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Print the current upload budget window
    Quota,
    /// Request cancellation of a job
    Cancel {
        /// Job identifier
        job_id: JobId,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Keep all state in memory instead of PostgreSQL
    #[arg(long)]
    memory: bool,

    /// Enqueue every file of this source folder before starting
    #[arg(long)]
    scan: Option<String>,

    /// Owner recorded on scanned jobs
    #[arg(long, default_value = "operator")]
    owner: String,

    /// Enqueue content that was already transferred
    #[arg(long)]
    allow_duplicates: bool,

    /// Process eligible jobs until the queue is idle, then exit
    #[arg(long)]
    drain: bool,
}

/// Store implementations selected at startup.
struct Stores {
    jobs: Arc<dyn JobStore>,
    history: Arc<dyn HistoryStore>,
    quota: Arc<dyn QuotaStore>,
}

impl Stores {
    fn memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Arc::new(MemoryJobStore::with_clock(clock)),
            history: Arc::new(MemoryHistoryStore::new()),
            quota: Arc::new(MemoryQuotaStore::new()),
        }
    }

    fn postgres(db: &DatabasePool, clock: Arc<dyn Clock>) -> Self {
        let pool = db.pool().clone();
        Self {
            jobs: Arc::new(PgJobStore::new(pool.clone()).with_clock(clock)),
            history: Arc::new(PgHistoryStore::new(pool.clone())),
            quota: Arc::new(PgQuotaStore::new(pool)),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config_dir, &cli.env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = execute(cli.command, config).await {
        tracing::error!(error = %format!("{e:#}"), "Command failed");
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        LogFormat::Pretty => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn execute(command: Command, config: AppConfig) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match command {
        Command::Run(args) if args.memory => {
            tracing::warn!("Running with in-memory state; nothing survives a restart");
            run(args, &config, Stores::memory(clock.clone()), clock).await
        }
        Command::Run(args) => {
            let db = connect(&config).await?;
            let stores = Stores::postgres(&db, clock.clone());
            let result = run(args, &config, stores, clock).await;
            db.close().await;
            result
        }
        Command::Migrate => {
            let db = DatabasePool::connect(&config.database).await?;
            cloudvid_database::migration::run_migrations(db.pool()).await?;
            println!("All migrations applied.");
            db.close().await;
            Ok(())
        }
        Command::Status { owner } => {
            let db = connect(&config).await?;
            let stores = Stores::postgres(&db, clock);
            let summary = stores.jobs.summary(owner.as_deref()).await?;
            for status in JobStatus::ALL {
                println!("{:<12} {}", status.as_str(), summary.count(status));
            }
            println!("{:<12} {}", "total", summary.total());
            Ok(())
        }
        Command::Quota => {
            let db = connect(&config).await?;
            let stores = Stores::postgres(&db, clock.clone());
            let tracker = QuotaTracker::new(stores.quota, clock, config.quota.clone());
            let window = tracker.current_window().await?;
            println!(
                "consumed {} / {} units ({} remaining)",
                window.consumed_units, window.budget_units, window.remaining_units
            );
            println!("window   {} .. {}", window.window_start.to_rfc3339(), window.window_end.to_rfc3339());
            Ok(())
        }
        Command::Cancel { job_id } => {
            let db = connect(&config).await?;
            let stores = Stores::postgres(&db, clock);
            let job = stores.jobs.request_cancel(job_id).await?;
            println!("Cancellation requested for {} ({})", job.id, job.status);
            Ok(())
        }
    }
}

async fn connect(config: &AppConfig) -> anyhow::Result<DatabasePool> {
    let db = DatabasePool::connect(&config.database)
        .await
        .context("Failed to connect to the database")?;
    cloudvid_database::migration::run_migrations(db.pool())
        .await
        .context("Failed to apply migrations")?;
    Ok(db)
}

async fn run(
    args: RunArgs,
    config: &AppConfig,
    stores: Stores,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<()> {
    tracing::info!("Starting CloudVid v{}", env!("CARGO_PKG_VERSION"));

    let source = Arc::new(LocalSource::new(&config.transfer.source_root).await?);
    let destination = Arc::new(LocalDestination::new(&config.transfer.destination_root).await?);
    let spool = Spool::new(&config.transfer.spool_dir).await?;
    let pipeline = TransferPipeline::new(source.clone(), destination, spool, &config.transfer);

    let quota = Arc::new(QuotaTracker::new(
        stores.quota.clone(),
        clock.clone(),
        config.quota.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        stores.jobs.clone(),
        HistoryIndex::new(stores.history.clone()),
        quota,
        RetryPolicy::from_config(&config.retry),
        pipeline,
        clock,
        config.worker.clone(),
    ));
    let queue = JobQueue::new(
        stores.jobs.clone(),
        HistoryIndex::new(stores.history.clone()),
        SizePolicy::from_config(&config.transfer),
        config.retry.default_max_retries,
    )
    .with_dispatcher(dispatcher.handle());

    if let Some(folder) = &args.scan {
        scan(&queue, source.as_ref(), folder, &args).await?;
    }

    if args.drain {
        if config.worker.recover_on_start {
            dispatcher.recover().await?;
        }
        return drain(&dispatcher).await;
    }

    if !config.worker.enabled {
        tracing::info!("Worker disabled by configuration");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run(shutdown_rx).await })
    };

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping dispatcher...");
    let _ = shutdown_tx.send(true);
    worker.await.context("Dispatcher task panicked")?;

    tracing::info!("CloudVid shut down gracefully");
    Ok(())
}

/// Enqueue every file of a source folder as one batch.
async fn scan(
    queue: &JobQueue,
    source: &dyn SourceProvider,
    folder: &str,
    args: &RunArgs,
) -> anyhow::Result<()> {
    let files = source
        .list_files(folder)
        .await
        .with_context(|| format!("Failed to list source folder '{folder}'"))?;

    let mut items = Vec::with_capacity(files.len());
    for file in files {
        let checksum = match file.checksum {
            Some(checksum) => checksum,
            None => source.file_checksum(&file.file_id).await?,
        };
        let title = Path::new(&file.name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.name.clone());
        items.push(BatchItem {
            source: SourceRef {
                file_id: file.file_id,
                checksum,
                display_name: file.name,
                size_bytes: i64::try_from(file.size_bytes).unwrap_or(i64::MAX),
                mime_type: file.mime_type,
            },
            metadata: UploadMetadata {
                title,
                ..UploadMetadata::default()
            },
        });
    }

    let outcome = queue
        .enqueue_batch(BatchRequest {
            owner: args.owner.clone(),
            items,
            skip_duplicates: !args.allow_duplicates,
            max_retries: None,
        })
        .await?;

    println!(
        "Batch {}: {} accepted, {} duplicate, {} rejected",
        outcome.batch_id, outcome.accepted, outcome.duplicate, outcome.rejected
    );
    for skipped in &outcome.skipped {
        println!("  skipped {} ({})", skipped.display_name, skipped.reason.as_str());
    }
    Ok(())
}

/// Process eligible jobs back to back and report each one.
async fn drain(dispatcher: &Dispatcher) -> anyhow::Result<()> {
    for outcome in dispatcher.drain().await? {
        match outcome {
            CycleOutcome::Finished { job_id, status } => println!("{job_id} {status}"),
            CycleOutcome::Deferred { job_id } => println!("{job_id} waiting for upload budget"),
            CycleOutcome::Lost { job_id } => {
                println!("{job_id} is being processed by another dispatcher")
            }
            CycleOutcome::Idle => {}
        }
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
