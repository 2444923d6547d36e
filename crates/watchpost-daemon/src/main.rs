use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use watchpost_dispatch::DispatchQueue;
use watchpost_scheduler::{CronScheduler, RescheduleCoordinator, TriggerStore};
use watchpost_store::{JobRepository, RunStore, SqliteJobStore};
use watchpost_worker::{Collaborators, Notify, WorkerConfig, WorkerPool};

mod artifacts;
mod capture;
mod notify;

#[derive(Parser, Debug)]
#[command(name = "watchpost", version, about = "Recurring URL capture and compare engine")]
struct Cli {
    /// Path to watchpost.toml (default: ~/.watchpost/watchpost.toml).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "watchpost=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = watchpost_core::WatchpostConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        watchpost_core::WatchpostConfig::default()
    });

    // initialize SQLite database — single file for all subsystems
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    // run all schema migrations (idempotent)
    watchpost_store::db::init_db(&db)?;
    watchpost_scheduler::db::init_db(&db)?;
    info!("database migrations complete");
    drop(db);

    // build subsystems — each manager gets its own connection
    let queue = DispatchQueue::new(config.dispatch.capacity);
    let trigger_store = Arc::new(TriggerStore::new(rusqlite::Connection::open(db_path)?));
    let jobs = Arc::new(SqliteJobStore::new(rusqlite::Connection::open(db_path)?));
    let runs = Arc::new(RunStore::new(rusqlite::Connection::open(db_path)?));

    let scheduler = Arc::new(CronScheduler::new(queue.clone(), Arc::clone(&trigger_store)));
    let coordinator = Arc::new(RescheduleCoordinator::new(
        Arc::clone(&scheduler),
        Arc::clone(&trigger_store),
    ));

    let notifier: Arc<dyn Notify> = match config.notify.webhook_url {
        Some(ref url) => {
            info!(url = %url, "difference alerts go to webhook");
            Arc::new(notify::WebhookNotifier::new(url.clone()))
        }
        None => Arc::new(notify::LogNotifier),
    };
    let collaborators = Collaborators {
        capture: Arc::new(capture::HttpCapture::new()),
        compare: Arc::new(capture::ByteCompare),
        notify: notifier,
        artifacts: Arc::new(artifacts::FsArtifactStore::new(&config.artifacts.dir)?),
    };

    let mut pool = WorkerPool::new(
        queue.clone(),
        Arc::clone(&jobs) as Arc<dyn JobRepository>,
        runs,
        collaborators,
        WorkerConfig {
            workers: config.workers.count,
            capture_timeout: Duration::from_secs(config.workers.capture_timeout_secs),
            shutdown_grace: Duration::from_secs(config.workers.shutdown_grace_secs),
        },
    );
    pool.start();

    // Reinstall timers from the trigger cache, then reconcile against
    // the jobs table in case the cache drifted (e.g. a paused flag
    // changed while the daemon was down).
    let installed = coordinator.on_startup().await?;
    let all_jobs = jobs.list()?;
    for job in &all_jobs {
        if let Err(e) = coordinator.on_job_updated(job).await {
            warn!(job_id = %job.id, "startup reconcile failed: {e}");
        }
    }
    info!(
        installed,
        jobs = all_jobs.len(),
        workers = config.workers.count,
        "watchpost running — ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    // Stop firing first, then drain the workers within the grace period.
    scheduler.shutdown();
    pool.shutdown().await;
    info!("bye");
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
