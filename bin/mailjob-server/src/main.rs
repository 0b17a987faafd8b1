//! mailjob-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Build the queue, the job manager and the worker pool.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.
//! 6. Stop the worker pool, letting in-flight jobs finish within a grace period.

mod config;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mailjob_core::{
    AnyQueue, JobManager, JobQueue, MemoryQueue, SqliteQueue, SqliteStore, TaskRegistry,
    WorkerPool,
};
use tracing::{info, warn};

use crate::config::{Config, QueueBackend};
use crate::state::AppState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: MAILJOB_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "mailjob-server starting");

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = SqliteStore::connect(&cfg.database_url).await?;
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. Queue, manager, workers ─────────────────────────────────────────────
    let queue = match cfg.queue_backend {
        QueueBackend::Memory => AnyQueue::Memory(MemoryQueue::new()),
        QueueBackend::Sqlite => AnyQueue::Sqlite(SqliteQueue::new(store.pool().clone())),
    };
    info!(backend = %cfg.queue_backend, "job queue ready");

    let registry = Arc::new(TaskRegistry::with_builtin());
    info!(?registry, "task bodies registered");

    let jobs = Arc::new(JobManager::new(store, queue, registry, cfg.manager_config()));
    let pool = WorkerPool::spawn(Arc::clone(&jobs), cfg.pool_config());

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let state = Arc::new(AppState::new(cfg.clone(), Arc::clone(&jobs)));
    let app = routes::build(state);
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── 6. Workers ─────────────────────────────────────────────────────────────
    pool.shutdown(SHUTDOWN_GRACE).await;
    jobs.queue().close();

    info!("mailjob-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
