//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

use mailjob_core::{GatewayConfig, ManagerConfig, PoolConfig, WorkerConfig};
use strum::{Display, EnumString};

/// Which [`mailjob_core::JobQueue`] implementation backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QueueBackend {
    /// In-process queue; pending jobs are re-offered by the reconcile sweep
    /// after a restart.
    Memory,
    /// `job_queue` table in the job database; survives restarts and can be
    /// shared by several server processes.
    Sqlite,
}

/// Runtime configuration for mailjob-server.
///
/// Every field has a default so the server works without any environment
/// variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite://mailjob.db"`).
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    pub queue_backend: QueueBackend,

    /// Concurrent workers in this process.
    pub workers: usize,

    /// Wall-clock ceiling per job.
    pub job_timeout_secs: u64,

    /// A running job with no write for this long is failed by the sweep.
    pub stale_after_secs: u64,

    /// Reconcile sweep period; `0` disables the sweep.
    pub reconcile_secs: u64,

    /// How often a progress stream re-reads its job.
    pub stream_interval_ms: u64,

    pub enqueue_retries: u32,

    /// Bearer token required on `/v1` when set.
    pub api_token: Option<String>,

    /// Comma-separated CORS origins; wildcard when unset.
    pub cors_allowed_origins: Option<String>,

    pub enable_swagger: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(default)
        };

        let job_timeout_secs: u64 = parse_env(&lookup, "MAILJOB_JOB_TIMEOUT_SECS", 1800);
        let stale_after_secs = parse_env(
            &lookup,
            "MAILJOB_STALE_AFTER_SECS",
            job_timeout_secs.saturating_add(300),
        );
        let stale_after_secs = if stale_after_secs < job_timeout_secs {
            eprintln!(
                "WARN: MAILJOB_STALE_AFTER_SECS={stale_after_secs} is below the job timeout; \
                 using {job_timeout_secs}"
            );
            job_timeout_secs
        } else {
            stale_after_secs
        };
        let workers: usize = parse_env(&lookup, "MAILJOB_WORKERS", 4);
        let workers = if workers > PoolConfig::MAX_WORKERS {
            eprintln!(
                "WARN: MAILJOB_WORKERS={workers} exceeds {}; capping",
                PoolConfig::MAX_WORKERS
            );
            PoolConfig::MAX_WORKERS
        } else {
            workers
        };
        Self {
            bind_address: env_or("MAILJOB_BIND", "0.0.0.0:3000"),
            database_url: env_or("MAILJOB_DATABASE_URL", "sqlite://mailjob.db"),
            log_level: env_or("MAILJOB_LOG", "info"),
            log_json: flag("MAILJOB_LOG_JSON", false),
            queue_backend: parse_env(&lookup, "MAILJOB_QUEUE", QueueBackend::Sqlite),
            workers,
            job_timeout_secs,
            stale_after_secs,
            reconcile_secs: parse_env(&lookup, "MAILJOB_RECONCILE_SECS", 60),
            stream_interval_ms: parse_env(&lookup, "MAILJOB_STREAM_INTERVAL_MS", 1000),
            enqueue_retries: parse_env(&lookup, "MAILJOB_ENQUEUE_RETRIES", 3),
            api_token: lookup("MAILJOB_API_TOKEN").filter(|t| !t.is_empty()),
            cors_allowed_origins: lookup("MAILJOB_CORS_ORIGINS"),
            enable_swagger: flag("MAILJOB_ENABLE_SWAGGER", true),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            enqueue_retries: self.enqueue_retries,
            stale_after: Duration::from_secs(self.stale_after_secs),
            ..ManagerConfig::default()
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            worker: WorkerConfig {
                job_timeout: Duration::from_secs(self.job_timeout_secs),
                ..WorkerConfig::default()
            },
            reconcile_interval: (self.reconcile_secs > 0)
                .then(|| Duration::from_secs(self.reconcile_secs)),
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            interval: Duration::from_millis(self.stream_interval_ms.max(10)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            eprintln!("WARN: {key}='{raw}' is not valid; using the default");
            default
        }),
    }
}
