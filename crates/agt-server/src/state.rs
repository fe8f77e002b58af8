//! Shared runtime state for the ingestion service.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The write pool is
//! size 1 (single-writer invariant); the read pool fans out for query
//! handlers. Nothing here is process-external — cross-process state lives
//! only in the store file and the buffer spool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use sqlx::SqlitePool;

use agt_config::TelemetryConfig;

use crate::api_types::CountersSnapshot;
use crate::cache::{MetadataCache, DEFAULT_TTL};

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Process-lifetime request counters surfaced by `/metrics`.
#[derive(Debug, Default)]
pub struct Counters {
    pub runs_created: AtomicU64,
    pub runs_duplicate: AtomicU64,
    pub runs_updated: AtomicU64,
    pub commits_associated: AtomicU64,
    pub queries_served: AtomicU64,
    pub validation_rejected: AtomicU64,
    pub rate_limited: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            runs_created: self.runs_created.load(Ordering::Relaxed),
            runs_duplicate: self.runs_duplicate.load(Ordering::Relaxed),
            runs_updated: self.runs_updated.load(Ordering::Relaxed),
            commits_associated: self.commits_associated.load(Ordering::Relaxed),
            queries_served: self.queries_served.load(Ordering::Relaxed),
            validation_rejected: self.validation_rejected.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

/// Fixed-window per-minute limiter keyed by client identifier.
#[derive(Debug)]
pub struct RateLimiter {
    pub rpm: u32,
    windows: Mutex<HashMap<String, (u64, u32)>>,
}

impl RateLimiter {
    pub fn new(rpm: u32) -> Self {
        Self {
            rpm,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `key`; false means the minute budget is spent.
    pub fn allow(&self, key: &str) -> bool {
        let minute = chrono::Utc::now().timestamp() as u64 / 60;
        let mut windows = self.windows.lock().expect("rate limiter poisoned");

        let slot = windows.entry(key.to_string()).or_insert((minute, 0));
        if slot.0 != minute {
            *slot = (minute, 0);
        }
        if slot.1 >= self.rpm {
            return false;
        }
        slot.1 += 1;
        true
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    pub cfg: TelemetryConfig,
    pub build: BuildInfo,
    pub write_pool: SqlitePool,
    pub read_pool: SqlitePool,
    pub cache: MetadataCache,
    pub counters: Counters,
    pub rate: Option<RateLimiter>,
}

impl AppState {
    pub fn new(cfg: TelemetryConfig, write_pool: SqlitePool, read_pool: SqlitePool) -> Self {
        let rate = if cfg.rate_limit_enabled {
            Some(RateLimiter::new(cfg.rate_limit_rpm))
        } else {
            None
        };

        Self {
            cfg,
            build: BuildInfo {
                service: "agt-server",
                version: env!("CARGO_PKG_VERSION"),
            },
            write_pool,
            read_pool,
            cache: MetadataCache::new(DEFAULT_TTL),
            counters: Counters::default(),
            rate,
        }
    }

    /// Engine options derived from config; used for pragma verification.
    pub fn db_options(&self) -> agt_db::DbOptions {
        agt_db::DbOptions {
            path: self.cfg.db_path.clone(),
            journal_mode: self.cfg.journal_mode.clone(),
            synchronous: self.cfg.synchronous.clone(),
            busy_timeout_ms: self.cfg.busy_timeout_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
