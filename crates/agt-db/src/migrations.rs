//! Forward-only schema migrations.
//!
//! Applied versions are recorded in `schema_migrations`; each pending
//! migration runs inside its own transaction and the version row is written
//! before commit. A failed migration aborts startup.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

const CREATE_AGENT_RUNS: &str = r#"
CREATE TABLE IF NOT EXISTS agent_runs (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id             TEXT NOT NULL,
    run_id               TEXT NOT NULL,
    agent_name           TEXT NOT NULL,
    job_type             TEXT NOT NULL,
    trigger_type         TEXT,
    product              TEXT,
    product_family       TEXT,
    platform             TEXT,
    subdomain            TEXT,
    website              TEXT,
    website_section      TEXT,
    item_name            TEXT,
    environment          TEXT,
    host                 TEXT,
    parent_run_id        TEXT,
    insight_id           TEXT,
    status               TEXT NOT NULL DEFAULT 'running'
        CHECK (status IN ('running','success','failure','partial','timeout','cancelled')),
    start_time           TEXT NOT NULL,
    end_time             TEXT,
    duration_ms          INTEGER NOT NULL DEFAULT 0 CHECK (duration_ms >= 0),
    items_discovered     INTEGER NOT NULL DEFAULT 0 CHECK (items_discovered >= 0),
    items_succeeded      INTEGER NOT NULL DEFAULT 0 CHECK (items_succeeded >= 0),
    items_failed         INTEGER NOT NULL DEFAULT 0 CHECK (items_failed >= 0),
    items_skipped        INTEGER NOT NULL DEFAULT 0 CHECK (items_skipped >= 0),
    input_summary        TEXT,
    output_summary       TEXT,
    source_ref           TEXT,
    target_ref           TEXT,
    error_summary        TEXT,
    error_details        TEXT,
    git_repo             TEXT,
    git_branch           TEXT,
    git_commit_hash      TEXT,
    git_run_tag          TEXT,
    git_commit_source    TEXT
        CHECK (git_commit_source IS NULL OR git_commit_source IN ('manual','llm','ci')),
    git_commit_author    TEXT,
    git_commit_timestamp TEXT,
    api_posted           INTEGER NOT NULL DEFAULT 0,
    api_posted_at        TEXT,
    api_retry_count      INTEGER NOT NULL DEFAULT 0 CHECK (api_retry_count >= 0),
    metrics_json         TEXT,
    context_json         TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
)
"#;

// Reserved: defined by the schema but never written by the core ingestion
// path. Run events live in the NDJSON spool.
const CREATE_RUN_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS run_events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id       TEXT NOT NULL,
    event_type   TEXT NOT NULL,
    timestamp    TEXT NOT NULL,
    payload_json TEXT
)
"#;

const CREATE_COMMITS: &str = r#"
CREATE TABLE IF NOT EXISTS commits (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id         TEXT NOT NULL,
    commit_hash      TEXT NOT NULL,
    commit_source    TEXT NOT NULL CHECK (commit_source IN ('manual','llm','ci')),
    commit_author    TEXT,
    commit_timestamp TEXT,
    created_at       TEXT NOT NULL,
    UNIQUE (event_id, commit_hash)
)
"#;

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial schema",
    statements: &[
        CREATE_AGENT_RUNS,
        CREATE_RUN_EVENTS,
        CREATE_COMMITS,
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_agent_runs_event_id ON agent_runs (event_id)",
        "CREATE INDEX IF NOT EXISTS idx_agent_runs_agent_name ON agent_runs (agent_name)",
        "CREATE INDEX IF NOT EXISTS idx_agent_runs_status ON agent_runs (status)",
        "CREATE INDEX IF NOT EXISTS idx_agent_runs_start_time ON agent_runs (start_time)",
        "CREATE INDEX IF NOT EXISTS idx_agent_runs_created_at ON agent_runs (created_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_agent_runs_agent_status_created \
         ON agent_runs (agent_name, status, created_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_agent_runs_agent_created \
         ON agent_runs (agent_name, created_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_agent_runs_job_type ON agent_runs (job_type)",
    ],
}];

/// Highest migration version this binary knows about.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Apply all pending migrations. Idempotent on an up-to-date store.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("create schema_migrations failed")?;

    let applied: Vec<(i64,)> =
        sqlx::query_as("SELECT version FROM schema_migrations ORDER BY version")
            .fetch_all(pool)
            .await
            .context("read schema_migrations failed")?;
    let applied: Vec<i64> = applied.into_iter().map(|(v,)| v).collect();

    if let Some(max_applied) = applied.last() {
        if *max_applied > latest_version() {
            bail!(
                "store schema version {} is newer than this binary supports ({}); \
                 migrations are forward-only",
                max_applied,
                latest_version()
            );
        }
    }

    for m in MIGRATIONS {
        if applied.contains(&m.version) {
            continue;
        }

        let mut tx = pool
            .begin()
            .await
            .with_context(|| format!("begin migration {} ({})", m.version, m.name))?;

        for stmt in m.statements {
            sqlx::query(stmt)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("migration {} ({}) failed", m.version, m.name))?;
        }

        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
            .bind(m.version)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("record migration {} failed", m.version))?;

        tx.commit()
            .await
            .with_context(|| format!("commit migration {} failed", m.version))?;

        tracing::info!(version = m.version, name = m.name, "migration applied");
    }

    Ok(())
}

/// Versions currently recorded in `schema_migrations`.
pub async fn applied_versions(pool: &SqlitePool) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT version FROM schema_migrations ORDER BY version")
            .fetch_all(pool)
            .await
            .context("read schema_migrations failed")?;
    Ok(rows.into_iter().map(|(v,)| v).collect())
}
