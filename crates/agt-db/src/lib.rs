//! Embedded relational store for agent-run telemetry.
//!
//! Single-file SQLite via sqlx. All mutations flow through one writer pool
//! (size 1) owned by the ingestion process that holds the
//! [`lock::SingleWriterGuard`]; read pools may fan out but open read-only
//! connections with the same mandatory pragmas.
//!
//! Pragma contract, applied on every connection and verified at startup:
//! `journal_mode=DELETE` (no sidecar files on bind-mounted volumes),
//! `synchronous=FULL` (the actual corruption-prevention control),
//! `busy_timeout=30000`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use agt_schemas::{CommitSource, RunStatus};

pub mod lock;
pub mod migrations;

pub use lock::SingleWriterGuard;
pub use migrations::migrate;

/// Busy-retry schedule for mutations: initial attempt plus one retry per
/// entry. Beyond the schedule the operation surfaces a transient error.
const BUSY_RETRY_DELAYS_MS: [u64; 3] = [100, 200, 400];

// ---------------------------------------------------------------------------
// Connection setup
// ---------------------------------------------------------------------------

/// Engine settings for opening pools. Defaults match the pragma contract.
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub path: PathBuf,
    pub journal_mode: String,
    pub synchronous: String,
    pub busy_timeout_ms: u64,
}

impl DbOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            journal_mode: "DELETE".to_string(),
            synchronous: "FULL".to_string(),
            busy_timeout_ms: 30_000,
        }
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let journal = parse_journal_mode(&self.journal_mode)?;
        let synchronous = parse_synchronous(&self.synchronous)?;

        Ok(SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(journal)
            .synchronous(synchronous)
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .foreign_keys(true))
    }
}

fn parse_journal_mode(s: &str) -> Result<SqliteJournalMode> {
    match s.to_ascii_uppercase().as_str() {
        "DELETE" => Ok(SqliteJournalMode::Delete),
        "TRUNCATE" => Ok(SqliteJournalMode::Truncate),
        "PERSIST" => Ok(SqliteJournalMode::Persist),
        "MEMORY" => Ok(SqliteJournalMode::Memory),
        "WAL" => Ok(SqliteJournalMode::Wal),
        "OFF" => Ok(SqliteJournalMode::Off),
        other => bail!("unknown journal mode: {other}"),
    }
}

fn parse_synchronous(s: &str) -> Result<SqliteSynchronous> {
    match s.to_ascii_uppercase().as_str() {
        "OFF" => Ok(SqliteSynchronous::Off),
        "NORMAL" => Ok(SqliteSynchronous::Normal),
        "FULL" => Ok(SqliteSynchronous::Full),
        "EXTRA" => Ok(SqliteSynchronous::Extra),
        other => bail!("unknown synchronous mode: {other}"),
    }
}

/// Open the writer pool: exactly one connection, mutations only.
pub async fn open_write_pool(opts: &DbOptions) -> Result<SqlitePool> {
    if let Some(parent) = opts.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create store dir {:?}", parent))?;
    }

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts.connect_options()?)
        .await
        .with_context(|| format!("open writer pool at {:?}", opts.path))
}

/// Open a read-only pool for query handlers and diagnostic readers.
pub async fn open_read_pool(opts: &DbOptions, max_connections: u32) -> Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(
            opts.connect_options()?
                .read_only(true)
                .create_if_missing(false),
        )
        .await
        .with_context(|| format!("open read pool at {:?}", opts.path))
}

// ---------------------------------------------------------------------------
// Pragma verification
// ---------------------------------------------------------------------------

/// Observed pragma triple, reported by `/health` and `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct PragmaReport {
    pub journal_mode: String,
    pub synchronous: String,
    pub busy_timeout_ms: i64,
}

/// Read the pragmas actually in effect on a connection from `pool`.
pub async fn read_pragmas(pool: &SqlitePool) -> Result<PragmaReport> {
    let (journal,): (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(pool)
        .await
        .context("read journal_mode failed")?;

    let (sync_level,): (i64,) = sqlx::query_as("PRAGMA synchronous")
        .fetch_one(pool)
        .await
        .context("read synchronous failed")?;

    let (busy_timeout_ms,): (i64,) = sqlx::query_as("PRAGMA busy_timeout")
        .fetch_one(pool)
        .await
        .context("read busy_timeout failed")?;

    let synchronous = match sync_level {
        0 => "OFF",
        1 => "NORMAL",
        2 => "FULL",
        3 => "EXTRA",
        _ => "UNKNOWN",
    };

    Ok(PragmaReport {
        journal_mode: journal.to_ascii_uppercase(),
        synchronous: synchronous.to_string(),
        busy_timeout_ms,
    })
}

/// Startup check: the observed pragmas must match the configured contract.
pub async fn verify_pragmas(pool: &SqlitePool, opts: &DbOptions) -> Result<PragmaReport> {
    let report = read_pragmas(pool).await?;

    if report.journal_mode != opts.journal_mode.to_ascii_uppercase() {
        bail!(
            "journal_mode mismatch: configured {}, observed {}",
            opts.journal_mode,
            report.journal_mode
        );
    }
    if report.synchronous != opts.synchronous.to_ascii_uppercase() {
        bail!(
            "synchronous mismatch: configured {}, observed {}",
            opts.synchronous,
            report.synchronous
        );
    }
    if report.busy_timeout_ms != opts.busy_timeout_ms as i64 {
        bail!(
            "busy_timeout mismatch: configured {}, observed {}",
            opts.busy_timeout_ms,
            report.busy_timeout_ms
        );
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Connectivity / integrity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_runs_table: bool,
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &SqlitePool) -> Result<DbStatus> {
    let (one,): (i64,) = sqlx::query_as("SELECT 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'agent_runs')",
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_runs_table: exists,
    })
}

/// `PRAGMA integrity_check` — returns the engine verdict ("ok" when sound).
pub async fn integrity_check(pool: &SqlitePool) -> Result<String> {
    let (verdict,): (String,) = sqlx::query_as("PRAGMA integrity_check")
        .fetch_one(pool)
        .await
        .context("integrity_check failed")?;
    Ok(verdict)
}

// ---------------------------------------------------------------------------
// Busy detection
// ---------------------------------------------------------------------------

/// True when the engine reported lock contention (SQLITE_BUSY / SQLITE_LOCKED
/// family) rather than a constraint or I/O failure.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("5") | Some("6") | Some("262") | Some("517"))
                || db.message().contains("database is locked")
        }
        _ => false,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            // 2067 = SQLITE_CONSTRAINT_UNIQUE, 1555 = SQLITE_CONSTRAINT_PRIMARYKEY
            matches!(db.code().as_deref(), Some("2067") | Some("1555"))
                || db.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Run records
// ---------------------------------------------------------------------------

/// Validated input for a new run row. Commit provenance fields
/// (`git_commit_source` / author / timestamp) are absent: creation never
/// writes them, only PATCH and associate-commit do.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub event_id: Uuid,
    pub run_id: String,
    pub agent_name: String,
    pub job_type: String,
    pub trigger_type: Option<String>,
    pub product: Option<String>,
    pub product_family: Option<String>,
    pub platform: Option<String>,
    pub subdomain: Option<String>,
    pub website: Option<String>,
    pub website_section: Option<String>,
    pub item_name: Option<String>,
    pub environment: Option<String>,
    pub host: Option<String>,
    pub parent_run_id: Option<String>,
    pub insight_id: Option<String>,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub items_discovered: i64,
    pub items_succeeded: i64,
    pub items_failed: i64,
    pub items_skipped: i64,
    pub input_summary: Option<String>,
    pub output_summary: Option<String>,
    pub source_ref: Option<String>,
    pub target_ref: Option<String>,
    pub error_summary: Option<String>,
    pub error_details: Option<String>,
    pub git_repo: Option<String>,
    pub git_branch: Option<String>,
    pub git_commit_hash: Option<String>,
    pub git_run_tag: Option<String>,
    pub api_posted: bool,
    pub api_posted_at: Option<DateTime<Utc>>,
    pub api_retry_count: i64,
    pub metrics_json: Option<Value>,
    pub context_json: Option<Value>,
}

impl NewRun {
    /// Minimal row with required fields; everything else defaulted.
    pub fn new(
        event_id: Uuid,
        run_id: impl Into<String>,
        agent_name: impl Into<String>,
        job_type: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            run_id: run_id.into(),
            agent_name: agent_name.into(),
            job_type: job_type.into(),
            trigger_type: None,
            product: None,
            product_family: None,
            platform: None,
            subdomain: None,
            website: None,
            website_section: None,
            item_name: None,
            environment: None,
            host: None,
            parent_run_id: None,
            insight_id: None,
            status: RunStatus::Running,
            start_time,
            end_time: None,
            duration_ms: 0,
            items_discovered: 0,
            items_succeeded: 0,
            items_failed: 0,
            items_skipped: 0,
            input_summary: None,
            output_summary: None,
            source_ref: None,
            target_ref: None,
            error_summary: None,
            error_details: None,
            git_repo: None,
            git_branch: None,
            git_commit_hash: None,
            git_run_tag: None,
            api_posted: false,
            api_posted_at: None,
            api_retry_count: 0,
            metrics_json: None,
            context_json: None,
        }
    }
}

/// Stored run row as returned by fetch/query. Serializes directly as the
/// wire representation of a run record.
#[derive(Debug, Clone, Serialize)]
pub struct RunRow {
    pub id: i64,
    pub event_id: String,
    pub run_id: String,
    pub agent_name: String,
    pub job_type: String,
    pub trigger_type: Option<String>,
    pub product: Option<String>,
    pub product_family: Option<String>,
    pub platform: Option<String>,
    pub subdomain: Option<String>,
    pub website: Option<String>,
    pub website_section: Option<String>,
    pub item_name: Option<String>,
    pub environment: Option<String>,
    pub host: Option<String>,
    pub parent_run_id: Option<String>,
    pub insight_id: Option<String>,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub items_discovered: i64,
    pub items_succeeded: i64,
    pub items_failed: i64,
    pub items_skipped: i64,
    pub input_summary: Option<String>,
    pub output_summary: Option<String>,
    pub source_ref: Option<String>,
    pub target_ref: Option<String>,
    pub error_summary: Option<String>,
    pub error_details: Option<String>,
    pub git_repo: Option<String>,
    pub git_branch: Option<String>,
    pub git_commit_hash: Option<String>,
    pub git_run_tag: Option<String>,
    pub git_commit_source: Option<CommitSource>,
    pub git_commit_author: Option<String>,
    pub git_commit_timestamp: Option<DateTime<Utc>>,
    pub api_posted: bool,
    pub api_posted_at: Option<DateTime<Utc>>,
    pub api_retry_count: i64,
    pub metrics_json: Option<Value>,
    pub context_json: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const RUN_COLUMNS: &str = "\
    id, event_id, run_id, agent_name, job_type, trigger_type, product, \
    product_family, platform, subdomain, website, website_section, item_name, \
    environment, host, parent_run_id, insight_id, status, start_time, end_time, \
    duration_ms, items_discovered, items_succeeded, items_failed, items_skipped, \
    input_summary, output_summary, source_ref, target_ref, error_summary, \
    error_details, git_repo, git_branch, git_commit_hash, git_run_tag, \
    git_commit_source, git_commit_author, git_commit_timestamp, api_posted, \
    api_posted_at, api_retry_count, metrics_json, context_json, created_at, \
    updated_at";

fn run_from_row(row: &SqliteRow) -> Result<RunRow> {
    let status_raw: String = row.try_get("status")?;
    let status = RunStatus::parse_strict(&status_raw)
        .ok_or_else(|| anyhow!("stored status is not canonical: {status_raw}"))?;

    let source_raw: Option<String> = row.try_get("git_commit_source")?;
    let git_commit_source = match source_raw {
        None => None,
        Some(s) => Some(
            CommitSource::parse(&s)
                .ok_or_else(|| anyhow!("stored commit source is invalid: {s}"))?,
        ),
    };

    Ok(RunRow {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        run_id: row.try_get("run_id")?,
        agent_name: row.try_get("agent_name")?,
        job_type: row.try_get("job_type")?,
        trigger_type: row.try_get("trigger_type")?,
        product: row.try_get("product")?,
        product_family: row.try_get("product_family")?,
        platform: row.try_get("platform")?,
        subdomain: row.try_get("subdomain")?,
        website: row.try_get("website")?,
        website_section: row.try_get("website_section")?,
        item_name: row.try_get("item_name")?,
        environment: row.try_get("environment")?,
        host: row.try_get("host")?,
        parent_run_id: row.try_get("parent_run_id")?,
        insight_id: row.try_get("insight_id")?,
        status,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        duration_ms: row.try_get("duration_ms")?,
        items_discovered: row.try_get("items_discovered")?,
        items_succeeded: row.try_get("items_succeeded")?,
        items_failed: row.try_get("items_failed")?,
        items_skipped: row.try_get("items_skipped")?,
        input_summary: row.try_get("input_summary")?,
        output_summary: row.try_get("output_summary")?,
        source_ref: row.try_get("source_ref")?,
        target_ref: row.try_get("target_ref")?,
        error_summary: row.try_get("error_summary")?,
        error_details: row.try_get("error_details")?,
        git_repo: row.try_get("git_repo")?,
        git_branch: row.try_get("git_branch")?,
        git_commit_hash: row.try_get("git_commit_hash")?,
        git_run_tag: row.try_get("git_run_tag")?,
        git_commit_source,
        git_commit_author: row.try_get("git_commit_author")?,
        git_commit_timestamp: row.try_get("git_commit_timestamp")?,
        api_posted: row.try_get("api_posted")?,
        api_posted_at: row.try_get("api_posted_at")?,
        api_retry_count: row.try_get("api_retry_count")?,
        metrics_json: decode_json_text(row.try_get("metrics_json")?),
        context_json: decode_json_text(row.try_get("context_json")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Opaque JSON columns are stored as text; surface them as parsed values,
/// falling back to a raw string for text that predates validation.
fn decode_json_text(raw: Option<String>) -> Option<Value> {
    raw.map(|s| serde_json::from_str(&s).unwrap_or(Value::String(s)))
}

fn encode_json_text(v: &Option<Value>) -> Option<String> {
    v.as_ref().map(|v| v.to_string())
}

// ---------------------------------------------------------------------------
// Insert (idempotent on event_id)
// ---------------------------------------------------------------------------

/// Result of an insert attempt. A duplicate `event_id` is idempotent
/// success, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Duplicate,
}

impl InsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsertOutcome::Created => "created",
            InsertOutcome::Duplicate => "duplicate",
        }
    }
}

/// Insert a run row, deduplicating on `event_id`.
///
/// Retries on lock contention per [`BUSY_RETRY_DELAYS_MS`]; beyond that the
/// error propagates as transient (the HTTP layer answers 500 and clients
/// fall back to the buffer spool).
pub async fn insert_run(pool: &SqlitePool, run: &NewRun) -> Result<InsertOutcome> {
    let now = Utc::now();
    let event_id = run.event_id.to_string();
    let metrics = encode_json_text(&run.metrics_json);
    let context = encode_json_text(&run.context_json);

    let mut attempt = 0usize;
    loop {
        let res = sqlx::query(
            r#"
            INSERT INTO agent_runs (
              event_id, run_id, agent_name, job_type, trigger_type, product,
              product_family, platform, subdomain, website, website_section,
              item_name, environment, host, parent_run_id, insight_id, status,
              start_time, end_time, duration_ms, items_discovered,
              items_succeeded, items_failed, items_skipped, input_summary,
              output_summary, source_ref, target_ref, error_summary,
              error_details, git_repo, git_branch, git_commit_hash,
              git_run_tag, api_posted, api_posted_at, api_retry_count,
              metrics_json, context_json, created_at, updated_at
            ) VALUES (
              ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
              ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            )
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event_id)
        .bind(&run.run_id)
        .bind(&run.agent_name)
        .bind(&run.job_type)
        .bind(&run.trigger_type)
        .bind(&run.product)
        .bind(&run.product_family)
        .bind(&run.platform)
        .bind(&run.subdomain)
        .bind(&run.website)
        .bind(&run.website_section)
        .bind(&run.item_name)
        .bind(&run.environment)
        .bind(&run.host)
        .bind(&run.parent_run_id)
        .bind(&run.insight_id)
        .bind(run.status.as_str())
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(run.duration_ms)
        .bind(run.items_discovered)
        .bind(run.items_succeeded)
        .bind(run.items_failed)
        .bind(run.items_skipped)
        .bind(&run.input_summary)
        .bind(&run.output_summary)
        .bind(&run.source_ref)
        .bind(&run.target_ref)
        .bind(&run.error_summary)
        .bind(&run.error_details)
        .bind(&run.git_repo)
        .bind(&run.git_branch)
        .bind(&run.git_commit_hash)
        .bind(&run.git_run_tag)
        .bind(run.api_posted)
        .bind(run.api_posted_at)
        .bind(run.api_retry_count)
        .bind(&metrics)
        .bind(&context)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await;

        match res {
            Ok(done) => {
                return Ok(if done.rows_affected() == 0 {
                    InsertOutcome::Duplicate
                } else {
                    InsertOutcome::Created
                });
            }
            // ON CONFLICT covers the dedupe path; a unique error can still
            // surface from a racing writer on another connection.
            Err(e) if is_unique_violation(&e) => return Ok(InsertOutcome::Duplicate),
            Err(e) if is_busy(&e) && attempt < BUSY_RETRY_DELAYS_MS.len() => {
                let delay = BUSY_RETRY_DELAYS_MS[attempt];
                attempt += 1;
                tracing::warn!(event_id = %event_id, attempt, delay_ms = delay, "insert busy; retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(anyhow::Error::new(e).context("insert_run failed")),
        }
    }
}

// ---------------------------------------------------------------------------
// Fetch / query
// ---------------------------------------------------------------------------

pub async fn fetch_run(pool: &SqlitePool, event_id: &str) -> Result<Option<RunRow>> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM agent_runs WHERE event_id = ?");
    let row = sqlx::query(&sql)
        .bind(event_id)
        .fetch_optional(pool)
        .await
        .context("fetch_run failed")?;

    match row {
        Some(row) => Ok(Some(run_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Fixed query filters. `created_*` bounds are exclusive, `start_time_*`
/// bounds inclusive; results are ordered `created_at DESC`.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub agent_name: Option<String>,
    pub status: Option<RunStatus>,
    pub job_type: Option<String>,
    pub created_before: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
    pub start_time_from: Option<DateTime<Utc>>,
    pub start_time_to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl RunFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }
}

pub async fn query_runs(pool: &SqlitePool, filter: &RunFilter) -> Result<Vec<RunRow>> {
    let mut qb = sqlx::QueryBuilder::new(format!(
        "SELECT {RUN_COLUMNS} FROM agent_runs WHERE 1 = 1"
    ));

    if let Some(agent) = &filter.agent_name {
        qb.push(" AND agent_name = ").push_bind(agent);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(job) = &filter.job_type {
        qb.push(" AND job_type = ").push_bind(job);
    }
    if let Some(t) = filter.created_before {
        qb.push(" AND created_at < ").push_bind(t);
    }
    if let Some(t) = filter.created_after {
        qb.push(" AND created_at > ").push_bind(t);
    }
    if let Some(t) = filter.start_time_from {
        qb.push(" AND start_time >= ").push_bind(t);
    }
    if let Some(t) = filter.start_time_to {
        qb.push(" AND start_time <= ").push_bind(t);
    }

    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind(filter.offset);

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("query_runs failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(run_from_row(row)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// Partial update of mutable fields. `None` means "leave unchanged".
///
/// Applying a patch never bumps `updated_at` — only commit association does.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub items_discovered: Option<i64>,
    pub items_succeeded: Option<i64>,
    pub items_failed: Option<i64>,
    pub items_skipped: Option<i64>,
    pub input_summary: Option<String>,
    pub output_summary: Option<String>,
    pub source_ref: Option<String>,
    pub target_ref: Option<String>,
    pub error_summary: Option<String>,
    pub error_details: Option<String>,
    pub git_repo: Option<String>,
    pub git_branch: Option<String>,
    pub git_commit_hash: Option<String>,
    pub git_run_tag: Option<String>,
    pub git_commit_source: Option<CommitSource>,
    pub git_commit_author: Option<String>,
    pub git_commit_timestamp: Option<DateTime<Utc>>,
    pub api_posted: Option<bool>,
    pub api_posted_at: Option<DateTime<Utc>>,
    pub api_retry_count: Option<i64>,
    pub metrics_json: Option<Value>,
    pub context_json: Option<Value>,
}

impl RunPatch {
    /// Names of the fields this patch sets, in declaration order.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.status.is_some() {
            out.push("status");
        }
        if self.end_time.is_some() {
            out.push("end_time");
        }
        if self.duration_ms.is_some() {
            out.push("duration_ms");
        }
        if self.items_discovered.is_some() {
            out.push("items_discovered");
        }
        if self.items_succeeded.is_some() {
            out.push("items_succeeded");
        }
        if self.items_failed.is_some() {
            out.push("items_failed");
        }
        if self.items_skipped.is_some() {
            out.push("items_skipped");
        }
        if self.input_summary.is_some() {
            out.push("input_summary");
        }
        if self.output_summary.is_some() {
            out.push("output_summary");
        }
        if self.source_ref.is_some() {
            out.push("source_ref");
        }
        if self.target_ref.is_some() {
            out.push("target_ref");
        }
        if self.error_summary.is_some() {
            out.push("error_summary");
        }
        if self.error_details.is_some() {
            out.push("error_details");
        }
        if self.git_repo.is_some() {
            out.push("git_repo");
        }
        if self.git_branch.is_some() {
            out.push("git_branch");
        }
        if self.git_commit_hash.is_some() {
            out.push("git_commit_hash");
        }
        if self.git_run_tag.is_some() {
            out.push("git_run_tag");
        }
        if self.git_commit_source.is_some() {
            out.push("git_commit_source");
        }
        if self.git_commit_author.is_some() {
            out.push("git_commit_author");
        }
        if self.git_commit_timestamp.is_some() {
            out.push("git_commit_timestamp");
        }
        if self.api_posted.is_some() {
            out.push("api_posted");
        }
        if self.api_posted_at.is_some() {
            out.push("api_posted_at");
        }
        if self.api_retry_count.is_some() {
            out.push("api_retry_count");
        }
        if self.metrics_json.is_some() {
            out.push("metrics_json");
        }
        if self.context_json.is_some() {
            out.push("context_json");
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }
}

/// Apply a patch to an existing run.
///
/// Returns `Ok(None)` when no row matches `event_id`, otherwise the list of
/// updated field names. An empty patch is a caller error.
pub async fn update_run(
    pool: &SqlitePool,
    event_id: &str,
    patch: &RunPatch,
) -> Result<Option<Vec<&'static str>>> {
    let fields = patch.field_names();
    if fields.is_empty() {
        bail!("update_run called with an empty patch");
    }

    let metrics = encode_json_text(&patch.metrics_json);
    let context = encode_json_text(&patch.context_json);

    let mut attempt = 0usize;
    loop {
        let mut qb = sqlx::QueryBuilder::new("UPDATE agent_runs SET ");
        {
            let mut sep = qb.separated(", ");
            if let Some(v) = patch.status {
                sep.push("status = ").push_bind_unseparated(v.as_str());
            }
            if let Some(v) = patch.end_time {
                sep.push("end_time = ").push_bind_unseparated(v);
            }
            if let Some(v) = patch.duration_ms {
                sep.push("duration_ms = ").push_bind_unseparated(v);
            }
            if let Some(v) = patch.items_discovered {
                sep.push("items_discovered = ").push_bind_unseparated(v);
            }
            if let Some(v) = patch.items_succeeded {
                sep.push("items_succeeded = ").push_bind_unseparated(v);
            }
            if let Some(v) = patch.items_failed {
                sep.push("items_failed = ").push_bind_unseparated(v);
            }
            if let Some(v) = patch.items_skipped {
                sep.push("items_skipped = ").push_bind_unseparated(v);
            }
            if let Some(v) = &patch.input_summary {
                sep.push("input_summary = ").push_bind_unseparated(v);
            }
            if let Some(v) = &patch.output_summary {
                sep.push("output_summary = ").push_bind_unseparated(v);
            }
            if let Some(v) = &patch.source_ref {
                sep.push("source_ref = ").push_bind_unseparated(v);
            }
            if let Some(v) = &patch.target_ref {
                sep.push("target_ref = ").push_bind_unseparated(v);
            }
            if let Some(v) = &patch.error_summary {
                sep.push("error_summary = ").push_bind_unseparated(v);
            }
            if let Some(v) = &patch.error_details {
                sep.push("error_details = ").push_bind_unseparated(v);
            }
            if let Some(v) = &patch.git_repo {
                sep.push("git_repo = ").push_bind_unseparated(v);
            }
            if let Some(v) = &patch.git_branch {
                sep.push("git_branch = ").push_bind_unseparated(v);
            }
            if let Some(v) = &patch.git_commit_hash {
                sep.push("git_commit_hash = ").push_bind_unseparated(v);
            }
            if let Some(v) = &patch.git_run_tag {
                sep.push("git_run_tag = ").push_bind_unseparated(v);
            }
            if let Some(v) = patch.git_commit_source {
                sep.push("git_commit_source = ")
                    .push_bind_unseparated(v.as_str());
            }
            if let Some(v) = &patch.git_commit_author {
                sep.push("git_commit_author = ").push_bind_unseparated(v);
            }
            if let Some(v) = patch.git_commit_timestamp {
                sep.push("git_commit_timestamp = ").push_bind_unseparated(v);
            }
            if let Some(v) = patch.api_posted {
                sep.push("api_posted = ").push_bind_unseparated(v);
            }
            if let Some(v) = patch.api_posted_at {
                sep.push("api_posted_at = ").push_bind_unseparated(v);
            }
            if let Some(v) = patch.api_retry_count {
                sep.push("api_retry_count = ").push_bind_unseparated(v);
            }
            if let Some(v) = &metrics {
                sep.push("metrics_json = ").push_bind_unseparated(v);
            }
            if let Some(v) = &context {
                sep.push("context_json = ").push_bind_unseparated(v);
            }
        }
        qb.push(" WHERE event_id = ").push_bind(event_id);

        match qb.build().execute(pool).await {
            Ok(done) => {
                return Ok(if done.rows_affected() == 0 {
                    None
                } else {
                    Some(fields.clone())
                });
            }
            Err(e) if is_busy(&e) && attempt < BUSY_RETRY_DELAYS_MS.len() => {
                let delay = BUSY_RETRY_DELAYS_MS[attempt];
                attempt += 1;
                tracing::warn!(event_id, attempt, delay_ms = delay, "update busy; retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(anyhow::Error::new(e).context("update_run failed")),
        }
    }
}

// ---------------------------------------------------------------------------
// Commit association
// ---------------------------------------------------------------------------

/// Commit metadata stamped onto an existing run.
#[derive(Debug, Clone)]
pub struct CommitAssociation {
    pub commit_hash: String,
    pub commit_source: CommitSource,
    pub commit_author: Option<String>,
    pub commit_timestamp: Option<DateTime<Utc>>,
}

/// Associate a commit with a run; authoritative on every call.
///
/// Re-association with the same hash is a no-op ack; a different hash
/// overwrites. This is the one mutation that bumps `updated_at`. Returns
/// false when the run does not exist.
pub async fn associate_commit(
    pool: &SqlitePool,
    event_id: &str,
    commit: &CommitAssociation,
) -> Result<bool> {
    let mut attempt = 0usize;
    loop {
        match try_associate_commit(pool, event_id, commit).await {
            Ok(found) => return Ok(found),
            Err(e) => {
                let busy = e
                    .downcast_ref::<sqlx::Error>()
                    .map(is_busy)
                    .unwrap_or(false);
                if !busy || attempt >= BUSY_RETRY_DELAYS_MS.len() {
                    return Err(e.context("associate_commit failed"));
                }
                let delay = BUSY_RETRY_DELAYS_MS[attempt];
                attempt += 1;
                tracing::warn!(event_id, attempt, delay_ms = delay, "associate busy; retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

async fn try_associate_commit(
    pool: &SqlitePool,
    event_id: &str,
    commit: &CommitAssociation,
) -> Result<bool> {
    let now = Utc::now();
    let mut tx = pool.begin().await.map_err(anyhow::Error::new)?;

    let done = sqlx::query(
        r#"
        UPDATE agent_runs
           SET git_commit_hash      = ?,
               git_commit_source    = ?,
               git_commit_author    = ?,
               git_commit_timestamp = ?,
               updated_at           = ?
         WHERE event_id = ?
        "#,
    )
    .bind(&commit.commit_hash)
    .bind(commit.commit_source.as_str())
    .bind(&commit.commit_author)
    .bind(commit.commit_timestamp)
    .bind(now)
    .bind(event_id)
    .execute(&mut *tx)
    .await
    .map_err(anyhow::Error::new)?;

    if done.rows_affected() == 0 {
        tx.rollback().await.ok();
        return Ok(false);
    }

    // History row; re-association with the same hash refreshes provenance.
    sqlx::query(
        r#"
        INSERT INTO commits (event_id, commit_hash, commit_source,
                             commit_author, commit_timestamp, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (event_id, commit_hash) DO UPDATE
            SET commit_source    = excluded.commit_source,
                commit_author    = excluded.commit_author,
                commit_timestamp = excluded.commit_timestamp
        "#,
    )
    .bind(event_id)
    .bind(&commit.commit_hash)
    .bind(commit.commit_source.as_str())
    .bind(&commit.commit_author)
    .bind(commit.commit_timestamp)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(anyhow::Error::new)?;

    tx.commit().await.map_err(anyhow::Error::new)?;
    Ok(true)
}

/// One row of the per-run association history.
#[derive(Debug, Clone, Serialize)]
pub struct CommitRow {
    pub id: i64,
    pub event_id: String,
    pub commit_hash: String,
    pub commit_source: CommitSource,
    pub commit_author: Option<String>,
    pub commit_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Association history for a run, oldest first. The run row itself only
/// carries the latest association; this keeps every hash ever stamped.
pub async fn list_commits_for_run(pool: &SqlitePool, event_id: &str) -> Result<Vec<CommitRow>> {
    let rows = sqlx::query(
        r#"
        SELECT id, event_id, commit_hash, commit_source, commit_author,
               commit_timestamp, created_at
          FROM commits
         WHERE event_id = ?
         ORDER BY id ASC
        "#,
    )
    .bind(event_id)
    .fetch_all(pool)
    .await
    .context("list_commits_for_run failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let source_raw: String = row.try_get("commit_source")?;
        let commit_source = CommitSource::parse(&source_raw)
            .ok_or_else(|| anyhow!("stored commit source is invalid: {source_raw}"))?;
        out.push(CommitRow {
            id: row.try_get("id")?,
            event_id: row.try_get("event_id")?,
            commit_hash: row.try_get("commit_hash")?,
            commit_source,
            commit_author: row.try_get("commit_author")?,
            commit_timestamp: row.try_get("commit_timestamp")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Metadata enumeration
// ---------------------------------------------------------------------------

pub async fn list_distinct_agents(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT agent_name FROM agent_runs ORDER BY agent_name")
            .fetch_all(pool)
            .await
            .context("list_distinct_agents failed")?;
    Ok(rows.into_iter().map(|(a,)| a).collect())
}

pub async fn list_distinct_job_types(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT job_type FROM agent_runs ORDER BY job_type")
            .fetch_all(pool)
            .await
            .context("list_distinct_job_types failed")?;
    Ok(rows.into_iter().map(|(j,)| j).collect())
}

/// Total stored runs (metrics endpoint).
pub async fn count_runs(pool: &SqlitePool) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agent_runs")
        .fetch_one(pool)
        .await
        .context("count_runs failed")?;
    Ok(n)
}

/// Run counts grouped by canonical status.
pub async fn count_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM agent_runs GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await
    .context("count_by_status failed")?;
    Ok(rows)
}
