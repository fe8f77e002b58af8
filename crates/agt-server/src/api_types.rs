//! Response types for the ingestion API.
//!
//! These are `Serialize + Deserialize` so they can be JSON-encoded by Axum
//! and decoded by tests and the client library. Request payloads live in
//! `agt-schemas` because the client builds the same structs.

use serde::{Deserialize, Serialize};

use agt_db::PragmaReport;
use agt_schemas::FieldError;

// ---------------------------------------------------------------------------
// POST /api/v1/runs
// ---------------------------------------------------------------------------

/// 201 body: `status` is `"created"` or `"duplicate"` (both are success).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRunResponse {
    pub status: String,
    pub event_id: String,
}

// ---------------------------------------------------------------------------
// POST /api/v1/runs/batch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchErrorItem {
    pub index: usize,
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub inserted: usize,
    pub duplicates: usize,
    pub errors: Vec<BatchErrorItem>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// PATCH /api/v1/runs/{event_id}
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRunResponse {
    pub updated: bool,
    pub fields_updated: Vec<String>,
}

// ---------------------------------------------------------------------------
// POST /api/v1/runs/{event_id}/associate-commit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociateCommitResponse {
    pub updated: bool,
    pub commit_hash: String,
}

// ---------------------------------------------------------------------------
// GET /api/v1/runs/{event_id}/commit-url  /repo-url
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitUrlResponse {
    pub commit_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoUrlResponse {
    pub repo_url: Option<String>,
}

// ---------------------------------------------------------------------------
// GET /api/v1/metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub agents: Vec<String>,
    pub job_types: Vec<String>,
    pub cache_hit: bool,
}

// ---------------------------------------------------------------------------
// GET /api/v1/stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_runs: i64,
    /// Canonical status -> stored run count (absent statuses omitted).
    pub by_status: std::collections::BTreeMap<String, i64>,
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDatabase {
    pub ok: bool,
    pub has_runs_table: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub database: HealthDatabase,
    pub pragmas: PragmaReport,
}

// ---------------------------------------------------------------------------
// GET /metrics
// ---------------------------------------------------------------------------

/// Process-lifetime counters; reset on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub runs_created: u64,
    pub runs_duplicate: u64,
    pub runs_updated: u64,
    pub commits_associated: u64,
    pub queries_served: u64,
    pub validation_rejected: u64,
    pub rate_limited: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub uptime_secs: u64,
    pub total_runs: i64,
    pub counters: CountersSnapshot,
    pub pragmas: PragmaReport,
}
