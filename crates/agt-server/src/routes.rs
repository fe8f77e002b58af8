//! Axum router and all HTTP handlers for the ingestion service.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! the tracing layer. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.
//!
//! Concurrency model: query handlers run on the read pool in parallel;
//! mutations serialize on the size-1 write pool behind the process-wide
//! writer lock. Every write invalidates the metadata cache.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use tracing::info;

use agt_schemas::{AssociateCommitRequest, NewRunRequest, UpdateRunRequest};

use crate::api_types::{
    AssociateCommitResponse, BatchErrorItem, BatchResponse, CommitUrlResponse, CreateRunResponse,
    HealthDatabase, HealthResponse, MetadataResponse, MetricsResponse, RepoUrlResponse,
    StatsResponse, UpdateRunResponse,
};
use crate::cache::MetadataSnapshot;
use crate::error::ApiError;
use crate::giturl;
use crate::middleware::{rate_limit, require_bearer};
use crate::state::{bump, uptime_secs, AppState};
use crate::validate::{
    validate_associate, validate_new_run, validate_query, validate_update, RunsQuery,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Auth and rate-limit middleware are part of the router (they are
/// behavior, not infrastructure); the tracing layer is attached by
/// `main.rs` so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/runs", post(create_run).get(query_runs))
        .route("/api/v1/runs/batch", post(create_runs_batch))
        .route("/api/v1/runs/:event_id", get(get_run).patch(update_run))
        .route(
            "/api/v1/runs/:event_id/associate-commit",
            post(associate_commit),
        )
        .route("/api/v1/runs/:event_id/commits", get(list_commits))
        .route("/api/v1/runs/:event_id/commit-url", get(commit_url))
        .route("/api/v1/runs/:event_id/repo-url", get(repo_url))
        .route("/api/v1/metadata", get(metadata))
        .route("/api/v1/stats", get(stats))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            require_bearer,
        ))
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit,
        ))
        .with_state(state)
}

fn body_rejection(rej: JsonRejection) -> ApiError {
    ApiError::Detail(
        StatusCode::UNPROCESSABLE_ENTITY,
        format!("malformed JSON body: {rej}"),
    )
}

// ---------------------------------------------------------------------------
// POST /api/v1/runs
// ---------------------------------------------------------------------------

pub(crate) async fn create_run(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<NewRunRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(body_rejection)?;

    let run = validate_new_run(&req).map_err(|errors| {
        bump(&st.counters.validation_rejected);
        ApiError::unprocessable(errors)
    })?;

    let outcome = agt_db::insert_run(&st.write_pool, &run).await?;
    st.cache.invalidate().await;

    match outcome {
        agt_db::InsertOutcome::Created => bump(&st.counters.runs_created),
        agt_db::InsertOutcome::Duplicate => bump(&st.counters.runs_duplicate),
    }
    info!(event_id = %run.event_id, outcome = outcome.as_str(), "run ingested");

    // Duplicate is idempotent success: same 201, different status marker.
    Ok((
        StatusCode::CREATED,
        Json(CreateRunResponse {
            status: outcome.as_str().to_string(),
            event_id: run.event_id.to_string(),
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// POST /api/v1/runs/batch
// ---------------------------------------------------------------------------

pub(crate) async fn create_runs_batch(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<Vec<NewRunRequest>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(items) = payload.map_err(body_rejection)?;

    let total = items.len();
    let mut inserted = 0usize;
    let mut duplicates = 0usize;
    let mut errors = Vec::new();

    for (index, item) in items.iter().enumerate() {
        let run = match validate_new_run(item) {
            Ok(run) => run,
            Err(item_errors) => {
                bump(&st.counters.validation_rejected);
                errors.push(BatchErrorItem {
                    index,
                    errors: item_errors,
                });
                continue;
            }
        };

        match agt_db::insert_run(&st.write_pool, &run).await? {
            agt_db::InsertOutcome::Created => {
                bump(&st.counters.runs_created);
                inserted += 1;
            }
            agt_db::InsertOutcome::Duplicate => {
                bump(&st.counters.runs_duplicate);
                duplicates += 1;
            }
        }
    }

    if inserted > 0 {
        st.cache.invalidate().await;
    }
    info!(total, inserted, duplicates, rejected = errors.len(), "batch ingested");

    Ok((
        StatusCode::OK,
        Json(BatchResponse {
            inserted,
            duplicates,
            errors,
            total,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /api/v1/runs
// ---------------------------------------------------------------------------

pub(crate) async fn query_runs(
    State(st): State<Arc<AppState>>,
    Query(q): Query<RunsQuery>,
) -> Result<Response, ApiError> {
    let filter = validate_query(&q).map_err(ApiError::bad_filter)?;

    let rows = agt_db::query_runs(&st.read_pool, &filter).await?;
    bump(&st.counters.queries_served);

    Ok((StatusCode::OK, Json(rows)).into_response())
}

// ---------------------------------------------------------------------------
// GET /api/v1/runs/{event_id}
// ---------------------------------------------------------------------------

pub(crate) async fn get_run(
    State(st): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Response, ApiError> {
    let row = agt_db::fetch_run(&st.read_pool, &event_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run not found: {event_id}")))?;

    bump(&st.counters.queries_served);
    // Single record: an object, not a one-element array.
    Ok((StatusCode::OK, Json(row)).into_response())
}

// ---------------------------------------------------------------------------
// PATCH /api/v1/runs/{event_id}
// ---------------------------------------------------------------------------

pub(crate) async fn update_run(
    State(st): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    payload: Result<Json<UpdateRunRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(body_rejection)?;

    if req.is_empty() {
        return Err(ApiError::bad_request(
            "update requires at least one non-null field",
        ));
    }

    let patch = validate_update(&req).map_err(|errors| {
        bump(&st.counters.validation_rejected);
        ApiError::unprocessable(errors)
    })?;

    let fields = agt_db::update_run(&st.write_pool, &event_id, &patch)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run not found: {event_id}")))?;

    st.cache.invalidate().await;
    bump(&st.counters.runs_updated);
    info!(event_id = %event_id, fields = ?fields, "run updated");

    Ok((
        StatusCode::OK,
        Json(UpdateRunResponse {
            updated: true,
            fields_updated: fields.iter().map(|f| f.to_string()).collect(),
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// POST /api/v1/runs/{event_id}/associate-commit
// ---------------------------------------------------------------------------

pub(crate) async fn associate_commit(
    State(st): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    payload: Result<Json<AssociateCommitRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(body_rejection)?;

    let assoc = validate_associate(&req).map_err(|errors| {
        bump(&st.counters.validation_rejected);
        ApiError::unprocessable(errors)
    })?;

    let found = agt_db::associate_commit(&st.write_pool, &event_id, &assoc).await?;
    if !found {
        return Err(ApiError::not_found(format!("run not found: {event_id}")));
    }

    st.cache.invalidate().await;
    bump(&st.counters.commits_associated);
    info!(event_id = %event_id, commit = %assoc.commit_hash, "commit associated");

    Ok((
        StatusCode::OK,
        Json(AssociateCommitResponse {
            updated: true,
            commit_hash: assoc.commit_hash,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /api/v1/runs/{event_id}/commits
// ---------------------------------------------------------------------------

pub(crate) async fn list_commits(
    State(st): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Response, ApiError> {
    let row = agt_db::fetch_run(&st.read_pool, &event_id).await?;
    if row.is_none() {
        return Err(ApiError::not_found(format!("run not found: {event_id}")));
    }

    let commits = agt_db::list_commits_for_run(&st.read_pool, &event_id).await?;
    bump(&st.counters.queries_served);
    Ok((StatusCode::OK, Json(commits)).into_response())
}

// ---------------------------------------------------------------------------
// GET /api/v1/runs/{event_id}/commit-url  /repo-url
// ---------------------------------------------------------------------------

pub(crate) async fn commit_url(
    State(st): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Response, ApiError> {
    let row = agt_db::fetch_run(&st.read_pool, &event_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run not found: {event_id}")))?;

    let url = match (row.git_repo.as_deref(), row.git_commit_hash.as_deref()) {
        (Some(repo), Some(hash)) => giturl::commit_url(repo, hash),
        _ => None,
    };

    Ok((StatusCode::OK, Json(CommitUrlResponse { commit_url: url })).into_response())
}

pub(crate) async fn repo_url(
    State(st): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Response, ApiError> {
    let row = agt_db::fetch_run(&st.read_pool, &event_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run not found: {event_id}")))?;

    let url = row.git_repo.as_deref().and_then(giturl::repo_url);

    Ok((StatusCode::OK, Json(RepoUrlResponse { repo_url: url })).into_response())
}

// ---------------------------------------------------------------------------
// GET /api/v1/metadata
// ---------------------------------------------------------------------------

pub(crate) async fn metadata(State(st): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let pool = st.read_pool.clone();
    let (snapshot, cache_hit) = st
        .cache
        .get_or_refill(|| async move {
            let agents = agt_db::list_distinct_agents(&pool).await?;
            let job_types = agt_db::list_distinct_job_types(&pool).await?;
            Ok(MetadataSnapshot { agents, job_types })
        })
        .await?;

    Ok((
        StatusCode::OK,
        Json(MetadataResponse {
            agents: snapshot.agents,
            job_types: snapshot.job_types,
            cache_hit,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /api/v1/stats
// ---------------------------------------------------------------------------

pub(crate) async fn stats(State(st): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let total_runs = agt_db::count_runs(&st.read_pool).await?;
    let by_status = agt_db::count_by_status(&st.read_pool)
        .await?
        .into_iter()
        .collect();

    bump(&st.counters.queries_served);
    Ok((
        StatusCode::OK,
        Json(StatsResponse {
            total_runs,
            by_status,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let db = agt_db::status(&st.read_pool).await?;
    let pragmas = agt_db::read_pragmas(&st.read_pool).await?;

    Ok((
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            service: st.build.service,
            version: st.build.version,
            database: HealthDatabase {
                ok: db.ok,
                has_runs_table: db.has_runs_table,
            },
            pragmas,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /metrics
// ---------------------------------------------------------------------------

pub(crate) async fn metrics(State(st): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let total_runs = agt_db::count_runs(&st.read_pool).await?;
    let pragmas = agt_db::read_pragmas(&st.read_pool).await?;

    Ok((
        StatusCode::OK,
        Json(MetricsResponse {
            uptime_secs: uptime_secs(),
            total_runs,
            counters: st.counters.snapshot(),
            pragmas,
        }),
    )
        .into_response())
}
