//! Ingress validation: loose wire payloads -> typed store inputs.
//!
//! Validation is exhaustive per request — every broken field is reported,
//! not just the first — so writers can fix a payload in one round trip.
//! Status handling is asymmetric: creation accepts legacy aliases, updates
//! and everything downstream speak canonical only.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use agt_db::{CommitAssociation, NewRun, RunFilter, RunPatch};
use agt_schemas::validate::{non_negative, parse_timestamp};
use agt_schemas::{
    validate_commit_hash, AssociateCommitRequest, CommitSource, FieldError, NewRunRequest,
    RunStatus, UpdateRunRequest,
};

// ---------------------------------------------------------------------------
// POST /api/v1/runs
// ---------------------------------------------------------------------------

pub fn validate_new_run(req: &NewRunRequest) -> Result<NewRun, Vec<FieldError>> {
    let mut errors = Vec::new();

    let event_id = match req.event_id.as_deref() {
        None => {
            errors.push(FieldError::missing("event_id"));
            None
        }
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                errors.push(FieldError::invalid(
                    "event_id",
                    format!("not a valid UUID: {raw}"),
                ));
                None
            }
        },
    };

    let run_id = required_string(&mut errors, "run_id", req.run_id.as_deref());
    let agent_name = required_string(&mut errors, "agent_name", req.agent_name.as_deref());
    let job_type = required_string(&mut errors, "job_type", req.job_type.as_deref());

    let start_time = match req.start_time.as_deref() {
        None => {
            errors.push(FieldError::missing("start_time"));
            None
        }
        Some(raw) => collect(&mut errors, parse_timestamp("start_time", raw)),
    };

    // Lenient on creation: aliases normalize (`failed` -> `failure`, ...).
    let status = match req.status.as_deref() {
        None => RunStatus::Running,
        Some(raw) => match RunStatus::parse_lenient(raw) {
            Some(s) => s,
            None => {
                errors.push(FieldError::invalid(
                    "status",
                    format!("unknown status: {raw}"),
                ));
                RunStatus::Running
            }
        },
    };

    let end_time = opt_timestamp(&mut errors, "end_time", req.end_time.as_deref());

    // A null duration normalizes to 0.
    let duration_ms = req
        .duration_ms
        .map(|v| collect(&mut errors, non_negative("duration_ms", v)))
        .flatten()
        .unwrap_or(0);

    let items_discovered = opt_counter(&mut errors, "items_discovered", req.items_discovered);
    let items_succeeded = opt_counter(&mut errors, "items_succeeded", req.items_succeeded);
    let items_failed = opt_counter(&mut errors, "items_failed", req.items_failed);
    let items_skipped = opt_counter(&mut errors, "items_skipped", req.items_skipped);

    // Commit provenance on POST: validated for shape, then dropped. Writing
    // it at creation would leave runs in partial commit state; only PATCH
    // and associate-commit persist these.
    if let Some(raw) = req.git_commit_source.as_deref() {
        if CommitSource::parse(raw).is_none() {
            errors.push(FieldError::invalid(
                "git_commit_source",
                format!("unknown commit source: {raw}"),
            ));
        }
    }
    if let Some(raw) = req.git_commit_timestamp.as_deref() {
        let _ = collect(&mut errors, parse_timestamp("git_commit_timestamp", raw));
    }

    let api_posted_at = opt_timestamp(&mut errors, "api_posted_at", req.api_posted_at.as_deref());
    let api_retry_count = opt_counter(&mut errors, "api_retry_count", req.api_retry_count);

    if !errors.is_empty() {
        return Err(errors);
    }

    // Unwraps are safe: errors is empty, so every required field parsed.
    let mut run = NewRun::new(
        event_id.unwrap(),
        run_id.unwrap(),
        agent_name.unwrap(),
        job_type.unwrap(),
        start_time.unwrap(),
    );
    run.trigger_type = req.trigger_type.clone();
    run.product = req.product.clone();
    run.product_family = req.product_family.clone();
    run.platform = req.platform.clone();
    run.subdomain = req.subdomain.clone();
    run.website = req.website.clone();
    run.website_section = req.website_section.clone();
    run.item_name = req.item_name.clone();
    run.environment = req.environment.clone();
    run.host = req.host.clone();
    run.parent_run_id = req.parent_run_id.clone();
    run.insight_id = req.insight_id.clone();
    run.status = status;
    run.end_time = end_time;
    run.duration_ms = duration_ms;
    run.items_discovered = items_discovered;
    run.items_succeeded = items_succeeded;
    run.items_failed = items_failed;
    run.items_skipped = items_skipped;
    run.input_summary = req.input_summary.clone();
    run.output_summary = req.output_summary.clone();
    run.source_ref = req.source_ref.clone();
    run.target_ref = req.target_ref.clone();
    run.error_summary = req.error_summary.clone();
    run.error_details = req.error_details.clone();
    run.git_repo = req.git_repo.clone();
    run.git_branch = req.git_branch.clone();
    run.git_commit_hash = req.git_commit_hash.clone();
    run.git_run_tag = req.git_run_tag.clone();
    run.api_posted = req.api_posted.unwrap_or(false);
    run.api_posted_at = api_posted_at;
    run.api_retry_count = api_retry_count;
    run.metrics_json = req.metrics_json.clone();
    run.context_json = req.context_json.clone();
    Ok(run)
}

// ---------------------------------------------------------------------------
// PATCH /api/v1/runs/{event_id}
// ---------------------------------------------------------------------------

pub fn validate_update(req: &UpdateRunRequest) -> Result<RunPatch, Vec<FieldError>> {
    let mut errors = Vec::new();

    // Strict on update: aliases are a contract violation here.
    let status = match req.status.as_deref() {
        None => None,
        Some(raw) => match RunStatus::parse_strict(raw) {
            Some(s) => Some(s),
            None => {
                errors.push(FieldError::invalid(
                    "status",
                    format!("not a canonical status: {raw}"),
                ));
                None
            }
        },
    };

    let end_time = opt_timestamp(&mut errors, "end_time", req.end_time.as_deref());
    let duration_ms = req
        .duration_ms
        .map(|v| collect(&mut errors, non_negative("duration_ms", v)))
        .flatten();

    let items_discovered = opt_patch_counter(&mut errors, "items_discovered", req.items_discovered);
    let items_succeeded = opt_patch_counter(&mut errors, "items_succeeded", req.items_succeeded);
    let items_failed = opt_patch_counter(&mut errors, "items_failed", req.items_failed);
    let items_skipped = opt_patch_counter(&mut errors, "items_skipped", req.items_skipped);

    let git_commit_source = match req.git_commit_source.as_deref() {
        None => None,
        Some(raw) => match CommitSource::parse(raw) {
            Some(s) => Some(s),
            None => {
                errors.push(FieldError::invalid(
                    "git_commit_source",
                    format!("unknown commit source: {raw}"),
                ));
                None
            }
        },
    };
    let git_commit_timestamp = opt_timestamp(
        &mut errors,
        "git_commit_timestamp",
        req.git_commit_timestamp.as_deref(),
    );
    let api_posted_at = opt_timestamp(&mut errors, "api_posted_at", req.api_posted_at.as_deref());
    let api_retry_count = opt_patch_counter(&mut errors, "api_retry_count", req.api_retry_count);

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(RunPatch {
        status,
        end_time,
        duration_ms,
        items_discovered,
        items_succeeded,
        items_failed,
        items_skipped,
        input_summary: req.input_summary.clone(),
        output_summary: req.output_summary.clone(),
        source_ref: req.source_ref.clone(),
        target_ref: req.target_ref.clone(),
        error_summary: req.error_summary.clone(),
        error_details: req.error_details.clone(),
        git_repo: req.git_repo.clone(),
        git_branch: req.git_branch.clone(),
        git_commit_hash: req.git_commit_hash.clone(),
        git_run_tag: req.git_run_tag.clone(),
        git_commit_source,
        git_commit_author: req.git_commit_author.clone(),
        git_commit_timestamp,
        api_posted: req.api_posted,
        api_posted_at,
        api_retry_count,
        metrics_json: req.metrics_json.clone(),
        context_json: req.context_json.clone(),
    })
}

// ---------------------------------------------------------------------------
// POST /api/v1/runs/{event_id}/associate-commit
// ---------------------------------------------------------------------------

pub fn validate_associate(req: &AssociateCommitRequest) -> Result<CommitAssociation, Vec<FieldError>> {
    let mut errors = Vec::new();

    let commit_hash = match req.commit_hash.as_deref() {
        None => {
            errors.push(FieldError::missing("commit_hash"));
            None
        }
        Some(raw) => match validate_commit_hash(raw) {
            Ok(()) => Some(raw.to_string()),
            Err(msg) => {
                errors.push(FieldError::invalid("commit_hash", msg));
                None
            }
        },
    };

    let commit_source = match req.commit_source.as_deref() {
        None => {
            errors.push(FieldError::missing("commit_source"));
            None
        }
        Some(raw) => match CommitSource::parse(raw) {
            Some(s) => Some(s),
            None => {
                errors.push(FieldError::invalid(
                    "commit_source",
                    format!("unknown commit source: {raw}"),
                ));
                None
            }
        },
    };

    let commit_timestamp = opt_timestamp(
        &mut errors,
        "commit_timestamp",
        req.commit_timestamp.as_deref(),
    );

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(CommitAssociation {
        commit_hash: commit_hash.unwrap(),
        commit_source: commit_source.unwrap(),
        commit_author: req.commit_author.clone(),
        commit_timestamp,
    })
}

// ---------------------------------------------------------------------------
// GET /api/v1/runs query string
// ---------------------------------------------------------------------------

/// Raw query parameters, validated into a [`RunFilter`].
#[derive(Debug, Default, serde::Deserialize)]
pub struct RunsQuery {
    pub agent_name: Option<String>,
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub created_before: Option<String>,
    pub created_after: Option<String>,
    pub start_time_from: Option<String>,
    pub start_time_to: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

pub fn validate_query(q: &RunsQuery) -> Result<RunFilter, Vec<FieldError>> {
    let mut errors = Vec::new();
    let mut filter = RunFilter::new();

    filter.agent_name = q.agent_name.clone();
    filter.job_type = q.job_type.clone();

    // Filters normalize aliases the same way creation does, so historical
    // callers querying `status=failed` keep working.
    if let Some(raw) = q.status.as_deref() {
        match RunStatus::parse_lenient(raw) {
            Some(s) => filter.status = Some(s),
            None => errors.push(FieldError::query("status", format!("unknown status: {raw}"))),
        }
    }

    filter.created_before = opt_query_timestamp(&mut errors, "created_before", q.created_before.as_deref());
    filter.created_after = opt_query_timestamp(&mut errors, "created_after", q.created_after.as_deref());
    filter.start_time_from =
        opt_query_timestamp(&mut errors, "start_time_from", q.start_time_from.as_deref());
    filter.start_time_to = opt_query_timestamp(&mut errors, "start_time_to", q.start_time_to.as_deref());

    if let Some(raw) = q.limit.as_deref() {
        match raw.parse::<i64>() {
            Ok(v) if (1..=1000).contains(&v) => filter.limit = v,
            _ => errors.push(FieldError::query(
                "limit",
                format!("limit must be 1-1000, got {raw}"),
            )),
        }
    }
    if let Some(raw) = q.offset.as_deref() {
        match raw.parse::<i64>() {
            Ok(v) if v >= 0 => filter.offset = v,
            _ => errors.push(FieldError::query(
                "offset",
                format!("offset must be >= 0, got {raw}"),
            )),
        }
    }

    if errors.is_empty() {
        Ok(filter)
    } else {
        Err(errors)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn required_string(
    errors: &mut Vec<FieldError>,
    field: &str,
    value: Option<&str>,
) -> Option<String> {
    match value {
        None => {
            errors.push(FieldError::missing(field));
            None
        }
        Some(raw) if raw.trim().is_empty() => {
            errors.push(FieldError::invalid(field, "must not be empty"));
            None
        }
        Some(raw) => Some(raw.trim().to_string()),
    }
}

fn collect<T>(errors: &mut Vec<FieldError>, res: Result<T, FieldError>) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(e) => {
            errors.push(e);
            None
        }
    }
}

fn opt_timestamp(
    errors: &mut Vec<FieldError>,
    field: &str,
    value: Option<&str>,
) -> Option<DateTime<Utc>> {
    value.and_then(|raw| collect(errors, parse_timestamp(field, raw)))
}

fn opt_query_timestamp(
    errors: &mut Vec<FieldError>,
    field: &str,
    value: Option<&str>,
) -> Option<DateTime<Utc>> {
    value.and_then(|raw| match parse_timestamp(field, raw) {
        Ok(v) => Some(v),
        Err(_) => {
            errors.push(FieldError::query(
                field,
                format!("invalid ISO-8601 timestamp: {raw}"),
            ));
            None
        }
    })
}

/// Absent counters default to 0 at creation.
fn opt_counter(errors: &mut Vec<FieldError>, field: &str, value: Option<i64>) -> i64 {
    value
        .map(|v| collect(errors, non_negative(field, v)))
        .flatten()
        .unwrap_or(0)
}

/// Patch counters stay `None` when absent (field untouched).
fn opt_patch_counter(errors: &mut Vec<FieldError>, field: &str, value: Option<i64>) -> Option<i64> {
    value.and_then(|v| collect(errors, non_negative(field, v)))
}
