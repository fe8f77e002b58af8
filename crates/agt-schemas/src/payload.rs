//! Request payloads for the ingestion API.
//!
//! All fields are optional at the wire level; the service validates presence
//! and types explicitly so it can answer with precise `{"detail": [...]}`
//! validation errors instead of opaque deserialization failures.  The client
//! library builds these same structs for its primary POST/PATCH path and for
//! buffer-spool replay, so a buffered entry is byte-compatible with a live
//! request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /api/v1/runs` (and each item of the batch variant).
///
/// Required by the service: `event_id`, `run_id`, `agent_name`, `job_type`,
/// `start_time`. Everything else is optional. `git_commit_source`,
/// `git_commit_author` and `git_commit_timestamp` are accepted syntactically
/// but never persisted at creation; commit metadata is written only by PATCH
/// and associate-commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRunRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// `null` normalizes to 0 on ingress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_discovered: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_succeeded: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_failed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_skipped: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_run_tag: Option<String>,
    // Accepted but dropped at creation (see module docs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit_author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit_timestamp: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_posted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_posted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_retry_count: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_json: Option<Value>,
}

/// Body of `PATCH /api/v1/runs/{event_id}`.
///
/// Null-valued (absent) fields are ignored; at least one field must be
/// present. `status` here is strict: aliases are a 422.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRunRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_discovered: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_succeeded: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_failed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_skipped: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_run_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit_author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit_timestamp: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_posted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_posted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_retry_count: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_json: Option<Value>,
}

impl UpdateRunRequest {
    /// True when every field is absent (the PATCH would be a no-op).
    pub fn is_empty(&self) -> bool {
        serde_json::to_value(self)
            .map(|v| v.as_object().map(|o| o.is_empty()).unwrap_or(true))
            .unwrap_or(true)
    }
}

/// Body of `POST /api/v1/runs/{event_id}/associate-commit`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssociateCommitRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<String>,
}
