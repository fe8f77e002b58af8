//! Field-level validation shared by the service and the client library.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted `run_id` length, enforced in the client library.
/// The store itself imposes no bound (defense in depth lives at the edge).
pub const RUN_ID_MAX_LEN: usize = 255;

// ---------------------------------------------------------------------------
// FieldError — one entry of a validation error response
// ---------------------------------------------------------------------------

/// A single validation failure, serialized as
/// `{"loc": ["body", "field"], "msg": "...", "type": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    pub fn missing(field: &str) -> Self {
        Self {
            loc: vec!["body".to_string(), field.to_string()],
            msg: "field required".to_string(),
            kind: "value_error.missing".to_string(),
        }
    }

    pub fn invalid(field: &str, msg: impl Into<String>) -> Self {
        Self {
            loc: vec!["body".to_string(), field.to_string()],
            msg: msg.into(),
            kind: "value_error".to_string(),
        }
    }

    /// Variant for query-string parameters (`loc: ["query", name]`).
    pub fn query(field: &str, msg: impl Into<String>) -> Self {
        Self {
            loc: vec!["query".to_string(), field.to_string()],
            msg: msg.into(),
            kind: "value_error".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Field parsers
// ---------------------------------------------------------------------------

/// Parse an ISO-8601 timestamp with timezone, normalizing to UTC.
///
/// Accepts RFC 3339 (`2026-01-05T18:40:27Z`, `2026-01-05T18:40:27+02:00`).
pub fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, FieldError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            FieldError::invalid(
                field,
                format!("invalid ISO-8601 timestamp '{raw}': {e}"),
            )
        })
}

/// Reject negative counters / durations.
pub fn non_negative(field: &str, value: i64) -> Result<i64, FieldError> {
    if value < 0 {
        Err(FieldError::invalid(
            field,
            format!("must be non-negative, got {value}"),
        ))
    } else {
        Ok(value)
    }
}

/// Validate a caller-supplied run id and return the trimmed form.
///
/// Rules: non-empty after trimming, at most [`RUN_ID_MAX_LEN`] characters,
/// no path separators and no NUL byte (run ids end up in file names and
/// query strings on the client side).
pub fn validate_run_id(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("run_id is empty after trimming".to_string());
    }
    if trimmed.len() > RUN_ID_MAX_LEN {
        return Err(format!(
            "run_id exceeds {RUN_ID_MAX_LEN} characters ({})",
            trimmed.len()
        ));
    }
    if trimmed.contains('/') || trimmed.contains('\\') || trimmed.contains('\0') {
        return Err("run_id must not contain path separators or NUL".to_string());
    }
    Ok(trimmed.to_string())
}

/// Validate a commit hash: 7 to 40 hex characters.
pub fn validate_commit_hash(raw: &str) -> Result<(), String> {
    let len = raw.len();
    if !(7..=40).contains(&len) {
        return Err(format!("commit_hash length must be 7-40, got {len}"));
    }
    if !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("commit_hash must be hexadecimal".to_string());
    }
    Ok(())
}
