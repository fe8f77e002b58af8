//! Shared wire and domain types for the AgentTrack telemetry pipeline.
//!
//! Everything here is `Serialize + Deserialize` so the same types travel
//! through the HTTP surface, the client library, and the buffer spool.
//! No I/O lives in this crate.

use serde::{Deserialize, Serialize};

pub mod payload;
pub mod validate;

pub use payload::{AssociateCommitRequest, NewRunRequest, UpdateRunRequest};
pub use validate::{validate_commit_hash, validate_run_id, FieldError, RUN_ID_MAX_LEN};

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Canonical run status as stored at rest.
///
/// Ingress (POST) additionally accepts the legacy aliases `failed`,
/// `completed` and `succeeded`; see [`RunStatus::parse_lenient`]. Updates and
/// query filters on the strict path use [`RunStatus::parse_strict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failure,
    Partial,
    Timeout,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Partial => "partial",
            RunStatus::Timeout => "timeout",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a canonical status string. Aliases are rejected.
    pub fn parse_strict(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "failure" => Some(RunStatus::Failure),
            "partial" => Some(RunStatus::Partial),
            "timeout" => Some(RunStatus::Timeout),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// Parse a status string accepting writer-side aliases.
    ///
    /// `failed -> failure`, `completed -> success`, `succeeded -> success`.
    /// Canonical values pass through unchanged.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s {
            "failed" => Some(RunStatus::Failure),
            "completed" | "succeeded" => Some(RunStatus::Success),
            other => Self::parse_strict(other),
        }
    }

    /// All canonical values, in declaration order.
    pub fn all() -> &'static [RunStatus] {
        &[
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Failure,
            RunStatus::Partial,
            RunStatus::Timeout,
            RunStatus::Cancelled,
        ]
    }
}

// ---------------------------------------------------------------------------
// CommitSource
// ---------------------------------------------------------------------------

/// Provenance of an associated git commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitSource {
    Manual,
    Llm,
    Ci,
}

impl CommitSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitSource::Manual => "manual",
            CommitSource::Llm => "llm",
            CommitSource::Ci => "ci",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(CommitSource::Manual),
            "llm" => Some(CommitSource::Llm),
            "ci" => Some(CommitSource::Ci),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_statuses_round_trip() {
        for st in RunStatus::all() {
            assert_eq!(RunStatus::parse_strict(st.as_str()), Some(*st));
            assert_eq!(RunStatus::parse_lenient(st.as_str()), Some(*st));
        }
    }

    #[test]
    fn aliases_normalize_on_lenient_parse_only() {
        assert_eq!(RunStatus::parse_lenient("failed"), Some(RunStatus::Failure));
        assert_eq!(
            RunStatus::parse_lenient("completed"),
            Some(RunStatus::Success)
        );
        assert_eq!(
            RunStatus::parse_lenient("succeeded"),
            Some(RunStatus::Success)
        );

        assert_eq!(RunStatus::parse_strict("failed"), None);
        assert_eq!(RunStatus::parse_strict("completed"), None);
        assert_eq!(RunStatus::parse_strict("succeeded"), None);
    }

    #[test]
    fn unknown_status_rejected_everywhere() {
        assert_eq!(RunStatus::parse_lenient("exploded"), None);
        assert_eq!(RunStatus::parse_strict("exploded"), None);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&RunStatus::Failure).unwrap();
        assert_eq!(json, "\"failure\"");
    }

    #[test]
    fn commit_source_parses_canonical_only() {
        assert_eq!(CommitSource::parse("manual"), Some(CommitSource::Manual));
        assert_eq!(CommitSource::parse("llm"), Some(CommitSource::Llm));
        assert_eq!(CommitSource::parse("ci"), Some(CommitSource::Ci));
        assert_eq!(CommitSource::parse("robot"), None);
    }
}
