//! Telemetry client library for agent runs.
//!
//! The facade applications embed: start/end/event lifecycle calls, a scoped
//! [`TelemetryClient::track_run`] wrapper, and commit association. Every
//! state-changing call dual-writes:
//!
//! 1. attempt the primary POST/PATCH through [`transport::HttpTransport`],
//! 2. unconditionally append the same payload to the buffer spool — even
//!    after a primary success, so a crash between ack and caller resume
//!    still replays (the server dedupes on `event_id`),
//! 3. hand a copy to the optional fire-and-forget exporter.
//!
//! Telemetry failures are logged, never raised: the only errors these APIs
//! surface to callers are their own input mistakes (an invalid `run_id`)
//! and, from `track_run`, the application's original error.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use agt_buffer::{BufferRecord, BufferWriter};
use agt_config::TelemetryConfig;
use agt_schemas::{
    validate_run_id, AssociateCommitRequest, NewRunRequest, RunStatus, UpdateRunRequest,
};

pub mod exporter;
pub mod sync;
pub mod transport;

pub use exporter::ExternalExporter;
pub use sync::{DrainReport, SyncWorker};
pub use transport::{HttpTransport, TransportError};

// ---------------------------------------------------------------------------
// Handles and options
// ---------------------------------------------------------------------------

/// Identity of a started run, returned by [`TelemetryClient::start_run`].
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: String,
    pub event_id: Uuid,
}

/// Optional classification fields for a new run.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Caller-chosen run id; validated. Auto-generated when `None`.
    pub run_id: Option<String>,
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
    pub input_summary: Option<String>,
    pub source_ref: Option<String>,
    pub target_ref: Option<String>,
    pub git_repo: Option<String>,
    pub git_branch: Option<String>,
    pub git_run_tag: Option<String>,
    pub context_json: Option<Value>,
}

/// Outcome fields for [`TelemetryClient::end_run`].
#[derive(Debug, Clone, Default)]
pub struct EndOptions {
    /// Computed from the start instant when absent.
    pub duration_ms: Option<i64>,
    pub items_discovered: Option<i64>,
    pub items_succeeded: Option<i64>,
    pub items_failed: Option<i64>,
    pub items_skipped: Option<i64>,
    pub output_summary: Option<String>,
    pub error_summary: Option<String>,
    pub error_details: Option<String>,
    pub metrics_json: Option<Value>,
}

struct ActiveRun {
    event_id: Uuid,
    started: Instant,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TelemetryClient {
    transport: HttpTransport,
    buffer: BufferWriter,
    exporter: Option<ExternalExporter>,
    active: Mutex<HashMap<String, ActiveRun>>,
}

impl TelemetryClient {
    /// Build from configuration. Fails only on unusable local state (spool
    /// directory not creatable, malformed URL) — never on the service being
    /// down; that is what the buffer is for.
    pub fn new(cfg: &TelemetryConfig) -> Result<Self> {
        let transport = HttpTransport::new(&cfg.api_url)?;
        let buffer = BufferWriter::new(&cfg.ndjson_dir)?;
        let exporter = ExternalExporter::from_config(
            cfg.sheets_api_enabled,
            cfg.sheets_api_url.as_deref(),
            &cfg.api_url,
        );

        Ok(Self::from_parts(transport, buffer, exporter))
    }

    /// Assemble from explicit parts (tests and embedders that tune the
    /// transport directly).
    pub fn from_parts(
        transport: HttpTransport,
        buffer: BufferWriter,
        exporter: Option<ExternalExporter>,
    ) -> Self {
        Self {
            transport,
            buffer,
            exporter,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// A sync worker draining this client's spool to this client's endpoint.
    pub fn sync_worker(&self) -> SyncWorker {
        SyncWorker::new(self.transport.clone(), self.buffer.dir())
    }

    /// One-shot spool drain, for shutdown hooks that want pending entries
    /// delivered before the process exits.
    pub async fn flush(&self) -> Result<DrainReport> {
        self.sync_worker().drain_once().await
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Begin a run. Errs only on an invalid caller-supplied `run_id`.
    pub async fn start_run(
        &self,
        agent_name: &str,
        job_type: &str,
        opts: StartOptions,
    ) -> Result<RunHandle> {
        let run_id = match opts.run_id.as_deref() {
            Some(raw) => validate_run_id(raw).map_err(|msg| anyhow!("invalid run_id: {msg}"))?,
            None => generate_run_id(agent_name),
        };
        // The idempotency key is always client-minted, never caller-supplied.
        let event_id = Uuid::new_v4();
        let start_time: DateTime<Utc> = Utc::now();

        let payload = NewRunRequest {
            event_id: Some(event_id.to_string()),
            run_id: Some(run_id.clone()),
            agent_name: Some(agent_name.to_string()),
            job_type: Some(job_type.to_string()),
            start_time: Some(start_time.to_rfc3339()),
            trigger_type: opts.trigger_type,
            product: opts.product,
            product_family: opts.product_family,
            platform: opts.platform,
            subdomain: opts.subdomain,
            website: opts.website,
            website_section: opts.website_section,
            item_name: opts.item_name,
            environment: opts.environment,
            host: opts.host,
            parent_run_id: opts.parent_run_id,
            insight_id: opts.insight_id,
            input_summary: opts.input_summary,
            source_ref: opts.source_ref,
            target_ref: opts.target_ref,
            git_repo: opts.git_repo,
            git_branch: opts.git_branch,
            git_run_tag: opts.git_run_tag,
            context_json: opts.context_json,
            ..Default::default()
        };

        self.active.lock().expect("active map poisoned").insert(
            run_id.clone(),
            ActiveRun {
                event_id,
                started: Instant::now(),
            },
        );

        let body = serde_json::to_value(&payload)?;
        self.dispatch_create(&payload, body).await;

        Ok(RunHandle { run_id, event_id })
    }

    /// Record a checkpoint. Events land in the buffer spool only; the store
    /// never persists them.
    pub async fn log_event(&self, run_id: &str, event_type: &str, payload: Value) {
        let record = BufferRecord::event(json!({
            "run_id": run_id,
            "event_type": event_type,
            "timestamp": Utc::now().to_rfc3339(),
            "payload": payload,
        }));
        if let Err(e) = self.buffer.append(&record) {
            warn!(run_id, error = ?e, "event buffer append failed");
        }
        if let Some(exporter) = &self.exporter {
            exporter.enqueue(record.payload);
        }
    }

    /// Finish a run. Status accepts writer aliases (`failed`, `completed`,
    /// `succeeded`) and normalizes before transmission.
    pub async fn end_run(&self, run_id: &str, status: &str, opts: EndOptions) {
        let entry = self
            .active
            .lock()
            .expect("active map poisoned")
            .remove(run_id);
        let entry = match entry {
            Some(e) => e,
            None => {
                warn!(run_id, "end_run for unknown run; dropped");
                return;
            }
        };

        let status = RunStatus::parse_lenient(status).unwrap_or_else(|| {
            warn!(run_id, status, "unknown end status; recording failure");
            RunStatus::Failure
        });

        let duration_ms = opts
            .duration_ms
            .unwrap_or_else(|| entry.started.elapsed().as_millis() as i64);

        let payload = UpdateRunRequest {
            status: Some(status.as_str().to_string()),
            end_time: Some(Utc::now().to_rfc3339()),
            duration_ms: Some(duration_ms),
            items_discovered: opts.items_discovered,
            items_succeeded: opts.items_succeeded,
            items_failed: opts.items_failed,
            items_skipped: opts.items_skipped,
            output_summary: opts.output_summary,
            error_summary: opts.error_summary,
            error_details: opts.error_details,
            metrics_json: opts.metrics_json,
            ..Default::default()
        };

        self.dispatch_update(&entry.event_id.to_string(), &payload)
            .await;
    }

    /// Scoped lifecycle: run `f`, end with `success` on `Ok`, end with
    /// `failure` (carrying the error summary) on `Err`, and hand the
    /// original result back unchanged either way.
    pub async fn track_run<T, F, Fut>(
        &self,
        agent_name: &str,
        job_type: &str,
        opts: StartOptions,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(RunHandle) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let handle = self.start_run(agent_name, job_type, opts).await?;
        let run_id = handle.run_id.clone();

        match f(handle).await {
            Ok(value) => {
                self.end_run(&run_id, "success", EndOptions::default()).await;
                Ok(value)
            }
            Err(err) => {
                self.end_run(
                    &run_id,
                    "failure",
                    EndOptions {
                        error_summary: Some(err.to_string()),
                        error_details: Some(format!("{err:#}")),
                        ..Default::default()
                    },
                )
                .await;
                Err(err)
            }
        }
    }

    /// Stamp the run with git commit metadata, authoritative on every call.
    pub async fn associate_commit(
        &self,
        run_id: &str,
        commit_hash: &str,
        commit_source: &str,
        commit_author: Option<String>,
        commit_timestamp: Option<DateTime<Utc>>,
    ) {
        let event_id = {
            let active = self.active.lock().expect("active map poisoned");
            active.get(run_id).map(|e| e.event_id)
        };
        let event_id = match event_id {
            Some(id) => id,
            None => {
                warn!(run_id, "associate_commit for unknown run; dropped");
                return;
            }
        };

        let payload = AssociateCommitRequest {
            commit_hash: Some(commit_hash.to_string()),
            commit_source: Some(commit_source.to_string()),
            commit_author,
            commit_timestamp: commit_timestamp.map(|t| t.to_rfc3339()),
        };

        let event_id = event_id.to_string();
        let body = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(run_id, error = %e, "associate payload serialization failed");
                return;
            }
        };

        if let Err(e) = self.transport.associate_commit(&event_id, &payload).await {
            debug!(run_id, error = %e, "primary associate failed; buffer covers it");
        }
        if let Err(e) = self
            .buffer
            .append(&BufferRecord::commit_associate(&event_id, body.clone()))
        {
            warn!(run_id, error = ?e, "associate buffer append failed");
        }
        if let Some(exporter) = &self.exporter {
            exporter.enqueue(body);
        }
    }

    // -----------------------------------------------------------------------
    // Dual-write plumbing
    // -----------------------------------------------------------------------

    async fn dispatch_create(&self, payload: &NewRunRequest, body: Value) {
        // 1. Primary. Failure is invisible to the caller; the buffer entry
        //    below guarantees eventual delivery.
        if let Err(e) = self.transport.post_run(payload).await {
            debug!(error = %e, "primary create failed; buffer covers it");
        }

        // 2. Backup copy, written even when the primary succeeded.
        if let Err(e) = self.buffer.append(&BufferRecord::run_create(body.clone())) {
            warn!(error = ?e, "create buffer append failed");
        }

        // 3. Secondary sink, fire-and-forget.
        if let Some(exporter) = &self.exporter {
            exporter.enqueue(body);
        }
    }

    async fn dispatch_update(&self, event_id: &str, payload: &UpdateRunRequest) {
        let body = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(event_id, error = %e, "update payload serialization failed");
                return;
            }
        };

        if let Err(e) = self.transport.patch_run(event_id, payload).await {
            debug!(event_id, error = %e, "primary update failed; buffer covers it");
        }
        if let Err(e) = self
            .buffer
            .append(&BufferRecord::run_update(event_id, body.clone()))
        {
            warn!(event_id, error = ?e, "update buffer append failed");
        }
        if let Some(exporter) = &self.exporter {
            exporter.enqueue(body);
        }
    }
}

/// `{UTC %Y%m%dT%H%M%SZ}-{agent}-{8 hex of a fresh uuid}`.
fn generate_run_id(agent_name: &str) -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{stamp}-{agent_name}-{}", &suffix[..8])
}
