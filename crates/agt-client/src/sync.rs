//! Background drain of the buffer spool into the ingestion service.
//!
//! Runs on a periodic schedule. Entries replay in write order per file,
//! oldest file first. Success removes the entry at compaction; a terminal
//! 4xx quarantines it to the `.rejected` sibling; a transient failure stops
//! the cycle and leaves everything in place for the next tick. Any crash is
//! recoverable because replay is idempotent on `event_id`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use agt_buffer::RecordType;

use crate::transport::{HttpTransport, TransportError};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of one drain cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub replayed: usize,
    pub quarantined: usize,
    /// Replayable entries still pending (service unreachable mid-cycle).
    pub remaining: usize,
    /// Forensic `event` records, never replayed.
    pub skipped_events: usize,
}

pub struct SyncWorker {
    transport: HttpTransport,
    spool_dir: PathBuf,
    interval: Duration,
}

impl SyncWorker {
    pub fn new(transport: HttpTransport, spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            spool_dir: spool_dir.into(),
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Periodic loop; spawn this on the runtime and forget it.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.drain_once().await {
                Ok(report) if report.replayed > 0 || report.quarantined > 0 => {
                    info!(
                        replayed = report.replayed,
                        quarantined = report.quarantined,
                        remaining = report.remaining,
                        "buffer drain cycle complete"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = ?e, "buffer drain cycle failed"),
            }
        }
    }

    /// One full pass over the spool directory.
    pub async fn drain_once(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        for file in agt_buffer::list_spool_files(&self.spool_dir)? {
            let parsed = agt_buffer::read_spool_file(&file)
                .with_context(|| format!("parse spool file {:?}", file))?;

            let mut drop_lines: HashSet<usize> = HashSet::new();

            // Lines that never parsed go straight to quarantine.
            for (line_no, raw) in &parsed.rejects {
                agt_buffer::quarantine_line(&file, raw)?;
                drop_lines.insert(*line_no);
                report.quarantined += 1;
            }

            let mut stop = false;
            for entry in &parsed.entries {
                if entry.record.record_type == RecordType::Event {
                    report.skipped_events += 1;
                    continue;
                }
                if stop {
                    report.remaining += 1;
                    continue;
                }

                match self.transport.replay(&entry.record).await {
                    Ok(()) => {
                        drop_lines.insert(entry.line_no);
                        report.replayed += 1;
                        debug!(
                            event_id = entry.record.event_id.as_deref().unwrap_or("-"),
                            "buffered entry replayed"
                        );
                    }
                    Err(e) if e.is_rejected() => {
                        // The service will never accept this entry; keep it
                        // for forensics but stop retrying it.
                        let raw = serde_json::to_string(&entry.record)?;
                        agt_buffer::quarantine_line(&file, &raw)?;
                        drop_lines.insert(entry.line_no);
                        report.quarantined += 1;
                        warn!(error = %e, "buffered entry quarantined");
                    }
                    Err(e) => {
                        // Service unreachable; leave the rest for the next
                        // tick so write order is preserved.
                        warn!(error = %e, "drain interrupted; will retry later");
                        report.remaining += 1;
                        stop = true;
                    }
                }
            }

            if !drop_lines.is_empty() {
                agt_buffer::compact(&file, &drop_lines)?;
            }
            if stop {
                break;
            }
        }

        Ok(report)
    }
}
