//! Optional fire-and-forget secondary sink.
//!
//! Payloads enqueue onto a bounded channel and the call returns immediately;
//! a background task posts them with the transport retry schedule and drops
//! on exhaustion (logged at INFO). This path must never block or fail the
//! primary pipeline.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const QUEUE_DEPTH: usize = 1024;
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

#[derive(Debug, Clone)]
pub struct ExternalExporter {
    tx: mpsc::Sender<Value>,
}

impl ExternalExporter {
    /// Build from configuration; `None` when disabled or misconfigured.
    ///
    /// An exporter URL pointing back at the ingestion host would loop
    /// telemetry into itself — that misconfiguration force-disables the
    /// exporter with a WARN instead of failing startup.
    pub fn from_config(
        enabled: bool,
        url: Option<&str>,
        ingestion_url: &str,
    ) -> Option<ExternalExporter> {
        if !enabled {
            return None;
        }
        let url = url?;

        if host_of(url) == host_of(ingestion_url) {
            warn!(
                url,
                "exporter URL points at the ingestion host; exporter disabled"
            );
            return None;
        }

        Some(Self::spawn(url.to_string()))
    }

    /// Start the background poster and return the enqueue handle.
    pub fn spawn(url: String) -> ExternalExporter {
        let (tx, mut rx) = mpsc::channel::<Value>(QUEUE_DEPTH);

        tokio::spawn(async move {
            let client = match reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
            {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "exporter client build failed; exporter dead");
                    return;
                }
            };

            while let Some(payload) = rx.recv().await {
                post_with_retry(&client, &url, &payload).await;
            }
        });

        ExternalExporter { tx }
    }

    /// Hand off a payload; silent on a full queue (fire-and-forget).
    pub fn enqueue(&self, payload: Value) {
        if self.tx.try_send(payload).is_err() {
            debug!("exporter queue full; payload dropped");
        }
    }
}

async fn post_with_retry(client: &reqwest::Client, url: &str, payload: &Value) {
    let mut attempt = 0usize;
    loop {
        let res = client.post(url).json(payload).send().await;
        match res {
            Ok(resp) if resp.status().is_success() => return,
            Ok(resp) if resp.status().is_client_error() => {
                info!(status = %resp.status(), "exporter payload rejected; dropped");
                return;
            }
            Ok(resp) => {
                if attempt >= RETRY_DELAYS.len() {
                    info!(status = %resp.status(), "exporter retries exhausted; payload dropped");
                    return;
                }
                tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt >= RETRY_DELAYS.len() {
                    info!(error = %e, "exporter retries exhausted; payload dropped");
                    return;
                }
                tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                attempt += 1;
            }
        }
    }
}

/// `host[:port]` part of a URL, for the self-posting misconfiguration check.
fn host_of(url: &str) -> String {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    rest.split('/').next().unwrap_or("").to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("http://127.0.0.1:8765/api"), "127.0.0.1:8765");
        assert_eq!(host_of("https://sheets.example.com/post"), "sheets.example.com");
        assert_eq!(host_of("sheets.example.com"), "sheets.example.com");
    }

    #[tokio::test]
    async fn disabled_or_missing_url_yields_none() {
        assert!(ExternalExporter::from_config(false, Some("http://x/y"), "http://a/b").is_none());
        assert!(ExternalExporter::from_config(true, None, "http://a/b").is_none());
    }

    #[tokio::test]
    async fn self_posting_url_is_force_disabled() {
        let exporter = ExternalExporter::from_config(
            true,
            Some("http://127.0.0.1:8765/export"),
            "http://127.0.0.1:8765",
        );
        assert!(exporter.is_none());
    }

    #[tokio::test]
    async fn distinct_host_is_enabled() {
        let exporter = ExternalExporter::from_config(
            true,
            Some("https://sheets.example.com/post"),
            "http://127.0.0.1:8765",
        );
        assert!(exporter.is_some());
    }
}
