//! HTTP transport to the ingestion service with transient-only retry.
//!
//! Retry budget: the initial attempt plus one retry per entry of
//! [`RETRY_DELAYS`]. Only connect errors, timeouts and 5xx responses
//! retry — a 4xx is a contract violation that retrying cannot fix, so it
//! surfaces immediately as [`TransportError::Rejected`]. Retrying POSTs is
//! safe because every payload carries a client-minted `event_id` the server
//! dedupes on.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use agt_buffer::{BufferRecord, RecordType};

/// Delays between retry attempts.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Per-attempt request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum TransportError {
    /// Terminal 4xx from the service; never retried.
    Rejected { status: u16, body: String },
    /// Network failure, timeout or 5xx after the retry budget.
    Transient(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Rejected { status, body } => {
                write!(f, "request rejected with {status}: {body}")
            }
            TransportError::Transient(msg) => write!(f, "transient transport failure: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, TransportError::Rejected { .. })
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    delays: [Duration; 3],
}

/// Ack body of a create: `status` is `created` or `duplicate`.
#[derive(Debug, serde::Deserialize)]
pub struct CreateAck {
    pub status: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            delays: RETRY_DELAYS,
        })
    }

    /// Override the retry schedule (tests compress it to milliseconds).
    pub fn with_retry_delays(mut self, delays: [Duration; 3]) -> Self {
        self.delays = delays;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn post_run<T: Serialize>(&self, body: &T) -> Result<CreateAck, TransportError> {
        let text = self
            .send_with_retry(reqwest::Method::POST, "/api/v1/runs", body)
            .await?;
        serde_json::from_str(&text)
            .map_err(|e| TransportError::Transient(format!("malformed create ack: {e}")))
    }

    pub async fn patch_run<T: Serialize>(
        &self,
        event_id: &str,
        body: &T,
    ) -> Result<(), TransportError> {
        self.send_with_retry(
            reqwest::Method::PATCH,
            &format!("/api/v1/runs/{event_id}"),
            body,
        )
        .await
        .map(|_| ())
    }

    pub async fn associate_commit<T: Serialize>(
        &self,
        event_id: &str,
        body: &T,
    ) -> Result<(), TransportError> {
        self.send_with_retry(
            reqwest::Method::POST,
            &format!("/api/v1/runs/{event_id}/associate-commit"),
            body,
        )
        .await
        .map(|_| ())
    }

    /// Replay one buffered record against the ingestion service.
    ///
    /// `Event` records have no server-side representation and must not reach
    /// this function.
    pub async fn replay(&self, record: &BufferRecord) -> Result<(), TransportError> {
        match record.record_type {
            RecordType::RunCreate => self.post_run(&record.payload).await.map(|_| ()),
            RecordType::RunUpdate => {
                let event_id = replay_target(record)?;
                self.patch_run(&event_id, &record.payload).await
            }
            RecordType::CommitAssociate => {
                let event_id = replay_target(record)?;
                self.associate_commit(&event_id, &record.payload).await
            }
            RecordType::Event => Err(TransportError::Rejected {
                status: 0,
                body: "event records are not replayable".to_string(),
            }),
        }
    }

    async fn send_with_retry<T: Serialize>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &T,
    ) -> Result<String, TransportError> {
        let url = format!("{}{path}", self.base_url);
        let payload =
            serde_json::to_value(body).map_err(|e| TransportError::Transient(e.to_string()))?;

        let mut attempt = 0usize;
        loop {
            match self.send_once(method.clone(), &url, &payload).await {
                Ok(text) => return Ok(text),
                Err(err @ TransportError::Rejected { .. }) => return Err(err),
                Err(TransportError::Transient(msg)) => {
                    if attempt >= self.delays.len() {
                        return Err(TransportError::Transient(msg));
                    }
                    let delay = self.delays[attempt];
                    attempt += 1;
                    tracing::debug!(
                        url = %url,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %msg,
                        "transport retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: reqwest::Method,
        url: &str,
        payload: &Value,
    ) -> Result<String, TransportError> {
        let resp = self
            .client
            .request(method, url)
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if status.is_success() {
            Ok(text)
        } else if status.is_client_error() {
            Err(TransportError::Rejected {
                status: status.as_u16(),
                body: text,
            })
        } else {
            Err(TransportError::Transient(format!(
                "server answered {status}: {text}"
            )))
        }
    }
}

fn replay_target(record: &BufferRecord) -> Result<String, TransportError> {
    record
        .event_id
        .clone()
        .ok_or_else(|| TransportError::Rejected {
            status: 0,
            body: "buffered entry is missing its event_id".to_string(),
        })
}
