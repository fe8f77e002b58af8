//! In-memory metadata cache.
//!
//! Distinct agent/job enumeration is the one query that scans rather than
//! seeks, so its result is held for a short TTL and thrown away on any
//! write. Refill is single-flight: one caller recomputes while concurrent
//! callers wait and then read the fresh snapshot.

use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone)]
pub struct MetadataSnapshot {
    pub agents: Vec<String>,
    pub job_types: Vec<String>,
}

struct Cached {
    snapshot: MetadataSnapshot,
    expires_at: Instant,
}

pub struct MetadataCache {
    ttl: Duration,
    inner: RwLock<Option<Cached>>,
    refill: Mutex<()>,
}

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(None),
            refill: Mutex::new(()),
        }
    }

    /// Return the cached snapshot when fresh, otherwise recompute via
    /// `refill` under the single-flight guard. The boolean is the
    /// `cache_hit` flag surfaced by the metadata endpoint.
    pub async fn get_or_refill<F, Fut>(&self, refill: F) -> Result<(MetadataSnapshot, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<MetadataSnapshot>>,
    {
        if let Some(snapshot) = self.fresh().await {
            return Ok((snapshot, true));
        }

        let _guard = self.refill.lock().await;

        // A concurrent caller may have refilled while we waited.
        if let Some(snapshot) = self.fresh().await {
            return Ok((snapshot, true));
        }

        let snapshot = refill().await?;
        let mut slot = self.inner.write().await;
        *slot = Some(Cached {
            snapshot: snapshot.clone(),
            expires_at: Instant::now() + self.ttl,
        });
        Ok((snapshot, false))
    }

    /// Drop the snapshot; the next read recomputes.
    pub async fn invalidate(&self) {
        let mut slot = self.inner.write().await;
        *slot = None;
    }

    async fn fresh(&self) -> Option<MetadataSnapshot> {
        let slot = self.inner.read().await;
        match slot.as_ref() {
            Some(c) if c.expires_at > Instant::now() => Some(c.snapshot.clone()),
            _ => None,
        }
    }
}
