// SPDX-License-Identifier: MIT
//! Bounded holding bucket for unrecognized (candidate custom) domains.
//!
//! Mail for a domain nobody registered still gets kept for a short while so
//! a legitimate owner can poll it after proving control. Per domain the
//! bucket holds a bounded, arrival-ordered batch; overflow is silently
//! discarded (the sender already got its SMTP acceptance) and a periodic
//! sweep drops entries older than the retention window.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::inbox::model::Message;

pub const DEFAULT_CAP: usize = 25;
pub const DEFAULT_RETENTION_MILLIS: i64 = 60 * 60 * 1000;

struct Entry {
    inserted_at: i64,
    message: Message,
}

pub struct HoldingBucket {
    cap: usize,
    retention_millis: i64,
    inner: Mutex<HashMap<String, Vec<Entry>>>,
}

pub type SharedHoldingBucket = Arc<HoldingBucket>;

impl HoldingBucket {
    pub fn new(cap: usize, retention_millis: i64) -> Self {
        Self {
            cap,
            retention_millis,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Append a message under its domain. Returns `false` when the domain
    /// is at capacity and the message was discarded.
    pub async fn push(&self, domain: &str, message: Message) -> bool {
        let domain = domain.to_ascii_lowercase();
        let mut inner = self.inner.lock().await;
        let entries = inner.entry(domain.clone()).or_default();
        if entries.len() >= self.cap {
            debug!(%domain, cap = self.cap, "holding bucket full, discarding");
            return false;
        }
        entries.push(Entry {
            inserted_at: Utc::now().timestamp_millis(),
            message,
        });
        true
    }

    /// Return and clear the batch for a domain, in arrival order.
    pub async fn drain(&self, domain: &str) -> Vec<Message> {
        let domain = domain.to_ascii_lowercase();
        let mut inner = self.inner.lock().await;
        inner
            .remove(&domain)
            .map(|entries| entries.into_iter().map(|e| e.message).collect())
            .unwrap_or_default()
    }

    /// Number of domains currently holding mail (for stats).
    pub async fn domain_count(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Drop entries older than the retention window. Called periodically.
    pub async fn sweep_aged(&self, now_millis: i64) {
        let cutoff = now_millis - self.retention_millis;
        let mut inner = self.inner.lock().await;
        inner.retain(|_, entries| {
            entries.retain(|e| e.inserted_at > cutoff);
            !entries.is_empty()
        });
    }
}

impl Default for HoldingBucket {
    fn default() -> Self {
        Self::new(DEFAULT_CAP, DEFAULT_RETENTION_MILLIS)
    }
}
