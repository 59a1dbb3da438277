//! Worker lease: the typed presence record of a live worker.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Presence record written by `register`/`claim` under the worker's lease key.
///
/// The store also carries a TTL on the key, so a worker is observed as
/// expired either when the key is gone or when `expires_at` has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLease {
    pub worker: String,
    pub capacity: u32,
    pub renewed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WorkerLease {
    pub fn new(worker: impl Into<String>, capacity: u32, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            worker: worker.into(),
            capacity,
            renewed_at: now,
            expires_at: deadline(now, ttl),
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// `now + ttl`, saturating at the maximum representable instant.
pub fn deadline(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
