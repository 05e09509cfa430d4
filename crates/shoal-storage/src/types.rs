use std::time::{SystemTime, UNIX_EPOCH};

use shoal_types::{Key, Metadata, Value};

pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Committed form of a value held by a member's data container.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoredEntry {
    pub key: Key,
    pub value: Value,
    pub metadata: Metadata,
    pub created_at_ns: i64,
    pub modified_at_ns: i64,
    /// Derived from `metadata.lifespan_ms` at write time.
    pub expires_at_ns: Option<i64>,
}

impl StoredEntry {
    pub fn is_expired(&self, now_ns: i64) -> bool {
        self.expires_at_ns.map(|at| at <= now_ns).unwrap_or(false)
    }
}

pub(crate) fn expiry_for(metadata: &Metadata, now: i64) -> Option<i64> {
    metadata
        .lifespan_ms
        .map(|ms| now.saturating_add((ms as i64).saturating_mul(1_000_000)))
}
