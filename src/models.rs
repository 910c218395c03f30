// Core data types shared by the store, search pipeline, and UI.
//
// Kept in one module because every other component (store, ranker, pipeline,
// ui) needs `Item` and `QueryId` and none of them owns the other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored piece of content (a news/RSS-style feed entry).
///
/// `url` is unique when non-empty and is the conflict key on ingest
/// (`INSERT OR IGNORE`). The core never deletes an `Item`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub source_type: String,
    pub source_name: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub author: String,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub read: bool,
    pub saved: bool,
}

/// A dense embedding vector, 1:1 with an `Item` by id.
pub type Embedding = Vec<f32>;

/// Opaque 128-bit query identity, hex-encoded.
///
/// The sole authority for staleness checks — comparing query *text* across
/// two submissions is explicitly forbidden, since two searches for the same
/// text must still be distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(u128);

impl QueryId {
    /// Mint a fresh, session-unique id.
    ///
    /// Not cryptographically random — uniqueness within a single run is all
    /// the staleness discipline requires — but collisions are astronomically
    /// unlikely (combines a monotonic counter with process-local entropy).
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        let entropy = {
            use std::collections::hash_map::RandomState;
            use std::hash::{BuildHasher, Hasher};
            RandomState::new().build_hasher().finish()
        };
        let value = ((entropy as u128) << 64) | counter as u128;
        Self(value)
    }

    pub fn as_hex(&self) -> String {
        format!("{:032x}", self.0)
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_ids_are_distinct() {
        let a = QueryId::new();
        let b = QueryId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn query_id_hex_roundtrips_through_display() {
        let id = QueryId::new();
        assert_eq!(id.as_hex().len(), 32);
        assert_eq!(format!("{}", id), id.as_hex());
    }
}
