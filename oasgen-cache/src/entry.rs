//! Cache entries and their freshness window.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::key::CacheKey;

/// A parsed specification document.
///
/// Shared behind an `Arc` so promotion between tiers and fan-out to
/// concurrent callers never deep-copies the tree.
pub type SpecDocument = Arc<Value>;

/// A fully materialized cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub data: SpecDocument,
    /// Original URL or file path.
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    /// HTTP validator; only set for URL-origin entries.
    pub etag: Option<String>,
    /// Serialized JSON size of `data`.
    pub size_bytes: u64,
    /// Whether the disk copy is gzip-compressed.
    pub compressed: bool,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        key: CacheKey,
        source: impl Into<String>,
        data: SpecDocument,
        ttl: Duration,
        etag: Option<String>,
    ) -> Self {
        let size_bytes = document_size(&data);
        Self {
            key,
            data,
            source: source.into(),
            created_at: Utc::now(),
            ttl,
            etag,
            size_bytes,
            compressed: false,
        }
    }

    /// When this entry stops being fresh, or `None` if the TTL is too large
    /// to represent (never expires).
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = TimeDelta::from_std(self.ttl).ok()?;
        self.created_at.checked_add_signed(ttl)
    }

    /// An entry is stale once `now > created_at + ttl`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    /// Time since the entry was created or last revalidated.
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// The same entry with its freshness window restarted.
    ///
    /// Used after a `304 Not Modified`: data and ETag are kept.
    pub fn refreshed(&self) -> Self {
        Self {
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Serialized JSON size of a document.
pub fn document_size(data: &Value) -> u64 {
    serde_json::to_vec(data)
        .map(|bytes| bytes.len() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_key;
    use serde_json::json;

    fn entry(ttl: Duration) -> CacheEntry {
        CacheEntry::new(
            generate_key("spec.json"),
            "spec.json",
            Arc::new(json!({"openapi": "3.0.0"})),
            ttl,
            None,
        )
    }

    #[test]
    fn test_new_entry_is_fresh() {
        let entry = entry(Duration::from_secs(60));
        assert!(!entry.is_stale());
        assert_eq!(entry.size_bytes, br#"{"openapi":"3.0.0"}"#.len() as u64);
        assert!(!entry.compressed);
    }

    #[test]
    fn test_stale_after_ttl() {
        let mut entry = entry(Duration::from_secs(10));
        entry.created_at = Utc::now() - TimeDelta::seconds(11);
        assert!(entry.is_stale());
        assert!(entry.age() >= Duration::from_secs(10));
    }

    #[test]
    fn test_stale_boundary_is_exclusive() {
        let entry = entry(Duration::from_secs(10));
        let expires_at = entry.expires_at().unwrap();
        assert!(!entry.is_stale_at(expires_at));
        assert!(entry.is_stale_at(expires_at + TimeDelta::milliseconds(1)));
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let entry = entry(Duration::MAX);
        assert_eq!(entry.expires_at(), None);
        assert!(!entry.is_stale_at(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_refreshed_keeps_data_and_etag() {
        let mut stale = entry(Duration::from_secs(1));
        stale.etag = Some("\"v1\"".to_string());
        stale.created_at = Utc::now() - TimeDelta::seconds(30);

        let fresh = stale.refreshed();
        assert!(fresh.created_at > stale.created_at);
        assert_eq!(fresh.data, stale.data);
        assert_eq!(fresh.etag, stale.etag);
        assert!(!fresh.is_stale());
    }
}
