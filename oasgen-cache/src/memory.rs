//! In-process memory tier: a bounded LRU map of fully materialized entries.
//!
//! Volatile by nature; the disk tier or the original source is always the
//! source of truth. The tier itself is not synchronized, the coordinator
//! owns it behind a mutex.

use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;

use crate::entry::CacheEntry;
use crate::key::CacheKey;

/// Bounded LRU memory tier.
pub struct MemoryTier {
    entries: LruCache<CacheKey, CacheEntry>,
}

impl MemoryTier {
    /// Create a tier holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Look up an entry and mark it most recently used.
    pub fn get(&mut self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Look up an entry without touching recency.
    pub fn peek(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.peek(key)
    }

    /// Insert or replace an entry, making it most recently used.
    ///
    /// When the tier is full and `key` is new, the least-recently-used entry
    /// is evicted first and returned. Replacing an existing key evicts
    /// nothing.
    pub fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let key = entry.key.clone();
        match self.entries.push(key.clone(), entry) {
            Some((evicted_key, evicted)) if evicted_key != key => Some(evicted),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.pop(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove and return every entry that is stale at `now`.
    pub fn drain_expired(&mut self, now: DateTime<Utc>) -> Vec<CacheEntry> {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_stale_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .iter()
            .filter_map(|key| self.entries.pop(key))
            .collect()
    }

    /// Snapshot of all entries, most recently used first.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        self.entries.iter().map(|(_, entry)| entry.clone()).collect()
    }

    /// Total serialized size of resident documents.
    pub fn resident_bytes(&self) -> u64 {
        self.entries.iter().map(|(_, entry)| entry.size_bytes).sum()
    }
}

impl std::fmt::Debug for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTier")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
