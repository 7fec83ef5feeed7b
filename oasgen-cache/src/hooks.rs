//! Observer hooks for cache state transitions.
//!
//! The coordinator calls every registered [`CacheObserver`] after a state
//! transition has happened. Observers cannot influence cache control flow;
//! progress rendering and metrics live on this side of the seam.

use std::time::Duration;

use crate::error::LoadError;
use crate::key::CacheKey;
use crate::stats::CacheTier;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Memory tier capacity.
    Capacity,
    /// Disk byte budget.
    DiskBudget,
    /// TTL ran out during maintenance.
    Expired,
}

/// A cache state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Hit {
        key: CacheKey,
        source: String,
        tier: CacheTier,
    },
    Miss {
        key: CacheKey,
        source: String,
        /// A stale entry exists and will be revalidated or replaced.
        stale: bool,
    },
    LoadStarted {
        key: CacheKey,
        source: String,
        conditional: bool,
    },
    Loaded {
        key: CacheKey,
        source: String,
        size_bytes: u64,
        elapsed: Duration,
    },
    Revalidated {
        key: CacheKey,
        source: String,
        /// False when the server answered `304 Not Modified`.
        modified: bool,
    },
    LoadFailed {
        key: CacheKey,
        error: LoadError,
    },
    StaleServed {
        key: CacheKey,
        source: String,
        error: LoadError,
    },
    Evicted {
        key: CacheKey,
        tier: CacheTier,
        reason: EvictionReason,
    },
    Invalidated {
        key: CacheKey,
    },
    Cleared {
        memory_entries: usize,
        disk_files: u64,
    },
    DiskDegraded {
        operation: &'static str,
        reason: String,
    },
}

/// Receives cache events.
pub trait CacheObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl CacheObserver for TracingObserver {
    fn on_event(&self, event: &CacheEvent) {
        match event {
            CacheEvent::Hit { key, source, tier } => {
                tracing::debug!(key = %key.short(), source = %source, tier = %tier, "Spec cache hit");
            }
            CacheEvent::Miss { key, source, stale } => {
                tracing::debug!(key = %key.short(), source = %source, stale, "Spec cache miss");
            }
            CacheEvent::LoadStarted {
                key,
                source,
                conditional,
            } => {
                tracing::debug!(key = %key.short(), source = %source, conditional, "Loading spec");
            }
            CacheEvent::Loaded {
                key,
                source,
                size_bytes,
                elapsed,
            } => {
                tracing::info!(
                    key = %key.short(),
                    source = %source,
                    size_bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Loaded spec"
                );
            }
            CacheEvent::Revalidated {
                key,
                source,
                modified,
            } => {
                tracing::info!(key = %key.short(), source = %source, modified, "Revalidated spec");
            }
            CacheEvent::LoadFailed { key, error } => {
                tracing::warn!(
                    key = %key.short(),
                    source = %error.location(),
                    transient = error.is_transient(),
                    error = %error,
                    "Spec load failed"
                );
            }
            CacheEvent::StaleServed { key, source, error } => {
                tracing::warn!(
                    key = %key.short(),
                    source = %source,
                    error = %error,
                    "Serving stale spec after load failure"
                );
            }
            CacheEvent::Evicted { key, tier, reason } => {
                tracing::debug!(key = %key.short(), tier = %tier, reason = ?reason, "Evicted spec");
            }
            CacheEvent::Invalidated { key } => {
                tracing::debug!(key = %key.short(), "Invalidated spec");
            }
            CacheEvent::Cleared {
                memory_entries,
                disk_files,
            } => {
                tracing::info!(memory_entries, disk_files, "Cleared spec cache");
            }
            CacheEvent::DiskDegraded { operation, reason } => {
                tracing::warn!(operation, reason = %reason, "Disk cache degraded to miss");
            }
        }
    }
}
