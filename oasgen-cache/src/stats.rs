//! Cache statistics and point-in-time reports.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::disk::DiskUsage;
use crate::key::CacheKey;

/// Which tier served a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    Memory,
    Disk,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Memory => write!(f, "memory"),
            CacheTier::Disk => write!(f, "disk"),
        }
    }
}

/// Live counters, updated lock-free by the coordinator.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub memory_hits: AtomicU64,
    pub disk_hits: AtomicU64,
    pub misses: AtomicU64,
    pub loads: AtomicU64,
    pub load_failures: AtomicU64,
    pub revalidations: AtomicU64,
    pub not_modified: AtomicU64,
    pub deduplicated: AtomicU64,
    pub stale_served: AtomicU64,
    pub evictions: AtomicU64,
    pub disk_errors: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Memory tier occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub size: usize,
    pub capacity: usize,
    /// Serialized size of resident documents.
    pub bytes: u64,
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Hits served from the memory tier.
    pub memory_hits: u64,
    /// Hits served from the disk tier (and promoted to memory).
    pub disk_hits: u64,
    /// Lookups that had to go to the source.
    pub misses: u64,
    /// Loader invocations (one per de-duplicated load).
    pub loads: u64,
    /// Loader invocations that failed.
    pub load_failures: u64,
    /// Conditional requests sent with a known ETag.
    pub revalidations: u64,
    /// Conditional requests answered `304 Not Modified`.
    pub not_modified: u64,
    /// Callers that attached to an already in-flight load.
    pub deduplicated: u64,
    /// Stale entries served because a reload failed.
    pub stale_served: u64,
    /// Entries evicted from memory (capacity) or disk (budget).
    pub evictions: u64,
    /// Disk tier failures degraded to misses.
    pub disk_errors: u64,
    pub memory: MemoryUsage,
    pub disk: DiskUsage,
}

impl CacheStats {
    pub(crate) fn from_counters(
        counters: &StatsCounters,
        memory: MemoryUsage,
        disk: DiskUsage,
    ) -> Self {
        Self {
            memory_hits: StatsCounters::read(&counters.memory_hits),
            disk_hits: StatsCounters::read(&counters.disk_hits),
            misses: StatsCounters::read(&counters.misses),
            loads: StatsCounters::read(&counters.loads),
            load_failures: StatsCounters::read(&counters.load_failures),
            revalidations: StatsCounters::read(&counters.revalidations),
            not_modified: StatsCounters::read(&counters.not_modified),
            deduplicated: StatsCounters::read(&counters.deduplicated),
            stale_served: StatsCounters::read(&counters.stale_served),
            evictions: StatsCounters::read(&counters.evictions),
            disk_errors: StatsCounters::read(&counters.disk_errors),
            memory,
            disk,
        }
    }

    /// Total hits across tiers.
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.disk_hits
    }

    /// Hit rate as a percentage (0.0 to 100.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 * 100.0 / total as f64
        }
    }
}

/// One memory-resident entry in a report.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryReport {
    pub key: CacheKey,
    pub source: String,
    pub age: Duration,
    pub ttl: Duration,
    pub stale: bool,
    pub etag: Option<String>,
    pub size_bytes: u64,
}

/// Point-in-time snapshot of the whole cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheReport {
    pub generated_at: DateTime<Utc>,
    pub stats: CacheStats,
    /// Memory-resident entries, most recently used first.
    pub entries: Vec<EntryReport>,
    /// Keys with a load currently in flight.
    pub in_flight: usize,
}

impl fmt::Display for CacheReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.stats;
        writeln!(
            f,
            "spec cache @ {}: {} hits ({} memory, {} disk), {} misses, {:.1}% hit rate",
            self.generated_at.to_rfc3339(),
            stats.hits(),
            stats.memory_hits,
            stats.disk_hits,
            stats.misses,
            stats.hit_rate()
        )?;
        writeln!(
            f,
            "memory {}/{} entries, disk {} files / {} bytes, {} in flight",
            stats.memory.size,
            stats.memory.capacity,
            stats.disk.files,
            stats.disk.bytes,
            self.in_flight
        )?;
        for entry in &self.entries {
            writeln!(
                f,
                "  {} {} age={}s{}",
                entry.key.short(),
                entry.source,
                entry.age.as_secs(),
                if entry.stale { " (stale)" } else { "" }
            )?;
        }
        Ok(())
    }
}

/// Outcome of a maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Expired entries dropped from memory.
    pub memory_expired: usize,
    /// Expired or corrupt files deleted from disk.
    pub disk_expired: usize,
    /// Files evicted to respect the disk budget.
    pub disk_evicted: usize,
}
