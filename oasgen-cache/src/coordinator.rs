//! Cache coordinator: routes lookups across the memory and disk tiers.
//!
//! Per-key state moves `MISS -> LOADING -> FRESH -> STALE -> (MISS | FRESH)`.
//! Lookups try the memory tier, then the disk tier, then the source loader.
//! Concurrent misses on the same key share a single load; the load runs on
//! a spawned task so it completes and populates the cache even if every
//! caller stops waiting.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::config::CacheConfig;
use crate::disk::{DiskTier, DiskUsage};
use crate::entry::{CacheEntry, SpecDocument};
use crate::error::{CacheError, CacheResult, DiskError};
use crate::hooks::{CacheEvent, CacheObserver, EvictionReason};
use crate::key::{generate_key, CacheKey};
use crate::memory::MemoryTier;
use crate::source::{HttpTransport, ReqwestTransport, SpecLoader, SpecSource};
use crate::stats::{
    CacheReport, CacheStats, CacheTier, EntryReport, MaintenanceReport, MemoryUsage,
    StatsCounters,
};

type SharedLoad = Shared<BoxFuture<'static, CacheResult<SpecDocument>>>;

/// Options for explicit population via [`SpecCache::set`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Freshness window; the configured default when `None`.
    pub ttl: Option<Duration>,
    /// Validator to send on the next revalidation.
    pub etag: Option<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// A registered load. `invalidated` is raised by `invalidate_key` and
/// `clear` so the load does not write its result back.
struct InFlight {
    load: SharedLoad,
    invalidated: Arc<AtomicBool>,
}

enum MemoryLookup {
    Fresh(SpecDocument),
    Stale(CacheEntry),
    Absent,
}

struct CacheInner {
    config: CacheConfig,
    memory: Mutex<MemoryTier>,
    disk: DiskTier,
    loader: SpecLoader,
    counters: StatsCounters,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    observers: RwLock<Vec<Arc<dyn CacheObserver>>>,
}

/// Two-tier cache of parsed specification documents.
///
/// Cheap to clone; clones share the same tiers, counters and in-flight
/// loads. Lifecycle is `new -> use -> shutdown`.
///
/// # Example
///
/// ```ignore
/// let cache = SpecCache::new(CacheConfig::from_env())?
///     .with_observer(Arc::new(TracingObserver));
///
/// let spec = cache.get("https://api.example.com/openapi.json").await?;
/// println!("{}", spec["openapi"]);
///
/// cache.shutdown().await;
/// ```
#[derive(Clone)]
pub struct SpecCache {
    inner: Arc<CacheInner>,
}

impl SpecCache {
    /// Create a cache fetching URLs through reqwest.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        let transport =
            ReqwestTransport::new(config.http_timeout).map_err(|e| CacheError::Internal {
                reason: format!("failed to build HTTP transport: {}", e),
            })?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a cache over a custom HTTP transport.
    pub fn with_transport(
        config: CacheConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> CacheResult<Self> {
        config.validate()?;

        let disk = if config.disk_enabled {
            DiskTier::open(&config.cache_dir, config.compression_threshold)
        } else {
            DiskTier::disabled()
        };
        let loader = SpecLoader::new(transport, config.http_timeout);

        tracing::debug!(
            cache_dir = %config.cache_dir.display(),
            disk_enabled = disk.is_enabled(),
            max_memory_items = config.max_memory_items,
            "Spec cache initialized"
        );

        Ok(Self {
            inner: Arc::new(CacheInner {
                memory: Mutex::new(MemoryTier::new(config.max_memory_items)),
                disk,
                loader,
                counters: StatsCounters::default(),
                in_flight: Mutex::new(HashMap::new()),
                observers: RwLock::new(Vec::new()),
                config,
            }),
        })
    }

    /// Register an observer for cache events.
    pub fn with_observer(self, observer: Arc<dyn CacheObserver>) -> Self {
        self.inner
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    /// Resolve a source to its parsed document.
    ///
    /// Fresh memory entries are returned directly; fresh disk entries are
    /// promoted into memory. Anything else goes to the source loader, with a
    /// conditional request when a stale URL entry carries an ETag. Loader
    /// errors propagate and leave both tiers untouched.
    pub async fn get(&self, source: &str) -> CacheResult<SpecDocument> {
        let key = generate_key(source);

        if let MemoryLookup::Fresh(data) = self.memory_lookup(&key, source).await {
            return Ok(data);
        }
        if let Some(data) = self.disk_lookup(&key, source).await {
            return Ok(data);
        }

        let (load, stale, attached) = {
            let mut in_flight = self.inner.in_flight.lock().await;
            if let Some(existing) = in_flight.get(&key) {
                (existing.load.clone(), false, true)
            } else {
                // A load may have finished between the tier checks and the lock
                let stale = match self.memory_lookup(&key, source).await {
                    MemoryLookup::Fresh(data) => return Ok(data),
                    MemoryLookup::Stale(entry) => Some(entry),
                    MemoryLookup::Absent => None,
                };
                let has_stale = stale.is_some();
                let invalidated = Arc::new(AtomicBool::new(false));
                let load =
                    self.spawn_load(key.clone(), source.to_string(), stale, invalidated.clone());
                in_flight.insert(
                    key.clone(),
                    InFlight {
                        load: load.clone(),
                        invalidated,
                    },
                );
                (load, has_stale, false)
            }
        };

        StatsCounters::bump(&self.inner.counters.misses);
        if attached {
            StatsCounters::bump(&self.inner.counters.deduplicated);
        } else {
            self.emit(CacheEvent::Miss {
                key,
                source: source.to_string(),
                stale,
            });
        }

        load.await
    }

    async fn memory_lookup(&self, key: &CacheKey, source: &str) -> MemoryLookup {
        let mut memory = self.inner.memory.lock().await;
        let lookup = match memory.get(key) {
            Some(entry) if entry.is_stale() => MemoryLookup::Stale(entry.clone()),
            Some(entry) => MemoryLookup::Fresh(entry.data.clone()),
            None => MemoryLookup::Absent,
        };
        drop(memory);

        if let MemoryLookup::Fresh(_) = lookup {
            StatsCounters::bump(&self.inner.counters.memory_hits);
            self.emit(CacheEvent::Hit {
                key: key.clone(),
                source: source.to_string(),
                tier: CacheTier::Memory,
            });
        }
        lookup
    }

    /// Disk hits are always fresh; expired and corrupt files read as misses.
    async fn disk_lookup(&self, key: &CacheKey, source: &str) -> Option<SpecDocument> {
        let entry = match self.inner.disk.get(key).await {
            Ok(Some(entry)) if entry.source == source => entry,
            Ok(_) => return None,
            Err(e) => {
                self.degrade("get", &e);
                return None;
            }
        };

        let data = entry.data.clone();
        self.insert_memory(entry).await;
        StatsCounters::bump(&self.inner.counters.disk_hits);
        self.emit(CacheEvent::Hit {
            key: key.clone(),
            source: source.to_string(),
            tier: CacheTier::Disk,
        });
        Some(data)
    }

    // ========================================================================
    // LOADING
    // ========================================================================

    /// Spawn the load for `key`. Must be called with the in-flight map
    /// locked so the task's own removal happens after registration.
    fn spawn_load(
        &self,
        key: CacheKey,
        source: String,
        stale: Option<CacheEntry>,
        invalidated: Arc<AtomicBool>,
    ) -> SharedLoad {
        let cache = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            cache
                .run_load(task_key, source, stale, &invalidated)
                .await
        });

        let cache = self.clone();
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    cache.inner.in_flight.lock().await.remove(&key);
                    Err(CacheError::Internal {
                        reason: format!("spec load task failed: {}", e),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run_load(
        &self,
        key: CacheKey,
        source: String,
        stale: Option<CacheEntry>,
        invalidated: &AtomicBool,
    ) -> CacheResult<SpecDocument> {
        let result = self
            .load_and_store(&key, &source, stale.as_ref(), invalidated)
            .await;
        self.inner.in_flight.lock().await.remove(&key);

        match (result, stale) {
            (Ok(data), _) => Ok(data),
            (Err(CacheError::Load(error)), Some(stale)) if self.inner.config.serve_stale_on_error => {
                StatsCounters::bump(&self.inner.counters.stale_served);
                self.emit(CacheEvent::StaleServed {
                    key,
                    source,
                    error,
                });
                Ok(stale.data)
            }
            (Err(e), _) => Err(e),
        }
    }

    async fn load_and_store(
        &self,
        key: &CacheKey,
        source: &str,
        stale: Option<&CacheEntry>,
        invalidated: &AtomicBool,
    ) -> CacheResult<SpecDocument> {
        let spec_source = SpecSource::parse(source);
        let etag = match (&spec_source, stale) {
            (SpecSource::Url(_), Some(entry)) => entry.etag.as_deref(),
            _ => None,
        };

        let counters = &self.inner.counters;
        StatsCounters::bump(&counters.loads);
        if etag.is_some() {
            StatsCounters::bump(&counters.revalidations);
        }
        self.emit(CacheEvent::LoadStarted {
            key: key.clone(),
            source: source.to_string(),
            conditional: etag.is_some(),
        });

        let started = Instant::now();
        let fetched = match self.inner.loader.load(&spec_source, etag).await {
            Ok(fetched) => fetched,
            Err(error) => {
                StatsCounters::bump(&counters.load_failures);
                self.emit(CacheEvent::LoadFailed {
                    key: key.clone(),
                    error: error.clone(),
                });
                return Err(error.into());
            }
        };

        let entry = match (fetched, stale) {
            (None, Some(stale)) => {
                StatsCounters::bump(&counters.not_modified);
                self.emit(CacheEvent::Revalidated {
                    key: key.clone(),
                    source: source.to_string(),
                    modified: false,
                });
                stale.refreshed()
            }
            (None, None) => {
                return Err(CacheError::Internal {
                    reason: format!("{} answered 304 without a cached entry", source),
                })
            }
            (Some(fetched), _) => {
                if etag.is_some() {
                    self.emit(CacheEvent::Revalidated {
                        key: key.clone(),
                        source: source.to_string(),
                        modified: true,
                    });
                }
                CacheEntry::new(
                    key.clone(),
                    source,
                    Arc::new(fetched.data),
                    self.inner.config.default_ttl,
                    fetched.etag,
                )
            }
        };

        self.emit(CacheEvent::Loaded {
            key: key.clone(),
            source: source.to_string(),
            size_bytes: entry.size_bytes,
            elapsed: started.elapsed(),
        });

        let data = entry.data.clone();
        self.store_unless_invalidated(entry, invalidated).await;
        Ok(data)
    }

    /// Write back a loaded entry unless the key was invalidated or the cache
    /// cleared while the load ran. Waiting callers still get the data.
    ///
    /// The flag is checked again after the write: an invalidation that
    /// lands mid-write may have run its removal before the write finished.
    async fn store_unless_invalidated(&self, entry: CacheEntry, invalidated: &AtomicBool) {
        if invalidated.load(Ordering::SeqCst) {
            tracing::debug!(key = %entry.key.short(), "Load invalidated, skipping write-back");
            return;
        }
        let key = entry.key.clone();
        self.store(entry).await;
        if invalidated.load(Ordering::SeqCst) {
            self.remove_from_tiers(&key).await;
        }
    }

    // ========================================================================
    // POPULATION
    // ========================================================================

    /// Populate both tiers explicitly, bypassing the loader.
    pub async fn set(
        &self,
        source: &str,
        data: impl Into<SpecDocument>,
        options: SetOptions,
    ) -> CacheKey {
        let key = generate_key(source);
        let ttl = options.ttl.unwrap_or(self.inner.config.default_ttl);
        let entry = CacheEntry::new(key.clone(), source, data.into(), ttl, options.etag);
        self.store(entry).await;
        key
    }

    /// Write through to disk then memory, then enforce the disk budget.
    async fn store(&self, mut entry: CacheEntry) {
        match self.inner.disk.set(&entry).await {
            Ok(write) => entry.compressed = write.compressed,
            Err(e) => self.degrade("set", &e),
        }
        self.insert_memory(entry).await;
        self.enforce_disk_budget().await;
    }

    async fn insert_memory(&self, entry: CacheEntry) {
        let evicted = self.inner.memory.lock().await.insert(entry);
        if let Some(evicted) = evicted {
            StatsCounters::bump(&self.inner.counters.evictions);
            self.emit(CacheEvent::Evicted {
                key: evicted.key,
                tier: CacheTier::Memory,
                reason: EvictionReason::Capacity,
            });
        }
    }

    async fn enforce_disk_budget(&self) -> usize {
        let Some(max_bytes) = self.inner.config.max_disk_bytes else {
            return 0;
        };
        match self.inner.disk.enforce_budget(max_bytes).await {
            Ok(evicted) => {
                StatsCounters::add(&self.inner.counters.evictions, evicted.len() as u64);
                let count = evicted.len();
                for key in evicted {
                    self.emit(CacheEvent::Evicted {
                        key,
                        tier: CacheTier::Disk,
                        reason: EvictionReason::DiskBudget,
                    });
                }
                count
            }
            Err(e) => {
                self.degrade("enforce_budget", &e);
                0
            }
        }
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Remove a source from both tiers. Returns true if anything was removed.
    pub async fn invalidate(&self, source: &str) -> bool {
        self.invalidate_key(&generate_key(source)).await
    }

    ///
    /// A load already running for the key still answers its callers but
    /// does not write its result back.
    pub async fn invalidate_key(&self, key: &CacheKey) -> bool {
        if let Some(in_flight) = self.inner.in_flight.lock().await.get(key) {
            in_flight.invalidated.store(true, Ordering::SeqCst);
        }

        let removed = self.remove_from_tiers(key).await;
        if removed {
            self.emit(CacheEvent::Invalidated { key: key.clone() });
        }
        removed
    }

    async fn remove_from_tiers(&self, key: &CacheKey) -> bool {
        let in_memory = self.inner.memory.lock().await.remove(key).is_some();
        let on_disk = match self.inner.disk.remove(key).await {
            Ok(removed) => removed,
            Err(e) => {
                self.degrade("remove", &e);
                false
            }
        };
        in_memory || on_disk
    }

    /// Empty both tiers. Loads already running do not write back.
    pub async fn clear(&self) {
        for in_flight in self.inner.in_flight.lock().await.values() {
            in_flight.invalidated.store(true, Ordering::SeqCst);
        }

        let memory_entries = {
            let mut memory = self.inner.memory.lock().await;
            let len = memory.len();
            memory.clear();
            len
        };
        let disk_files = match self.inner.disk.clear().await {
            Ok(files) => files,
            Err(e) => {
                self.degrade("clear", &e);
                0
            }
        };

        self.emit(CacheEvent::Cleared {
            memory_entries,
            disk_files,
        });
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    pub async fn stats(&self) -> CacheStats {
        let memory = {
            let memory = self.inner.memory.lock().await;
            MemoryUsage {
                size: memory.len(),
                capacity: memory.capacity(),
                bytes: memory.resident_bytes(),
            }
        };
        let disk = self.disk_usage().await;
        CacheStats::from_counters(&self.inner.counters, memory, disk)
    }

    /// Point-in-time snapshot of counters and memory-resident entries.
    pub async fn report(&self) -> CacheReport {
        let now = Utc::now();
        let entries = self
            .inner
            .memory
            .lock()
            .await
            .snapshot()
            .into_iter()
            .map(|entry| EntryReport {
                age: entry.age(),
                stale: entry.is_stale_at(now),
                key: entry.key,
                source: entry.source,
                ttl: entry.ttl,
                etag: entry.etag,
                size_bytes: entry.size_bytes,
            })
            .collect();
        let in_flight = self.inner.in_flight.lock().await.len();

        CacheReport {
            generated_at: now,
            stats: self.stats().await,
            entries,
            in_flight,
        }
    }

    async fn disk_usage(&self) -> DiskUsage {
        match self.inner.disk.usage().await {
            Ok(usage) => usage,
            Err(e) => {
                self.degrade("usage", &e);
                DiskUsage::default()
            }
        }
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Drop expired entries from both tiers and enforce the disk budget.
    pub async fn maintain(&self) -> MaintenanceReport {
        let now = Utc::now();

        let expired = self.inner.memory.lock().await.drain_expired(now);
        let memory_expired = expired.len();
        for entry in expired {
            self.emit(CacheEvent::Evicted {
                key: entry.key,
                tier: CacheTier::Memory,
                reason: EvictionReason::Expired,
            });
        }

        let disk_expired = match self.inner.disk.purge_expired(now).await {
            Ok(purged) => {
                let count = purged.len();
                for key in purged {
                    self.emit(CacheEvent::Evicted {
                        key,
                        tier: CacheTier::Disk,
                        reason: EvictionReason::Expired,
                    });
                }
                count
            }
            Err(e) => {
                self.degrade("purge_expired", &e);
                0
            }
        };

        let disk_evicted = self.enforce_disk_budget().await;

        let report = MaintenanceReport {
            memory_expired,
            disk_expired,
            disk_evicted,
        };
        tracing::debug!(
            memory_expired,
            disk_expired,
            disk_evicted,
            "Spec cache maintenance complete"
        );
        report
    }

    /// Wait for in-flight loads, run a final maintenance pass and log the
    /// final statistics.
    pub async fn shutdown(self) -> CacheStats {
        let pending: Vec<SharedLoad> = self
            .inner
            .in_flight
            .lock()
            .await
            .values()
            .map(|in_flight| in_flight.load.clone())
            .collect();
        if !pending.is_empty() {
            tracing::debug!(pending = pending.len(), "Waiting for in-flight spec loads");
            futures_util::future::join_all(pending).await;
        }

        self.maintain().await;
        let stats = self.stats().await;
        tracing::info!(
            hits = stats.hits(),
            misses = stats.misses,
            loads = stats.loads,
            hit_rate = stats.hit_rate(),
            memory_entries = stats.memory.size,
            disk_files = stats.disk.files,
            "Spec cache shut down"
        );
        stats
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn degrade(&self, operation: &'static str, error: &DiskError) {
        tracing::warn!(operation, error = %error, "Disk cache operation failed");
        StatsCounters::bump(&self.inner.counters.disk_errors);
        self.emit(CacheEvent::DiskDegraded {
            operation,
            reason: error.to_string(),
        });
    }

    fn emit(&self, event: CacheEvent) {
        let observers = self
            .inner
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for observer in observers.iter() {
            observer.on_event(&event);
        }
    }
}

impl fmt::Debug for SpecCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecCache")
            .field("config", &self.inner.config)
            .field("disk", &self.inner.disk)
            .field("loader", &self.inner.loader)
            .finish_non_exhaustive()
    }
}
