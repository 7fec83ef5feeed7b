//! oasgen spec cache - two-tier cache for parsed OpenAPI documents
//!
//! Shields the code-generation pipeline from repeatedly fetching or
//! re-parsing the same specification. Lookups go memory tier, then disk
//! tier, then the source (HTTP with ETag revalidation, or the filesystem).

pub mod config;
pub mod coordinator;
pub mod disk;
pub mod entry;
pub mod error;
pub mod hooks;
pub mod key;
pub mod memory;
pub mod source;
pub mod stats;
pub mod telemetry;

pub use config::{default_cache_dir, CacheConfig};
pub use coordinator::{SetOptions, SpecCache};
pub use disk::{DiskEnvelope, DiskTier, DiskUsage};
pub use entry::{CacheEntry, SpecDocument};
pub use error::{
    CacheError, CacheResult, ConfigError, DiskError, LoadError, LoadResult, SourceKind,
};
pub use hooks::{CacheEvent, CacheObserver, EvictionReason, TracingObserver};
pub use key::{generate_key, CacheKey};
pub use memory::MemoryTier;
pub use source::{
    FetchedSpec, HttpResponse, HttpTransport, ReqwestTransport, SpecFormat, SpecLoader,
    SpecSource, TransportError,
};
pub use stats::{
    CacheReport, CacheStats, CacheTier, EntryReport, MaintenanceReport, MemoryUsage,
};
pub use telemetry::{init_tracing, TelemetryConfig};
