//! Cache configuration.
//!
//! Configuration comes from three places, in increasing precedence of how a
//! pipeline usually wires them: `CacheConfig::default()`, a TOML file
//! (`from_path` / `from_toml_str`), and `OASGEN_CACHE_*` environment
//! variables (`from_env`). Builders cover programmatic overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for a [`SpecCache`](crate::SpecCache).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Disk tier root directory.
    pub cache_dir: PathBuf,
    /// Memory tier capacity (entries).
    pub max_memory_items: usize,
    /// Freshness window for newly loaded entries.
    pub default_ttl: Duration,
    /// Disk budget in bytes. `None` means unbounded.
    pub max_disk_bytes: Option<u64>,
    /// Envelopes larger than this many bytes are gzip-compressed on disk.
    pub compression_threshold: u64,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Whether the disk tier is used at all.
    pub disk_enabled: bool,
    /// Serve a stale entry when its reload fails instead of propagating the error.
    pub serve_stale_on_error: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_memory_items: 100,
            default_ttl: Duration::from_secs(3600), // 1 hour
            max_disk_bytes: None,
            compression_threshold: 10 * 1024,
            http_timeout: Duration::from_secs(30),
            disk_enabled: true,
            serve_stale_on_error: false,
        }
    }
}

/// Default disk tier location under the system temp directory.
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("oasgen-cache")
}

/// On-disk TOML shape. Every field is optional and overlays the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheConfigFile {
    cache_dir: Option<PathBuf>,
    max_memory_items: Option<usize>,
    default_ttl_ms: Option<u64>,
    max_disk_bytes: Option<u64>,
    compression_threshold: Option<u64>,
    http_timeout_ms: Option<u64>,
    disk_enabled: Option<bool>,
    serve_stale_on_error: Option<bool>,
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the disk tier directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set the memory tier capacity.
    pub fn with_max_memory_items(mut self, max: usize) -> Self {
        self.max_memory_items = max;
        self
    }

    /// Set the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the disk budget.
    pub fn with_max_disk_bytes(mut self, max: Option<u64>) -> Self {
        self.max_disk_bytes = max;
        self
    }

    /// Set the compression threshold.
    pub fn with_compression_threshold(mut self, bytes: u64) -> Self {
        self.compression_threshold = bytes;
        self
    }

    /// Set the HTTP timeout.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Enable or disable the disk tier.
    pub fn with_disk(mut self, enabled: bool) -> Self {
        self.disk_enabled = enabled;
        self
    }

    /// Enable or disable the stale fallback on load errors.
    pub fn with_serve_stale_on_error(mut self, enabled: bool) -> Self {
        self.serve_stale_on_error = enabled;
        self
    }

    /// Create CacheConfig from environment variables, starting from defaults.
    ///
    /// Environment variables:
    /// - `OASGEN_CACHE_DIR`: Disk tier root
    /// - `OASGEN_CACHE_MAX_MEMORY_ITEMS`: Memory tier capacity (default: 100)
    /// - `OASGEN_CACHE_DEFAULT_TTL_MS`: TTL in milliseconds (default: 3600000)
    /// - `OASGEN_CACHE_MAX_DISK_BYTES`: Disk budget (default: unbounded)
    /// - `OASGEN_CACHE_COMPRESSION_THRESHOLD`: Bytes (default: 10240)
    /// - `OASGEN_CACHE_HTTP_TIMEOUT_MS`: HTTP timeout (default: 30000)
    /// - `OASGEN_CACHE_DISK_ENABLED`: "true" or "false" (default: true)
    /// - `OASGEN_CACHE_SERVE_STALE`: "true" or "false" (default: false)
    pub fn from_env() -> Self {
        Self::default().apply_env(|name| std::env::var(name).ok())
    }

    /// Overlay values read through `lookup` onto this config.
    ///
    /// Unparseable values are ignored, matching `from_env`.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("OASGEN_CACHE_DIR").filter(|s| !s.trim().is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(max) = lookup("OASGEN_CACHE_MAX_MEMORY_ITEMS").and_then(|s| s.parse().ok()) {
            self.max_memory_items = max;
        }
        if let Some(ms) = lookup("OASGEN_CACHE_DEFAULT_TTL_MS").and_then(|s| s.parse().ok()) {
            self.default_ttl = Duration::from_millis(ms);
        }
        if let Some(bytes) = lookup("OASGEN_CACHE_MAX_DISK_BYTES").and_then(|s| s.parse().ok()) {
            self.max_disk_bytes = Some(bytes);
        }
        if let Some(bytes) =
            lookup("OASGEN_CACHE_COMPRESSION_THRESHOLD").and_then(|s| s.parse().ok())
        {
            self.compression_threshold = bytes;
        }
        if let Some(ms) = lookup("OASGEN_CACHE_HTTP_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
            self.http_timeout = Duration::from_millis(ms);
        }
        if let Some(enabled) = lookup("OASGEN_CACHE_DISK_ENABLED") {
            self.disk_enabled = enabled.to_lowercase() != "false";
        }
        if let Some(enabled) = lookup("OASGEN_CACHE_SERVE_STALE") {
            self.serve_stale_on_error = enabled.to_lowercase() == "true";
        }
        self
    }

    /// Load a config file, overlaying it on the defaults.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse TOML config text, overlaying it on the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: CacheConfigFile = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;

        let mut config = Self::default();
        if let Some(dir) = file.cache_dir {
            config.cache_dir = dir;
        }
        if let Some(max) = file.max_memory_items {
            config.max_memory_items = max;
        }
        if let Some(ms) = file.default_ttl_ms {
            config.default_ttl = Duration::from_millis(ms);
        }
        if file.max_disk_bytes.is_some() {
            config.max_disk_bytes = file.max_disk_bytes;
        }
        if let Some(bytes) = file.compression_threshold {
            config.compression_threshold = bytes;
        }
        if let Some(ms) = file.http_timeout_ms {
            config.http_timeout = Duration::from_millis(ms);
        }
        if let Some(enabled) = file.disk_enabled {
            config.disk_enabled = enabled;
        }
        if let Some(enabled) = file.serve_stale_on_error {
            config.serve_stale_on_error = enabled;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_memory_items == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_memory_items",
                reason: "must be > 0".to_string(),
            });
        }
        if self.http_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "http_timeout",
                reason: "must be > 0".to_string(),
            });
        }
        if self.disk_enabled && self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cache_dir",
                reason: "must not be empty when the disk tier is enabled".to_string(),
            });
        }
        if self.max_disk_bytes == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_disk_bytes",
                reason: "must be > 0 when set".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_memory_items, 100);
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.max_disk_bytes, None);
        assert_eq!(config.compression_threshold, 10 * 1024);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(config.disk_enabled);
        assert!(!config.serve_stale_on_error);
        assert!(config.cache_dir.ends_with("oasgen-cache"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new()
            .with_cache_dir("/tmp/specs")
            .with_max_memory_items(5)
            .with_ttl(Duration::from_millis(1500))
            .with_max_disk_bytes(Some(4096))
            .with_compression_threshold(512)
            .with_http_timeout(Duration::from_secs(2))
            .with_disk(false)
            .with_serve_stale_on_error(true);

        assert_eq!(config.cache_dir, PathBuf::from("/tmp/specs"));
        assert_eq!(config.max_memory_items, 5);
        assert_eq!(config.default_ttl, Duration::from_millis(1500));
        assert_eq!(config.max_disk_bytes, Some(4096));
        assert_eq!(config.compression_threshold, 512);
        assert_eq!(config.http_timeout, Duration::from_secs(2));
        assert!(!config.disk_enabled);
        assert!(config.serve_stale_on_error);
    }

    #[test]
    fn test_apply_env() {
        let vars: HashMap<&str, &str> = [
            ("OASGEN_CACHE_DIR", "/var/cache/oasgen"),
            ("OASGEN_CACHE_MAX_MEMORY_ITEMS", "7"),
            ("OASGEN_CACHE_DEFAULT_TTL_MS", "250"),
            ("OASGEN_CACHE_MAX_DISK_BYTES", "1048576"),
            ("OASGEN_CACHE_HTTP_TIMEOUT_MS", "not-a-number"),
            ("OASGEN_CACHE_DISK_ENABLED", "FALSE"),
            ("OASGEN_CACHE_SERVE_STALE", "true"),
        ]
        .into_iter()
        .collect();

        let config = CacheConfig::default().apply_env(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/oasgen"));
        assert_eq!(config.max_memory_items, 7);
        assert_eq!(config.default_ttl, Duration::from_millis(250));
        assert_eq!(config.max_disk_bytes, Some(1_048_576));
        // Unparseable value keeps the default
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(!config.disk_enabled);
        assert!(config.serve_stale_on_error);
    }

    #[test]
    fn test_from_toml_str() {
        let config = CacheConfig::from_toml_str(
            r#"
            cache_dir = "/tmp/oasgen-test"
            max_memory_items = 3
            default_ttl_ms = 60000
            compression_threshold = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_dir, PathBuf::from("/tmp/oasgen-test"));
        assert_eq!(config.max_memory_items, 3);
        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.compression_threshold, 1);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_from_toml_rejects_unknown_fields() {
        let err = CacheConfig::from_toml_str("max_items = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let err = CacheConfig::from_toml_str("max_memory_items = 0").unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                field: "max_memory_items",
                reason: "must be > 0".to_string(),
            }
        );
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = CacheConfig::default().with_http_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "http_timeout",
                ..
            })
        ));
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = CacheConfig::from_path(Path::new("/definitely/missing/oasgen.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
