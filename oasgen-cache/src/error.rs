//! Error types for spec cache operations

use std::fmt;
use thiserror::Error;

/// Where a specification document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Url,
    File,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Url => write!(f, "URL"),
            SourceKind::File => write!(f, "file"),
        }
    }
}

/// Errors raised while fetching or parsing a specification document.
///
/// These propagate unmodified to `SpecCache::get` callers. The type is
/// `Clone` because a single in-flight load fans its result out to every
/// caller waiting on the same key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("Failed to load spec from URL: {url}: {reason}")]
    Network {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Failed to load spec from URL: {url}: request timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Failed to load spec from file: {path}: file not found")]
    FileNotFound { path: String },

    #[error("Failed to load spec from file: {path}: {reason}")]
    FileRead { path: String, reason: String },

    #[error("Failed to load spec from {kind}: invalid {format} in {location}: {reason}")]
    Parse {
        kind: SourceKind,
        location: String,
        format: String,
        reason: String,
    },

    #[error("Failed to load spec from file: {location}: unsupported extension {extension:?} (expected .json, .yaml or .yml)")]
    UnsupportedFormat { location: String, extension: String },
}

impl LoadError {
    /// The source identifier the failed load was attempting.
    pub fn location(&self) -> &str {
        match self {
            LoadError::Network { url, .. } | LoadError::Timeout { url, .. } => url,
            LoadError::FileNotFound { path } | LoadError::FileRead { path, .. } => path,
            LoadError::Parse { location, .. } | LoadError::UnsupportedFormat { location, .. } => {
                location
            }
        }
    }

    /// Returns true for transport-level failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            LoadError::Timeout { .. } => true,
            LoadError::Network { status, .. } => match status {
                None => true,
                Some(code) => *code >= 500 || *code == 429,
            },
            _ => false,
        }
    }
}

/// Disk tier errors.
///
/// Never surfaced from the public cache API: the disk tier logs and counts
/// them, then degrades to a cache miss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiskError {
    #[error("Disk I/O failed on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Corrupt cache envelope at {path}: {reason}")]
    Corruption { path: String, reason: String },

    #[error("Failed to serialize cache envelope: {reason}")]
    Serialization { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for the spec cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal cache error: {reason}")]
    Internal { reason: String },
}

impl CacheError {
    /// The underlying load error, if this failure came from the source loader.
    pub fn as_load_error(&self) -> Option<&LoadError> {
        match self {
            CacheError::Load(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for spec cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type alias for source loader operations.
pub type LoadResult<T> = Result<T, LoadError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_not_found_message() {
        let err = LoadError::FileNotFound {
            path: "/definitely/missing.json".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to load spec from file"));
        assert!(msg.contains("/definitely/missing.json"));
    }

    #[test]
    fn test_network_message() {
        let err = LoadError::Network {
            url: "https://api.x/spec.json".to_string(),
            status: Some(500),
            reason: "HTTP 500 Internal Server Error".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Failed to load spec from URL"));
        assert!(msg.contains("500"));
    }

    #[test]
    fn test_parse_message_names_origin() {
        let err = LoadError::Parse {
            kind: SourceKind::File,
            location: "api.yaml".to_string(),
            format: "YAML".to_string(),
            reason: "bad indent".to_string(),
        };
        assert!(err.to_string().contains("Failed to load spec from file"));

        let err = LoadError::Parse {
            kind: SourceKind::Url,
            location: "https://api.x/spec.json".to_string(),
            format: "JSON".to_string(),
            reason: "EOF".to_string(),
        };
        assert!(err.to_string().contains("Failed to load spec from URL"));
    }

    #[test]
    fn test_cache_error_is_transparent_over_load_error() {
        let load = LoadError::Timeout {
            url: "https://api.x/spec.json".to_string(),
            timeout_ms: 250,
        };
        let err: CacheError = load.clone().into();
        assert_eq!(err.to_string(), load.to_string());
        assert_eq!(err.as_load_error(), Some(&load));
    }

    #[test]
    fn test_transient_classification() {
        let timeout = LoadError::Timeout {
            url: "u".to_string(),
            timeout_ms: 1,
        };
        assert!(timeout.is_transient());

        let not_found = LoadError::Network {
            url: "u".to_string(),
            status: Some(404),
            reason: "HTTP 404".to_string(),
        };
        assert!(!not_found.is_transient());
        assert_eq!(not_found.location(), "u");

        let refused = LoadError::Network {
            url: "u".to_string(),
            status: None,
            reason: "connection refused".to_string(),
        };
        assert!(refused.is_transient());
    }
}
