//! Tracing subscriber setup for binaries embedding the cache.
//!
//! The library itself only emits `tracing` events; this is a convenience for
//! hosts that have no subscriber of their own.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "oasgen_cache=info";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Filter directives used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Include the event target (module path) in output.
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: std::env::var("OASGEN_LOG_FILTER")
                .unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
            json: std::env::var("OASGEN_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.default_filter))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install a global subscriber.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case the existing one is left alone.
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    let result = if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.with_target),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(config.with_target))
            .try_init()
    };

    match result {
        Ok(()) => {
            tracing::debug!(json = config.json, "Tracing initialized");
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let config = TelemetryConfig::default()
            .with_json(true)
            .with_default_filter("oasgen_cache=debug");
        assert!(config.json);
        assert_eq!(config.default_filter, "oasgen_cache=debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = TelemetryConfig::default();
        init_tracing(&config);
        // Whatever the first call did, a second install never succeeds
        assert!(!init_tracing(&config));
    }
}
