//! Source loader: fetch and parse specification documents.
//!
//! Fetches raw bytes from an `http(s)` URL (with conditional `If-None-Match`
//! revalidation) or from the filesystem, and parses them as JSON or YAML.
//! The loader has no caching side effects.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, ETAG, IF_NONE_MATCH, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::{LoadError, LoadResult, SourceKind};

const ACCEPT_SPEC: &str = "application/json, application/yaml, text/yaml, */*";
const AGENT: &str = concat!("oasgen-cache/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// SOURCE + FORMAT
// ============================================================================

/// A classified spec source identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecSource {
    Url(String),
    File(PathBuf),
}

impl SpecSource {
    /// Classify an identifier: `http://` / `https://` (any case) is a URL,
    /// everything else is a file path.
    pub fn parse(source: &str) -> Self {
        let lower = source.trim_start().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            SpecSource::Url(source.trim().to_string())
        } else {
            SpecSource::File(PathBuf::from(source))
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SpecSource::Url(_) => SourceKind::Url,
            SpecSource::File(_) => SourceKind::File,
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, SpecSource::Url(_))
    }
}

impl fmt::Display for SpecSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecSource::Url(url) => f.write_str(url),
            SpecSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Document syntax. Closed set: anything else is an explicit error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecFormat {
    Json,
    Yaml,
}

impl SpecFormat {
    /// Map a file extension (without the dot, any case) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(SpecFormat::Json),
            "yaml" | "yml" => Some(SpecFormat::Yaml),
            _ => None,
        }
    }

    /// Dispatch on a file path's extension.
    pub fn from_path(path: &Path) -> LoadResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::from_extension(ext).ok_or_else(|| LoadError::UnsupportedFormat {
            location: path.display().to_string(),
            extension: ext.to_string(),
        })
    }

    /// Pick a format for an HTTP response.
    ///
    /// The URL path extension wins when it is recognized; otherwise a YAML
    /// content type selects YAML, and JSON is assumed.
    pub fn for_url(url: &str, content_type: Option<&str>) -> Self {
        let from_path = Url::parse(url).ok().and_then(|parsed| {
            let last = parsed.path_segments()?.last()?.to_string();
            let (_, ext) = last.rsplit_once('.')?;
            Self::from_extension(ext)
        });
        if let Some(format) = from_path {
            return format;
        }
        match content_type {
            Some(ct) if ct.to_ascii_lowercase().contains("yaml") => SpecFormat::Yaml,
            _ => SpecFormat::Json,
        }
    }

    /// Parse raw bytes in this format.
    pub fn parse(self, bytes: &[u8], kind: SourceKind, location: &str) -> LoadResult<Value> {
        let parsed = match self {
            SpecFormat::Json => serde_json::from_slice::<Value>(bytes).map_err(|e| e.to_string()),
            SpecFormat::Yaml => serde_yaml::from_slice::<Value>(bytes).map_err(|e| e.to_string()),
        };
        parsed.map_err(|reason| LoadError::Parse {
            kind,
            location: location.to_string(),
            format: self.to_string(),
            reason,
        })
    }
}

impl fmt::Display for SpecFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecFormat::Json => write!(f, "JSON"),
            SpecFormat::Yaml => write!(f, "YAML"),
        }
    }
}

// ============================================================================
// HTTP TRANSPORT
// ============================================================================

/// Raw HTTP response as seen by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Transport-level failure, before any status code exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Failed(String),
}

/// HTTP GET abstraction used by the loader.
///
/// Production code uses [`ReqwestTransport`]; tests plug in a mock that
/// counts requests and scripts responses.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue a GET, sending `If-None-Match: <etag>` when an ETag is given.
    async fn get(&self, url: &str, etag: Option<&str>) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Failed(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing client (shared connection pool, custom TLS, proxies).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, etag: Option<&str>) -> Result<HttpResponse, TransportError> {
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_SPEC)
            .header(USER_AGENT, AGENT);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let etag = headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        Ok(HttpResponse {
            status,
            etag,
            content_type,
            body,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Failed(e.to_string())
    }
}

// ============================================================================
// LOADER
// ============================================================================

/// A freshly fetched and parsed document.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSpec {
    pub data: Value,
    pub etag: Option<String>,
    pub format: SpecFormat,
}

/// Fetch-and-parse front end over a transport and the filesystem.
#[derive(Clone)]
pub struct SpecLoader {
    transport: Arc<dyn HttpTransport>,
    http_timeout: Duration,
}

impl SpecLoader {
    pub fn new(transport: Arc<dyn HttpTransport>, http_timeout: Duration) -> Self {
        Self {
            transport,
            http_timeout,
        }
    }

    /// Load from either kind of source.
    ///
    /// `etag` is only meaningful for URLs. `Ok(None)` means the server
    /// answered `304 Not Modified`.
    pub async fn load(
        &self,
        source: &SpecSource,
        etag: Option<&str>,
    ) -> LoadResult<Option<FetchedSpec>> {
        match source {
            SpecSource::Url(url) => self.load_from_url(url, etag).await,
            SpecSource::File(path) => self.load_from_file(path).await.map(Some),
        }
    }

    /// Conditional GET of a spec URL.
    ///
    /// Returns `Ok(None)` on `304`. Any other non-2xx status, transport
    /// failure, or timeout is an error carrying the URL.
    pub async fn load_from_url(
        &self,
        url: &str,
        etag: Option<&str>,
    ) -> LoadResult<Option<FetchedSpec>> {
        let timeout_ms = self.http_timeout.as_millis() as u64;
        let response = match tokio::time::timeout(self.http_timeout, self.transport.get(url, etag))
            .await
        {
            Err(_) | Ok(Err(TransportError::Timeout)) => {
                return Err(LoadError::Timeout {
                    url: url.to_string(),
                    timeout_ms,
                })
            }
            Ok(Err(TransportError::Failed(reason))) => {
                return Err(LoadError::Network {
                    url: url.to_string(),
                    status: None,
                    reason,
                })
            }
            Ok(Ok(response)) => response,
        };

        let status = StatusCode::from_u16(response.status).map_err(|_| LoadError::Network {
            url: url.to_string(),
            status: Some(response.status),
            reason: format!("invalid HTTP status {}", response.status),
        })?;

        if status == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(LoadError::Network {
                url: url.to_string(),
                status: Some(status.as_u16()),
                reason: format!("HTTP {}", status),
            });
        }

        let format = SpecFormat::for_url(url, response.content_type.as_deref());
        let data = format.parse(&response.body, SourceKind::Url, url)?;
        Ok(Some(FetchedSpec {
            data,
            etag: response.etag,
            format,
        }))
    }

    /// Read and parse a spec file, dispatching on its extension.
    pub async fn load_from_file(&self, path: &Path) -> LoadResult<FetchedSpec> {
        let location = path.display().to_string();
        let format = SpecFormat::from_path(path)?;

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoadError::FileNotFound {
                    path: location.clone(),
                }
            } else {
                LoadError::FileRead {
                    path: location.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let data = format.parse(&bytes, SourceKind::File, &location)?;
        Ok(FetchedSpec {
            data,
            etag: None,
            format,
        })
    }
}

impl fmt::Debug for SpecLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecLoader")
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}
