//! oasgen test utilities
//!
//! Shared test infrastructure for the oasgen workspace:
//! - Mock HTTP transport with request counting and ETag scripting
//! - Spec document fixtures
//! - Proptest generators for sources and documents

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

pub use oasgen_cache::{
    CacheConfig, CacheStats, HttpResponse, HttpTransport, SpecCache, TransportError,
};

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// One scripted reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// 200 with a JSON body and optional ETag.
    Ok { body: String, etag: Option<String> },
    /// 200 with an explicit content type.
    Typed {
        body: String,
        content_type: String,
        etag: Option<String>,
    },
    NotModified,
    Status(u16),
    Fail(String),
    Timeout,
}

impl MockResponse {
    pub fn json(body: &Value) -> Self {
        MockResponse::Ok {
            body: body.to_string(),
            etag: None,
        }
    }

    pub fn json_with_etag(body: &Value, etag: &str) -> Self {
        MockResponse::Ok {
            body: body.to_string(),
            etag: Some(etag.to_string()),
        }
    }
}

/// A request seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub if_none_match: Option<String>,
}

#[derive(Debug, Default)]
struct Script {
    /// Served on every request once the queue is empty.
    defaults: HashMap<String, MockResponse>,
    /// One-shot replies, consumed first.
    queued: HashMap<String, VecDeque<MockResponse>>,
    requests: Vec<RecordedRequest>,
}

/// In-memory HTTP transport.
///
/// Behaves like a well-behaved origin: when a request's `If-None-Match`
/// equals the ETag of the default reply for that URL, it answers `304`.
/// Unknown URLs answer `404`.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<Script>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply, to hold loads in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set the standing reply for a URL.
    pub fn respond(&self, url: &str, response: MockResponse) -> &Self {
        self.script().defaults.insert(url.to_string(), response);
        self
    }

    /// Queue a one-shot reply for a URL.
    pub fn push(&self, url: &str, response: MockResponse) -> &Self {
        self.script()
            .queued
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Total requests across all URLs.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.script()
            .requests
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script().requests.clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.script().requests.last().cloned()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_response(&self, url: &str, etag: Option<&str>) -> MockResponse {
        let mut script = self.script();
        script.requests.push(RecordedRequest {
            url: url.to_string(),
            if_none_match: etag.map(str::to_string),
        });

        if let Some(response) = script.queued.get_mut(url).and_then(VecDeque::pop_front) {
            return response;
        }

        match script.defaults.get(url) {
            Some(MockResponse::Ok {
                etag: Some(current),
                ..
            })
            | Some(MockResponse::Typed {
                etag: Some(current),
                ..
            }) if etag == Some(current.as_str()) => MockResponse::NotModified,
            Some(response) => response.clone(),
            None => MockResponse::Status(404),
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, url: &str, etag: Option<&str>) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.next_response(url, etag);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match response {
            MockResponse::Ok { body, etag } => Ok(HttpResponse {
                status: 200,
                etag,
                content_type: Some("application/json".to_string()),
                body: body.into_bytes(),
            }),
            MockResponse::Typed {
                body,
                content_type,
                etag,
            } => Ok(HttpResponse {
                status: 200,
                etag,
                content_type: Some(content_type),
                body: body.into_bytes(),
            }),
            MockResponse::NotModified => Ok(empty_response(304)),
            MockResponse::Status(status) => Ok(empty_response(status)),
            MockResponse::Fail(reason) => Err(TransportError::Failed(reason)),
            MockResponse::Timeout => Err(TransportError::Timeout),
        }
    }
}

fn empty_response(status: u16) -> HttpResponse {
    HttpResponse {
        status,
        etag: None,
        content_type: None,
        body: Vec::new(),
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub const PETSTORE_URL: &str = "https://petstore.example.com/openapi.json";

pub const PETSTORE_YAML: &str = r#"openapi: 3.0.0
info:
  title: Petstore
  version: 1.0.0
paths:
  /pets:
    get:
      operationId: listPets
      responses:
        "200":
          description: A list of pets
"#;

/// The smallest document the cache will store.
pub fn minimal_spec() -> Value {
    json!({ "openapi": "3.0.0" })
}

pub fn petstore_spec() -> Value {
    json!({
        "openapi": "3.0.0",
        "info": { "title": "Petstore", "version": "1.0.0" },
        "paths": {
            "/pets": {
                "get": {
                    "operationId": "listPets",
                    "responses": { "200": { "description": "A list of pets" } }
                }
            }
        }
    })
}

/// A document with `paths` operations, large enough to cross small
/// compression thresholds.
pub fn large_spec(paths: usize) -> Value {
    let paths: serde_json::Map<String, Value> = (0..paths)
        .map(|i| {
            (
                format!("/resource/{}", i),
                json!({
                    "get": {
                        "operationId": format!("getResource{}", i),
                        "description": "Fetches a single resource by identifier.",
                        "responses": { "200": { "description": "OK" } }
                    }
                }),
            )
        })
        .collect();
    json!({
        "openapi": "3.0.0",
        "info": { "title": "Large", "version": "1.0.0" },
        "paths": paths
    })
}

/// Write a spec file into `dir` and return its path.
pub fn write_spec_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write spec fixture");
    path
}

/// Config rooted in a temporary directory.
pub fn temp_config(dir: &TempDir) -> CacheConfig {
    CacheConfig::default().with_cache_dir(dir.path().join("cache"))
}

/// A cache over a mock transport, rooted in a temporary directory.
pub fn test_cache(dir: &TempDir, transport: std::sync::Arc<MockTransport>) -> SpecCache {
    SpecCache::with_transport(temp_config(dir), transport).expect("valid test config")
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use proptest::prelude::*;
    use serde_json::{json, Value};

    /// Source identifiers: URLs and relative or absolute file paths.
    pub fn arb_source() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,12}\\.(json|yaml|yml)",
            "/[a-z]{1,8}/[a-z]{1,8}\\.(json|yaml)",
            "https://[a-z]{1,10}\\.example\\.com/[a-z]{1,8}\\.json",
            "http://localhost:[0-9]{2,4}/specs/[a-z0-9]{1,8}",
        ]
    }

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ]
    }

    /// Arbitrary JSON trees shaped like a spec document.
    pub fn arb_spec_document() -> impl Strategy<Value = Value> {
        let tree = arb_leaf().prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        });
        (tree, "3\\.[01]\\.[0-3]").prop_map(|(paths, version)| {
            json!({
                "openapi": version,
                "info": { "title": "Generated", "version": "1.0.0" },
                "paths": { "/generated": paths }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_answers_304_for_matching_etag() {
        let transport = MockTransport::new();
        transport.respond(PETSTORE_URL, MockResponse::json_with_etag(&minimal_spec(), "\"v1\""));

        let first = transport.get(PETSTORE_URL, None).await.unwrap();
        assert_eq!(first.status, 200);
        assert_eq!(first.etag.as_deref(), Some("\"v1\""));

        let second = transport.get(PETSTORE_URL, Some("\"v1\"")).await.unwrap();
        assert_eq!(second.status, 304);

        let stale = transport.get(PETSTORE_URL, Some("\"v0\"")).await.unwrap();
        assert_eq!(stale.status, 200);

        assert_eq!(transport.calls(), 3);
        assert_eq!(transport.calls_for(PETSTORE_URL), 3);
    }

    #[tokio::test]
    async fn test_mock_queue_and_unknown_urls() {
        let transport = MockTransport::new();
        transport.push("https://x/a.json", MockResponse::Fail("reset".to_string()));
        transport.respond("https://x/a.json", MockResponse::json(&minimal_spec()));

        assert!(transport.get("https://x/a.json", None).await.is_err());
        assert_eq!(transport.get("https://x/a.json", None).await.unwrap().status, 200);
        assert_eq!(transport.get("https://x/missing", None).await.unwrap().status, 404);
        assert_eq!(
            transport.last_request().unwrap().url,
            "https://x/missing".to_string()
        );
    }

    #[test]
    fn test_large_spec_size() {
        let spec = large_spec(50);
        assert_eq!(spec["paths"].as_object().unwrap().len(), 50);
        assert!(spec.to_string().len() > 4096);
    }
}
