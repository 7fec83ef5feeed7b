//! On-disk tier: one self-describing envelope file per key.
//!
//! # Layout
//!
//! Entries live directly under the cache directory as `<key>.cache` (plain
//! JSON envelope) or `<key>.cache.gz` (gzip-compressed envelope). The
//! envelope carries `{ data, source, timestamp, ttl, etag, size }`, enough
//! to check TTL and ETag without touching the original source.
//!
//! # Atomicity
//!
//! Writes go to `.<key>.<uuid>.tmp` in the same directory and are renamed
//! into place, so readers never observe a partially written envelope.
//!
//! # Failure model
//!
//! Every operation returns `Result<_, DiskError>`; the coordinator turns
//! those into cache misses. A malformed envelope is deleted before its
//! `Corruption` error is returned.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::entry::CacheEntry;
use crate::error::DiskError;
use crate::key::{generate_key, CacheKey};

/// Serialized on-disk representation of a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskEnvelope {
    pub data: Value,
    pub source: String,
    /// Creation (or last revalidation) time, epoch milliseconds.
    pub timestamp: i64,
    /// Time-to-live in milliseconds.
    pub ttl: u64,
    pub etag: Option<String>,
    /// Serialized JSON size of `data`.
    pub size: u64,
}

impl DiskEnvelope {
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            data: entry.data.as_ref().clone(),
            source: entry.source.clone(),
            timestamp: entry.created_at.timestamp_millis(),
            ttl: u64::try_from(entry.ttl.as_millis()).unwrap_or(u64::MAX),
            etag: entry.etag.clone(),
            size: entry.size_bytes,
        }
    }

    /// Whether the embedded TTL has run out at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let expires_at = self.timestamp.saturating_add(i64::try_from(self.ttl).unwrap_or(i64::MAX));
        now.timestamp_millis() > expires_at
    }

    fn into_entry(self, key: CacheKey, compressed: bool) -> CacheEntry {
        CacheEntry {
            key,
            data: Arc::new(self.data),
            source: self.source,
            created_at: DateTime::from_timestamp_millis(self.timestamp).unwrap_or_else(Utc::now),
            ttl: Duration::from_millis(self.ttl),
            etag: self.etag,
            size_bytes: self.size,
            compressed,
        }
    }
}

/// Outcome of a successful disk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskWrite {
    /// Bytes written to the final file.
    pub bytes: u64,
    pub compressed: bool,
}

/// One entry file found in the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskFile {
    pub key: CacheKey,
    pub path: PathBuf,
    pub compressed: bool,
    pub bytes: u64,
    pub modified: SystemTime,
}

/// Aggregate disk usage of the tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub files: u64,
    pub bytes: u64,
}

/// Persistent disk tier.
#[derive(Debug, Clone)]
pub struct DiskTier {
    dir: PathBuf,
    compression_threshold: u64,
    enabled: bool,
}

impl DiskTier {
    /// Open the tier rooted at `dir`, creating the directory if needed.
    ///
    /// If the directory cannot be created the tier comes up disabled and
    /// every operation is a no-op miss.
    pub fn open(dir: impl Into<PathBuf>, compression_threshold: u64) -> Self {
        let dir = dir.into();
        let enabled = match std::fs::create_dir_all(&dir) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %e,
                    "Cache directory unavailable, running memory-only"
                );
                false
            }
        };
        Self {
            dir,
            compression_threshold,
            enabled,
        }
    }

    /// A tier that stores nothing.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            compression_threshold: u64::MAX,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey, compressed: bool) -> PathBuf {
        self.dir.join(key.file_name(compressed))
    }

    /// Read an entry.
    ///
    /// `Ok(None)` when no file exists or the embedded TTL has expired (the
    /// expired file is deleted). Malformed envelopes are deleted and
    /// reported as `DiskError::Corruption`.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, DiskError> {
        if !self.enabled {
            return Ok(None);
        }

        let Some((path, compressed, raw)) = self.read_raw(key).await? else {
            return Ok(None);
        };

        let envelope = match decode_envelope(&raw, compressed, key) {
            Ok(envelope) => envelope,
            Err(reason) => {
                self.discard(&path).await;
                return Err(DiskError::Corruption {
                    path: path.display().to_string(),
                    reason,
                });
            }
        };

        if envelope.is_expired_at(Utc::now()) {
            tracing::debug!(key = %key.short(), "Disk entry expired, deleting");
            self.discard(&path).await;
            return Ok(None);
        }

        Ok(Some(envelope.into_entry(key.clone(), compressed)))
    }

    /// Find the file for a key, preferring the compressed variant.
    async fn read_raw(
        &self,
        key: &CacheKey,
    ) -> Result<Option<(PathBuf, bool, Vec<u8>)>, DiskError> {
        for compressed in [true, false] {
            let path = self.path_for(key, compressed);
            match tokio::fs::read(&path).await {
                Ok(raw) => return Ok(Some((path, compressed, raw))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&path, e)),
            }
        }
        Ok(None)
    }

    /// Write an entry atomically, compressing above the threshold.
    pub async fn set(&self, entry: &CacheEntry) -> Result<DiskWrite, DiskError> {
        if !self.enabled {
            return Ok(DiskWrite {
                bytes: 0,
                compressed: false,
            });
        }

        let envelope = DiskEnvelope::from_entry(entry);
        let serialized = serde_json::to_vec(&envelope).map_err(|e| DiskError::Serialization {
            reason: e.to_string(),
        })?;

        let compressed = serialized.len() as u64 > self.compression_threshold;
        let payload = if compressed {
            gzip(&serialized).map_err(|e| DiskError::Serialization {
                reason: format!("gzip failed: {}", e),
            })?
        } else {
            serialized
        };

        let final_path = self.path_for(&entry.key, compressed);
        let tmp_path = self.dir.join(format!(
            ".{}.{}.tmp",
            entry.key,
            uuid::Uuid::now_v7().simple()
        ));

        if let Err(e) = tokio::fs::write(&tmp_path, &payload).await {
            self.discard(&tmp_path).await;
            return Err(io_error(&tmp_path, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            self.discard(&tmp_path).await;
            return Err(io_error(&final_path, e));
        }

        // A key never keeps both variants
        self.discard(&self.path_for(&entry.key, !compressed)).await;

        Ok(DiskWrite {
            bytes: payload.len() as u64,
            compressed,
        })
    }

    /// Remove a key's file(s). Returns true if anything was deleted.
    pub async fn remove(&self, key: &CacheKey) -> Result<bool, DiskError> {
        if !self.enabled {
            return Ok(false);
        }

        let mut removed = false;
        for compressed in [true, false] {
            let path = self.path_for(key, compressed);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, e)),
            }
        }
        Ok(removed)
    }

    /// Remove every entry file (and leftover temp file) this tier owns.
    pub async fn clear(&self) -> Result<u64, DiskError> {
        if !self.enabled {
            return Ok(0);
        }

        let mut removed = 0u64;
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        while let Some(item) = dir.next_entry().await.map_err(|e| io_error(&self.dir, e))? {
            let name = item.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if CacheKey::parse_file_name(name).is_none() && !is_temp_file(name) {
                continue;
            }
            let path = item.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, e)),
            }
        }
        Ok(removed)
    }

    /// List entry files with their sizes and modification times.
    pub async fn list(&self) -> Result<Vec<DiskFile>, DiskError> {
        if !self.enabled {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        while let Some(item) = dir.next_entry().await.map_err(|e| io_error(&self.dir, e))? {
            let name = item.file_name();
            let Some((key, compressed)) = name.to_str().and_then(CacheKey::parse_file_name) else {
                continue;
            };
            let path = item.path();
            let meta = match item.metadata().await {
                Ok(meta) => meta,
                // Deleted between listing and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&path, e)),
            };
            files.push(DiskFile {
                key,
                path,
                compressed,
                bytes: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(files)
    }

    pub async fn usage(&self) -> Result<DiskUsage, DiskError> {
        let files = self.list().await?;
        Ok(DiskUsage {
            files: files.len() as u64,
            bytes: files.iter().map(|f| f.bytes).sum(),
        })
    }

    /// Delete oldest entries until total size is within `max_bytes`.
    ///
    /// Returns the evicted keys, oldest first.
    pub async fn enforce_budget(&self, max_bytes: u64) -> Result<Vec<CacheKey>, DiskError> {
        let mut files = self.list().await?;
        let mut total: u64 = files.iter().map(|f| f.bytes).sum();
        if total <= max_bytes {
            return Ok(Vec::new());
        }

        files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.key.cmp(&b.key)));

        let mut evicted = Vec::new();
        for file in files {
            if total <= max_bytes {
                break;
            }
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&file.path, e)),
            }
            total = total.saturating_sub(file.bytes);
            evicted.push(file.key);
        }
        Ok(evicted)
    }

    /// Delete every entry whose embedded TTL has expired at `now`.
    ///
    /// Malformed envelopes are deleted too. Returns the purged keys.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<CacheKey>, DiskError> {
        let mut purged = Vec::new();
        for file in self.list().await? {
            let raw = match tokio::fs::read(&file.path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&file.path, e)),
            };
            let expired = match decode_envelope(&raw, file.compressed, &file.key) {
                Ok(envelope) => envelope.is_expired_at(now),
                Err(reason) => {
                    tracing::warn!(
                        path = %file.path.display(),
                        reason = %reason,
                        "Purging corrupt cache envelope"
                    );
                    true
                }
            };
            if expired {
                self.discard(&file.path).await;
                purged.push(file.key);
            }
        }
        Ok(purged)
    }

    /// Best-effort delete; the file may already be gone.
    async fn discard(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete cache file");
            }
        }
    }
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

fn io_error(path: &Path, e: std::io::Error) -> DiskError {
    DiskError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Decode and sanity-check an envelope. Errors are corruption reasons.
fn decode_envelope(raw: &[u8], compressed: bool, key: &CacheKey) -> Result<DiskEnvelope, String> {
    let bytes = if compressed {
        gunzip(raw).map_err(|e| format!("gzip decode failed: {}", e))?
    } else {
        raw.to_vec()
    };
    let envelope: DiskEnvelope =
        serde_json::from_slice(&bytes).map_err(|e| format!("invalid envelope: {}", e))?;
    if generate_key(&envelope.source) != *key {
        return Err(format!(
            "envelope source {:?} does not match key {}",
            envelope.source,
            key.short()
        ));
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    fn entry(source: &str, data: Value) -> CacheEntry {
        CacheEntry::new(
            generate_key(source),
            source,
            Arc::new(data),
            Duration::from_secs(60),
            Some("\"v1\"".to_string()),
        )
    }

    fn big_document() -> Value {
        let paths: serde_json::Map<String, Value> = (0..200)
            .map(|i| (format!("/pets/{}", i), json!({"get": {"operationId": format!("getPet{}", i)}})))
            .collect();
        json!({"openapi": "3.0.0", "paths": paths})
    }

    #[tokio::test]
    async fn test_set_then_get_plain() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), u64::MAX);
        let entry = entry("https://api.x/spec.json", json!({"openapi": "3.0.0"}));

        let write = tier.set(&entry).await.unwrap();
        assert!(!write.compressed);
        assert!(dir.path().join(entry.key.file_name(false)).exists());

        let read = tier.get(&entry.key).await.unwrap().unwrap();
        assert_eq!(read.data, entry.data);
        assert_eq!(read.source, entry.source);
        assert_eq!(read.etag, entry.etag);
        assert_eq!(read.ttl, entry.ttl);
        assert_eq!(read.size_bytes, entry.size_bytes);
        assert_eq!(
            read.created_at.timestamp_millis(),
            entry.created_at.timestamp_millis()
        );
        assert!(!read.compressed);
    }

    #[tokio::test]
    async fn test_compresses_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), 1024);
        let entry = entry("big.json", big_document());

        let write = tier.set(&entry).await.unwrap();
        assert!(write.compressed);
        assert!(dir.path().join(entry.key.file_name(true)).exists());
        assert!(!dir.path().join(entry.key.file_name(false)).exists());

        let read = tier.get(&entry.key).await.unwrap().unwrap();
        assert!(read.compressed);
        assert_eq!(read.data, entry.data);
    }

    #[tokio::test]
    async fn test_rewrite_drops_other_variant() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), 1024);
        let source = "spec.json";

        tier.set(&entry(source, big_document())).await.unwrap();
        tier.set(&entry(source, json!({"small": true}))).await.unwrap();

        let key = generate_key(source);
        assert!(!dir.path().join(key.file_name(true)).exists());
        assert!(dir.path().join(key.file_name(false)).exists());
        assert_eq!(tier.usage().await.unwrap().files, 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), 1024);
        assert_eq!(tier.get(&generate_key("nope.json")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), u64::MAX);
        let mut entry = entry("old.json", json!({}));
        entry.created_at = Utc::now() - TimeDelta::seconds(120);

        tier.set(&entry).await.unwrap();
        assert_eq!(tier.get(&entry.key).await.unwrap(), None);
        assert!(!dir.path().join(entry.key.file_name(false)).exists());
    }

    #[tokio::test]
    async fn test_corrupt_envelope_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), u64::MAX);
        let key = generate_key("broken.json");
        let path = dir.path().join(key.file_name(false));
        std::fs::write(&path, b"{ definitely not an envelope").unwrap();

        let err = tier.get(&key).await.unwrap_err();
        assert!(matches!(err, DiskError::Corruption { .. }));
        assert!(!path.exists());
        assert_eq!(tier.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_envelope_for_other_source_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), u64::MAX);
        let written = entry("a.json", json!({}));
        tier.set(&written).await.unwrap();

        let other = generate_key("b.json");
        std::fs::rename(
            dir.path().join(written.key.file_name(false)),
            dir.path().join(other.file_name(false)),
        )
        .unwrap();

        assert!(matches!(
            tier.get(&other).await,
            Err(DiskError::Corruption { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), 1024);
        let a = entry("a.json", json!({}));
        let b = entry("b.json", big_document());
        tier.set(&a).await.unwrap();
        tier.set(&b).await.unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"keep me").unwrap();
        std::fs::write(dir.path().join(format!(".{}.123.tmp", a.key)), b"partial").unwrap();

        assert!(tier.remove(&a.key).await.unwrap());
        assert!(!tier.remove(&a.key).await.unwrap());

        assert_eq!(tier.clear().await.unwrap(), 2);
        assert_eq!(tier.usage().await.unwrap(), DiskUsage::default());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn test_enforce_budget_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), u64::MAX);

        let sources = ["first.json", "second.json", "third.json"];
        for source in sources {
            tier.set(&entry(source, json!({"name": source}))).await.unwrap();
            // Distinct mtimes on coarse-grained filesystems
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let usage = tier.usage().await.unwrap();
        let evicted = tier.enforce_budget(usage.bytes - 1).await.unwrap();

        assert_eq!(evicted, vec![generate_key("first.json")]);
        let after = tier.usage().await.unwrap();
        assert_eq!(after.files, 2);
        assert!(after.bytes < usage.bytes);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), u64::MAX);

        let mut old = entry("old.json", json!({}));
        old.created_at = Utc::now() - TimeDelta::seconds(600);
        tier.set(&old).await.unwrap();
        tier.set(&entry("new.json", json!({}))).await.unwrap();

        let purged = tier.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(purged, vec![old.key]);
        assert_eq!(tier.usage().await.unwrap().files, 1);
    }

    #[tokio::test]
    async fn test_disabled_tier_is_noop() {
        let tier = DiskTier::disabled();
        let entry = entry("a.json", json!({}));
        assert!(!tier.is_enabled());
        assert_eq!(tier.set(&entry).await.unwrap().bytes, 0);
        assert_eq!(tier.get(&entry.key).await.unwrap(), None);
        assert_eq!(tier.usage().await.unwrap(), DiskUsage::default());
    }

    #[tokio::test]
    async fn test_unwritable_dir_opens_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let tier = DiskTier::open(file.join("cache"), 1024);
        assert!(!tier.is_enabled());
    }
}
