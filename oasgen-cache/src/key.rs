//! Cache key derivation.
//!
//! A `CacheKey` is the SHA-256 digest of a source identifier rendered as
//! lowercase hex. The same key names the memory tier slot and the on-disk
//! file stem, so it must be stable across process restarts.

use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a rendered key: 256-bit digest as hex.
pub const KEY_LEN: usize = 64;

/// Extension for uncompressed disk entries.
pub const PLAIN_EXTENSION: &str = ".cache";

/// Extension for gzip-compressed disk entries.
pub const COMPRESSED_EXTENSION: &str = ".cache.gz";

/// A fixed-length fingerprint of a spec source.
///
/// The inner string is private: keys can only come from [`generate_key`] or
/// from parsing a file name this crate wrote, so every key is 64 hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

/// Derive the cache key for a source identifier (URL or file path).
///
/// The source string is hashed verbatim; no normalization is applied, so
/// `./spec.json` and `spec.json` are distinct sources.
pub fn generate_key(source: &str) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    CacheKey(hex::encode(hasher.finalize()))
}

impl CacheKey {
    /// Get the key as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name used by the disk tier for this key.
    pub fn file_name(&self, compressed: bool) -> String {
        let ext = if compressed {
            COMPRESSED_EXTENSION
        } else {
            PLAIN_EXTENSION
        };
        format!("{}{}", self.0, ext)
    }

    /// Recover a key from a disk tier file name.
    ///
    /// Returns the key and whether the file is the compressed variant, or
    /// `None` for anything the disk tier did not write (temp files included).
    pub fn parse_file_name(name: &str) -> Option<(CacheKey, bool)> {
        let (stem, compressed) = if let Some(stem) = name.strip_suffix(COMPRESSED_EXTENSION) {
            (stem, true)
        } else if let Some(stem) = name.strip_suffix(PLAIN_EXTENSION) {
            (stem, false)
        } else {
            return None;
        };

        if stem.len() != KEY_LEN
            || !stem
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return None;
        }

        Some((CacheKey(stem.to_string()), compressed))
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_digest() {
        // sha256("") is a well-known constant
        let key = generate_key("");
        assert_eq!(
            key.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_key_is_fixed_length_hex() {
        let key = generate_key("https://api.x/spec.json");
        assert_eq!(key.as_str().len(), KEY_LEN);
        assert!(key.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(key.short().len(), 12);
    }

    #[test]
    fn test_file_name_round_trip() {
        let key = generate_key("./openapi.yaml");

        let plain = key.file_name(false);
        assert!(plain.ends_with(".cache"));
        assert_eq!(CacheKey::parse_file_name(&plain), Some((key.clone(), false)));

        let gz = key.file_name(true);
        assert!(gz.ends_with(".cache.gz"));
        assert_eq!(CacheKey::parse_file_name(&gz), Some((key, true)));
    }

    #[test]
    fn test_parse_file_name_rejects_foreign_files() {
        assert_eq!(CacheKey::parse_file_name("notes.txt"), None);
        assert_eq!(CacheKey::parse_file_name("abc.cache"), None);
        let upper = "A".repeat(KEY_LEN) + ".cache";
        assert_eq!(CacheKey::parse_file_name(&upper), None);
        let tmp = format!(".{}.0190.tmp", generate_key("x"));
        assert_eq!(CacheKey::parse_file_name(&tmp), None);
    }

    proptest! {
        #[test]
        fn prop_key_is_deterministic(source in ".*") {
            prop_assert_eq!(generate_key(&source), generate_key(&source));
        }

        #[test]
        fn prop_distinct_sources_distinct_keys(a in ".{0,64}", b in ".{0,64}") {
            prop_assume!(a != b);
            prop_assert_ne!(generate_key(&a), generate_key(&b));
        }
    }
}
