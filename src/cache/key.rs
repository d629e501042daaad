//! Cache key derivation.
//!
//! A key is the request path with two digests appended:
//!
//! ```text
//! /v1/graphql/{sha256("ttl-" + ttl)}/{sha256(body)}
//! ```
//!
//! The TTL digest keeps requesters with different TTL preferences apart: a
//! client asking for 10s freshness never receives an object stored for a
//! client that accepts an hour. Caller identity is not part of the key; two
//! callers sending byte-identical bodies share an entry.

use std::fmt;

use crate::digest::digest;

/// Opaque identifier of a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
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

/// Derive the cache key for a request.
pub fn derive_key(path: &str, effective_ttl: u64, body: &[u8]) -> CacheKey {
    let ttl_digest = digest(format!("ttl-{effective_ttl}"));
    let body_digest = digest(body);
    CacheKey(format!(
        "{}/{ttl_digest}/{body_digest}",
        path.trim_end_matches('/')
    ))
}
