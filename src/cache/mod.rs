//! Response caching subsystem.
//!
//! - [`key`]: derives a [`CacheKey`] from (path, effective TTL, body).
//! - [`ttl`]: resolves the effective TTL of a request from `X-Cache-TTL`.
//! - [`freshness`]: judges a stored [`CacheEntry`] as hit or expired.
//! - [`store`]: the [`CacheStore`] capability and its in-memory
//!   implementation, [`MemoryStore`].
//!
//! Entries are never mutated. Storing under an existing key replaces the old
//! entry entirely. Expiry is logical: an entry past its TTL may still be
//! physically present (and is reported as `EXPIRED`), but it is never served.

pub mod freshness;
pub mod key;
pub mod store;
pub mod ttl;

pub use freshness::{Freshness, evaluate};
pub use key::{CacheKey, derive_key};
pub use store::{CacheStore, MemoryStore, StoreConfig};
pub use ttl::TtlPolicy;

use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};

/// A backend response captured for later replay.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Response body, verbatim.
    pub payload: Bytes,
    pub status: StatusCode,
    /// Backend response headers, hop-by-hop headers already removed.
    pub headers: HeaderMap,
    /// Wall-clock store time in milliseconds since the Unix epoch.
    pub stored_at_ms: u64,
    /// TTL in seconds fixed at store time. `None` for entries written by
    /// stores that don't record one; the requester's TTL applies then.
    pub ttl_secs: Option<u64>,
}

impl CacheEntry {
    /// Capture a response now, with the TTL it was requested under.
    pub fn new(payload: Bytes, status: StatusCode, headers: HeaderMap, ttl_secs: u64) -> Self {
        Self {
            payload,
            status,
            headers,
            stored_at_ms: now_millis(),
            ttl_secs: Some(ttl_secs),
        }
    }

    /// Override the store timestamp.
    pub fn stored_at(mut self, stored_at_ms: u64) -> Self {
        self.stored_at_ms = stored_at_ms;
        self
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// A clock set before 1970 reads as 0.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
