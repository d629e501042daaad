//! Effective TTL resolution.

/// Lowest TTL any request can obtain, in seconds.
pub const MIN_TTL_SECS: u64 = 8;

/// Floors client-requested TTLs.
///
/// ```rust
/// # use heimdall::cache::TtlPolicy;
/// let policy = TtlPolicy::default();
/// assert_eq!(policy.effective(None), 8);
/// assert_eq!(policy.effective(Some("3")), 8);
/// assert_eq!(policy.effective(Some("50")), 50);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Floor applied to every request. Default: 8.
    pub min_ttl: u64,
    /// TTL for requests without a usable `X-Cache-TTL`. Default: the floor.
    pub default_ttl: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            min_ttl: MIN_TTL_SECS,
            default_ttl: MIN_TTL_SECS,
        }
    }
}

impl TtlPolicy {
    pub fn new(min_ttl: u64, default_ttl: u64) -> Self {
        Self {
            min_ttl,
            default_ttl,
        }
    }

    /// Resolve the TTL for a request given its raw `X-Cache-TTL` value.
    ///
    /// Never returns less than `min_ttl`. Values that don't parse as an
    /// integer (including negative ones) fall back to `default_ttl`.
    pub fn effective(&self, header: Option<&str>) -> u64 {
        match header.and_then(|h| h.trim().parse::<u64>().ok()) {
            Some(requested) => requested.max(self.min_ttl),
            None => self.default_ttl.max(self.min_ttl),
        }
    }
}
