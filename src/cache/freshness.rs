//! Freshness of stored entries.

use super::CacheEntry;

/// Outcome of judging a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve it. `age` in whole seconds.
    Hit { age: u64 },
    /// Treat as absent. The next successful fetch overwrites it.
    Expired { age: u64 },
}

impl Freshness {
    pub fn is_hit(self) -> bool {
        matches!(self, Freshness::Hit { .. })
    }

    pub fn age(self) -> u64 {
        match self {
            Freshness::Hit { age } | Freshness::Expired { age } => age,
        }
    }
}

/// Judge `entry` at wall-clock time `now_ms`.
///
/// The entry's own TTL is authoritative; `effective_ttl` only applies when
/// the entry recorded none (or zero). An entry is expired once its age in
/// whole seconds is strictly greater than its TTL.
pub fn evaluate(entry: &CacheEntry, effective_ttl: u64, now_ms: u64) -> Freshness {
    let age = now_ms.saturating_sub(entry.stored_at_ms) / 1000;
    let ttl = match entry.ttl_secs {
        Some(ttl) if ttl > 0 => ttl,
        _ => effective_ttl,
    };
    if age > ttl {
        Freshness::Expired { age }
    } else {
        Freshness::Hit { age }
    }
}
