//! Cache entries and counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// A stored `(data, timestamp)` pair
///
/// `fetched_at` drives freshness and uses the tokio clock so it follows a
/// paused runtime in tests. `cached_at` is the wall-clock time of the same
/// write and is what snapshots persist.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The last successfully fetched value
    pub data: T,
    /// When the data was stored (or last refreshed by a rate-limit fallback)
    pub fetched_at: Instant,
    /// Wall-clock counterpart of `fetched_at`
    pub cached_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// Creates an entry stamped with the current time
    pub fn new(data: T) -> Self {
        Self {
            data,
            fetched_at: Instant::now(),
            cached_at: Utc::now(),
        }
    }

    /// Creates an entry that was stored `age` ago
    pub fn aged(data: T, age: Duration) -> Self {
        let now = Instant::now();
        let fetched_at = now.checked_sub(age).unwrap_or(now);
        let cached_at = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or_else(Utc::now);
        Self {
            data,
            fetched_at,
            cached_at,
        }
    }

    /// Time elapsed since the entry was stored
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }

    /// Whether the entry is younger than `cache_duration`
    pub fn is_fresh(&self, now: Instant, cache_duration: Duration) -> bool {
        self.age(now) < cache_duration
    }

    /// Moves both timestamps to now, keeping the data
    pub fn touch(&mut self) {
        self.fetched_at = Instant::now();
        self.cached_at = Utc::now();
    }
}

/// Counters describing how the cache has been answering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered from a fresh entry
    pub hits: u64,
    /// Lookups that had to go through the queue
    pub misses: u64,
    /// Fetchers actually executed
    pub fetches: u64,
    /// Throttled fetches answered from cache with a refreshed timestamp
    pub rate_limited_fallbacks: u64,
    /// Failed fetches answered from a stale entry
    pub stale_fallbacks: u64,
    /// Failed fetches surfaced to callers
    pub failures: u64,
    /// Callers attached to an already queued task
    pub coalesced: u64,
    /// Tasks dropped by the shed-oldest policy
    pub shed: u64,
    /// Calls refused because the queue was full
    pub rejected: u64,
    /// Tasks skipped because every caller had gone away
    pub abandoned: u64,
    /// Tasks waiting in the queue right now
    pub queue_depth: usize,
    /// Entries stored right now
    pub entries: usize,
}
