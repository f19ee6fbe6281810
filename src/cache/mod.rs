//! Rate-limited cache for upstream API responses
//!
//! This module provides `RateLimitedCache`, which serializes every call to a
//! rate-limited upstream through one FIFO worker with a minimum delay between
//! calls, and answers from stored data whenever it is fresh or the upstream
//! fails. Snapshots let the stored data outlive the process.

mod entry;
mod error;
mod manager;
mod queue;
mod snapshot;

pub use entry::{CacheEntry, CacheStats};
pub use error::{CacheError, FetchError, RATE_LIMIT_STATUS};
pub use manager::RateLimitedCache;
pub use queue::OverflowPolicy;
pub use snapshot::{Snapshot, SnapshotEntry, SnapshotStore};
