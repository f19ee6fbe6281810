//! Rate-limited, stale-serving cache in front of an upstream API
//!
//! Provides a `RateLimitedCache` that answers fresh keys from memory and funnels
//! every other lookup through a single FIFO worker, so the upstream never sees
//! more than one call at a time and never two calls closer than the configured
//! delay. When a call fails the last good value for the key is served instead.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use lru::LruCache;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::entry::{CacheEntry, CacheStats};
use super::error::{CacheError, FetchError};
use super::queue::{self, Fetcher, OverflowPolicy, QueueTask, Waiter};
use super::snapshot::SnapshotEntry;
use crate::config::CacheConfig;

/// Single choke point for calls to a rate-limited upstream
///
/// Cloning is cheap and every clone shares the same map, queue and worker, so
/// construct one at startup and hand clones to whoever needs upstream data.
///
/// Lookups go through [`get_cached_data`](Self::get_cached_data):
/// - a fresh entry is returned immediately without queueing
/// - anything else is queued and fetched by the single worker
/// - if the fetch fails, the last stored value for the key is returned; a 429
///   additionally restarts the entry's freshness window
/// - only a failure with nothing stored for the key reaches the caller
pub struct RateLimitedCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RateLimitedCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    config: CacheConfig,
    state: Mutex<State<T>>,
    /// Set while a worker is draining the queue
    processing: AtomicBool,
}

struct State<T> {
    entries: LruCache<String, CacheEntry<T>>,
    queue: VecDeque<QueueTask<T>>,
    /// Key and waiters of the task the worker has popped but not settled
    executing: Option<(String, Vec<Waiter<T>>)>,
    /// When the previous upstream call finished
    last_call: Option<Instant>,
    stats: CacheStats,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the processing flag even if the worker future is dropped mid-drain
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: Clone + Send + 'static> Default for RateLimitedCache<T> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<T: Clone + Send + 'static> RateLimitedCache<T> {
    /// Creates an empty cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        let entries = match config.max_entries {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    entries,
                    queue: VecDeque::new(),
                    executing: None,
                    last_call: None,
                    stats: CacheStats::default(),
                }),
                processing: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns the value for `key`, fetching it through the queue when needed
    ///
    /// # Arguments
    /// * `key` - Identity of the logical request (e.g. endpoint plus parameters)
    /// * `fetcher` - Performs exactly one upstream call; only run on a miss
    ///
    /// # Returns
    /// * `Ok(T)` - Fresh data, newly fetched data, or a fallback to stored data
    /// * `Err(CacheError)` - The fetch failed with nothing stored for `key`, or
    ///   the capped queue refused or shed the call
    pub async fn get_cached_data<F, Fut>(
        &self,
        key: impl Into<String>,
        fetcher: F,
    ) -> Result<T, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let key = key.into();
        let rx = match self.lookup_or_enqueue(key, Box::new(move || fetcher().boxed())) {
            Lookup::Hit(data) => return Ok(data),
            Lookup::Refused(err) => return Err(err),
            Lookup::Queued(rx) => rx,
            Lookup::Joined(rx) => rx,
        };

        self.spawn_worker();
        rx.await.unwrap_or(Err(CacheError::WorkerGone))
    }

    fn lookup_or_enqueue(&self, key: String, fetcher: Fetcher<T>) -> Lookup<T> {
        let config = &self.inner.config;
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        if let Some(entry) = state.entries.get(&key) {
            if entry.is_fresh(Instant::now(), config.cache_duration) {
                state.stats.hits += 1;
                trace!(key = %key, "Cache hit");
                return Lookup::Hit(entry.data.clone());
            }
        }
        state.stats.misses += 1;

        let (tx, rx) = oneshot::channel();

        if config.coalesce_in_flight {
            if let Some(waiters) = state.in_flight_waiters(&key) {
                waiters.push(tx);
                state.stats.coalesced += 1;
                debug!(key = %key, "Joined in-flight request");
                return Lookup::Joined(rx);
            }
        }

        if let Some(max_depth) = config.max_queue_depth {
            if state.queue.len() >= max_depth {
                match config.overflow_policy {
                    OverflowPolicy::Reject => {
                        state.stats.rejected += 1;
                        warn!(
                            key = %key,
                            depth = state.queue.len(),
                            "Request queue full, rejecting"
                        );
                        return Lookup::Refused(CacheError::QueueFull {
                            depth: state.queue.len(),
                        });
                    }
                    OverflowPolicy::ShedOldest => {
                        if let Some(shed) = state.queue.pop_front() {
                            state.stats.shed += 1;
                            warn!(key = %shed.key, "Request queue full, shedding oldest task");
                            let outcome = state
                                .entries
                                .peek(&shed.key)
                                .map(|entry| entry.data.clone())
                                .ok_or(CacheError::Shed);
                            queue::settle(shed.waiters, outcome);
                        }
                    }
                }
            }
        }

        debug!(key = %key, depth = state.queue.len() + 1, "Cache miss, queueing fetch");
        state.queue.push_back(QueueTask::new(key, fetcher, tx));
        state.stats.queue_depth = state.queue.len();
        Lookup::Queued(rx)
    }

    fn spawn_worker(&self) {
        if self.inner.processing.load(Ordering::Acquire) {
            return;
        }
        let cache = self.clone();
        tokio::spawn(async move { cache.process_queue().await });
    }

    /// Drains the queue one task at a time
    ///
    /// Only one invocation runs at a time: calling this while a worker is
    /// already draining returns immediately without touching the queue.
    pub async fn process_queue(&self) {
        loop {
            if self
                .inner
                .processing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                trace!("Worker already running");
                return;
            }

            {
                let _guard = ProcessingGuard(&self.inner.processing);
                self.drain().await;
            }

            // A task pushed between the final pop and the flag reset has no worker yet.
            if self.inner.lock().queue.is_empty() {
                return;
            }
        }
    }

    async fn drain(&self) {
        let delay = self.inner.config.request_delay;

        loop {
            let (key, fetcher, not_before) = {
                let mut guard = self.inner.lock();
                let state = &mut *guard;
                let Some(task) = state.queue.pop_front() else {
                    state.stats.queue_depth = 0;
                    return;
                };
                state.stats.queue_depth = state.queue.len();
                state.executing = Some((task.key.clone(), task.waiters));
                (task.key, task.fetcher, state.last_call.map(|t| t + delay))
            };

            if let Some(not_before) = not_before {
                tokio::time::sleep_until(not_before).await;
            }

            if self.inner.config.skip_abandoned && self.take_if_abandoned() {
                debug!(key = %key, "Every caller went away, skipping fetch");
                continue;
            }

            info!(key = %key, "Calling upstream");
            // The closure runs inside the spawned task so a panic while building
            // the future is contained along with one raised while polling it.
            let result = match tokio::spawn(async move { fetcher().await }).await {
                Ok(result) => result,
                Err(e) => Err(FetchError::Other(format!("Fetcher did not complete: {e}"))),
            };

            let (waiters, outcome) = {
                let mut guard = self.inner.lock();
                let state = &mut *guard;
                state.stats.fetches += 1;
                state.last_call = Some(Instant::now());
                let outcome = match result {
                    Ok(data) => {
                        state.store(key, data.clone());
                        Ok(data)
                    }
                    Err(err) => state.fallback(&key, err),
                };
                let waiters = state.executing.take().map(|(_, w)| w).unwrap_or_default();
                (waiters, outcome)
            };
            queue::settle(waiters, outcome);
        }
    }

    fn take_if_abandoned(&self) -> bool {
        let mut state = self.inner.lock();
        let abandoned = state
            .executing
            .as_ref()
            .is_some_and(|(_, waiters)| queue::all_closed(waiters));
        if abandoned {
            state.executing = None;
            state.stats.abandoned += 1;
        }
        abandoned
    }

    /// Returns the stored value for `key` whether fresh or stale
    pub fn peek(&self, key: &str) -> Option<T> {
        self.inner.lock().entries.peek(key).map(|e| e.data.clone())
    }

    /// Returns how long ago the entry for `key` was stored or refreshed
    pub fn age_of(&self, key: &str) -> Option<Duration> {
        self.inner
            .lock()
            .entries
            .peek(key)
            .map(|e| e.age(Instant::now()))
    }

    /// Stores `data` as if it had been fetched `age` ago
    pub fn seed(&self, key: impl Into<String>, data: T, age: Duration) {
        let mut state = self.inner.lock();
        state.entries.push(key.into(), CacheEntry::aged(data, age));
        state.stats.entries = state.entries.len();
    }

    /// Seeds the cache from persisted entries, skipping those older than `max_age`
    ///
    /// # Returns
    /// The number of entries restored
    pub fn restore(&self, entries: Vec<SnapshotEntry<T>>, max_age: Option<Duration>) -> usize {
        let now = chrono::Utc::now();
        let mut restored = 0;
        for entry in entries {
            let age = (now - entry.cached_at).to_std().unwrap_or(Duration::ZERO);
            if max_age.is_some_and(|max| age > max) {
                trace!(key = %entry.key, "Skipping expired snapshot entry");
                continue;
            }
            self.seed(entry.key, entry.data, age);
            restored += 1;
        }
        restored
    }

    /// Copies every stored entry, most recently used first
    pub fn snapshot_entries(&self) -> Vec<SnapshotEntry<T>> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(key, entry)| SnapshotEntry {
                key: key.clone(),
                data: entry.data.clone(),
                cached_at: entry.cached_at,
            })
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock();
        CacheStats {
            queue_depth: state.queue.len(),
            entries: state.entries.len(),
            ..state.stats
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

enum Lookup<T> {
    Hit(T),
    Queued(oneshot::Receiver<Result<T, CacheError>>),
    Joined(oneshot::Receiver<Result<T, CacheError>>),
    Refused(CacheError),
}

impl<T: Clone> State<T> {
    fn in_flight_waiters(&mut self, key: &str) -> Option<&mut Vec<Waiter<T>>> {
        if let Some((executing, waiters)) = self.executing.as_mut() {
            if executing.as_str() == key {
                return Some(waiters);
            }
        }
        queue::find_queued(&mut self.queue, key).map(|task| &mut task.waiters)
    }

    fn store(&mut self, key: String, data: T) {
        if let Some((evicted, _)) = self.entries.push(key.clone(), CacheEntry::new(data)) {
            if evicted != key {
                debug!(key = %evicted, "Evicted least recently used entry");
            }
        }
        self.stats.entries = self.entries.len();
    }

    fn fallback(&mut self, key: &str, err: FetchError) -> Result<T, CacheError> {
        match self.entries.get_mut(key) {
            Some(entry) if err.is_rate_limited() => {
                entry.touch();
                self.stats.rate_limited_fallbacks += 1;
                warn!(key = %key, "Upstream rate limited, serving cached data");
                Ok(entry.data.clone())
            }
            Some(entry) => {
                self.stats.stale_fallbacks += 1;
                warn!(key = %key, error = %err, "Upstream failed, serving stale data");
                Ok(entry.data.clone())
            }
            None => {
                self.stats.failures += 1;
                warn!(key = %key, error = %err, "Upstream failed with nothing cached");
                Err(CacheError::from(err))
            }
        }
    }
}
