//! Pending upstream calls
//!
//! Every cache miss becomes a [`QueueTask`] holding the caller's fetcher and
//! the oneshot senders that will carry the outcome back. Tasks are serviced
//! strictly in arrival order regardless of key.

use std::collections::VecDeque;
use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::error::{CacheError, FetchError};

/// A boxed zero-argument upstream call
pub type Fetcher<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, FetchError>> + Send>;

/// The continuation of one waiting caller
pub type Waiter<T> = oneshot::Sender<Result<T, CacheError>>;

/// What to do when a capped queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the new call with [`CacheError::QueueFull`]
    #[default]
    Reject,
    /// Drop the oldest queued task to make room
    ShedOldest,
}

/// One pending upstream call and everyone waiting on it
pub struct QueueTask<T> {
    /// Cache key the result is stored under
    pub key: String,
    /// The upstream call
    pub fetcher: Fetcher<T>,
    /// Callers to notify once the call settles
    pub waiters: Vec<Waiter<T>>,
}

impl<T> QueueTask<T> {
    pub fn new(key: String, fetcher: Fetcher<T>, waiter: Waiter<T>) -> Self {
        Self {
            key,
            fetcher,
            waiters: vec![waiter],
        }
    }
}

impl<T> fmt::Debug for QueueTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueTask")
            .field("key", &self.key)
            .field("waiters", &self.waiters.len())
            .finish_non_exhaustive()
    }
}

/// Sends the same outcome to every waiter
///
/// Receivers that were dropped are skipped silently.
pub fn settle<T: Clone>(waiters: Vec<Waiter<T>>, outcome: Result<T, CacheError>) {
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

/// True when every caller has dropped its receiver
pub fn all_closed<T>(waiters: &[Waiter<T>]) -> bool {
    waiters.iter().all(|w| w.is_closed())
}

/// Finds a queued task for `key` so another caller can join it
pub fn find_queued<'a, T>(
    queue: &'a mut VecDeque<QueueTask<T>>,
    key: &str,
) -> Option<&'a mut QueueTask<T>> {
    queue.iter_mut().find(|task| task.key == key)
}
