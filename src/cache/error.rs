//! Error types for upstream fetches and cache lookups

use std::sync::Arc;

use thiserror::Error;

/// HTTP status the upstream uses to signal throttling
pub const RATE_LIMIT_STATUS: u16 = 429;

/// Errors a fetcher can fail with
///
/// The cache only looks at one thing: whether the failure carries an
/// HTTP-like status of 429. Everything else is treated as a transient error.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Upstream answered with a non-success status
    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// HTTP request failed before a usable response arrived
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("Failed to parse JSON response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Any other failure raised by a fetcher
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Builds a status error, mostly useful for fetchers that are not HTTP based
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        FetchError::Status {
            status,
            body: body.into(),
        }
    }

    /// Returns the HTTP-like status carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Http(e) => e.status().map(|s| s.as_u16()),
            FetchError::Decode(_) | FetchError::Other(_) => None,
        }
    }

    /// Whether the upstream signalled throttling
    pub fn is_rate_limited(&self) -> bool {
        self.status_code() == Some(RATE_LIMIT_STATUS)
    }
}

/// Errors returned by [`RateLimitedCache::get_cached_data`](super::RateLimitedCache::get_cached_data)
///
/// Cloneable so a single outcome can be delivered to every coalesced waiter.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The fetcher failed and there was nothing cached to fall back to
    #[error("Upstream fetch failed: {0}")]
    Fetch(Arc<FetchError>),

    /// The queue is at its configured depth and the overflow policy rejects
    #[error("Request queue is full ({depth} pending)")]
    QueueFull { depth: usize },

    /// The task was dropped to make room for newer ones
    #[error("Request was shed from a full queue")]
    Shed,

    /// The worker went away before answering
    #[error("Cache worker stopped before the request completed")]
    WorkerGone,
}

impl CacheError {
    /// Returns the fetch error behind this failure, if there is one
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            CacheError::Fetch(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the HTTP-like status of the underlying fetch error
    pub fn status_code(&self) -> Option<u16> {
        self.fetch_error().and_then(FetchError::status_code)
    }

    /// Whether the underlying fetch failed because of throttling
    pub fn is_rate_limited(&self) -> bool {
        self.fetch_error().is_some_and(FetchError::is_rate_limited)
    }
}

impl From<FetchError> for CacheError {
    fn from(e: FetchError) -> Self {
        CacheError::Fetch(Arc::new(e))
    }
}
