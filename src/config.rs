//! Configuration for the cache and the CoinGecko client

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::cache::OverflowPolicy;

/// Default freshness window (5 minutes)
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(300);

/// Default spacing between upstream calls (1 second)
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(1000);

/// Public CoinGecko API root
pub const COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Configuration for [`RateLimitedCache`](crate::cache::RateLimitedCache)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long an entry is served without calling the upstream
    pub cache_duration: Duration,
    /// Minimum spacing between consecutive upstream calls
    pub request_delay: Duration,
    /// Let a miss join an in-flight task for the same key
    pub coalesce_in_flight: bool,
    /// Cap on queued tasks; `None` is unbounded
    pub max_queue_depth: Option<usize>,
    /// What happens when the capped queue is full
    pub overflow_policy: OverflowPolicy,
    /// Cap on stored entries (least recently used goes first); `None` is unbounded
    pub max_entries: Option<NonZeroUsize>,
    /// Skip tasks whose callers have all gone away
    pub skip_abandoned: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_duration: DEFAULT_CACHE_DURATION,
            request_delay: DEFAULT_REQUEST_DELAY,
            coalesce_in_flight: false,
            max_queue_depth: None,
            overflow_policy: OverflowPolicy::Reject,
            max_entries: None,
            skip_abandoned: false,
        }
    }
}

impl CacheConfig {
    pub fn with_cache_duration(mut self, cache_duration: Duration) -> Self {
        self.cache_duration = cache_duration;
        self
    }

    pub fn with_request_delay(mut self, request_delay: Duration) -> Self {
        self.request_delay = request_delay;
        self
    }

    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.coalesce_in_flight = enabled;
        self
    }

    /// Caps the queue and picks what happens on overflow
    pub fn with_queue_limit(mut self, depth: usize, policy: OverflowPolicy) -> Self {
        self.max_queue_depth = Some(depth);
        self.overflow_policy = policy;
        self
    }

    pub fn with_max_entries(mut self, max_entries: NonZeroUsize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_skip_abandoned(mut self, enabled: bool) -> Self {
        self.skip_abandoned = enabled;
        self
    }
}

/// Configuration for [`CoinGeckoClient`](crate::data::CoinGeckoClient)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API root, without a trailing slash
    pub base_url: String,
    /// Optional demo API key sent as `x-cg-demo-api-key`
    pub api_key: Option<String>,
    /// Quote currency, e.g. `usd`
    pub vs_currency: String,
    /// Per-request timeout enforced by the HTTP client
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: COINGECKO_BASE_URL.to_string(),
            api_key: None,
            vs_currency: "usd".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_vs_currency(mut self, vs_currency: impl Into<String>) -> Self {
        let vs_currency: String = vs_currency.into();
        self.vs_currency = vs_currency.to_lowercase();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.cache_duration, Duration::from_secs(300));
        assert_eq!(config.request_delay, Duration::from_secs(1));
        assert!(!config.coalesce_in_flight);
        assert!(config.max_queue_depth.is_none());
        assert!(config.max_entries.is_none());
        assert!(!config.skip_abandoned);
    }

    #[test]
    fn test_cache_config_builders() {
        let config = CacheConfig::default()
            .with_cache_duration(Duration::from_secs(60))
            .with_request_delay(Duration::from_millis(250))
            .with_coalescing(true)
            .with_queue_limit(16, OverflowPolicy::ShedOldest);
        assert_eq!(config.cache_duration, Duration::from_secs(60));
        assert_eq!(config.request_delay, Duration::from_millis(250));
        assert!(config.coalesce_in_flight);
        assert_eq!(config.max_queue_depth, Some(16));
        assert_eq!(config.overflow_policy, OverflowPolicy::ShedOldest);
    }

    #[test]
    fn test_client_config_normalizes_inputs() {
        let config = ClientConfig::default()
            .with_base_url("http://localhost:8080/")
            .with_api_key(Some("  ".to_string()))
            .with_vs_currency("EUR");
        assert_eq!(config.base_url, "http://localhost:8080");
        assert!(config.api_key.is_none());
        assert_eq!(config.vs_currency, "eur");
    }
}
