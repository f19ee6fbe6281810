//! CoinGecko API client
//!
//! Every endpoint goes through the shared `RateLimitedCache`: each method
//! derives a cache key from its parameters and hands the cache a closure that
//! performs exactly one HTTP GET. Typed results are decoded from the cached JSON.

use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::{CoinDetail, CoinMarket, PriceHistory, SimplePrices};
use crate::cache::{CacheError, FetchError, RateLimitedCache};
use crate::config::{CacheConfig, ClientConfig};

/// Header carrying a CoinGecko demo API key
const API_KEY_HEADER: &str = "x-cg-demo-api-key";

/// Largest page size `/coins/markets` accepts
pub const MAX_MARKETS_PAGE: u32 = 250;

/// Error bodies longer than this are cut before being stored in an error
const MAX_ERROR_BODY: usize = 512;

/// Errors that can occur when fetching market data
#[derive(Debug, Error)]
pub enum ClientError {
    /// The upstream call failed with nothing cached, or the queue refused it
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Cached JSON did not have the expected shape
    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Parameters were rejected before any request was made
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

/// Client for the CoinGecko v3 API
#[derive(Clone)]
pub struct CoinGeckoClient {
    http_client: Client,
    cache: RateLimitedCache<Value>,
    config: ClientConfig,
}

impl std::fmt::Debug for CoinGeckoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinGeckoClient")
            .field("base_url", &self.config.base_url)
            .field("vs_currency", &self.config.vs_currency)
            .field("cache", self.cache.config())
            .finish()
    }
}

impl CoinGeckoClient {
    /// Creates a client with its own cache
    pub fn new(config: ClientConfig, cache_config: CacheConfig) -> Result<Self, ClientError> {
        Self::with_cache(config, RateLimitedCache::new(cache_config))
    }

    /// Creates a client on top of an existing cache
    ///
    /// Every client sharing the cache also shares its queue, so they are
    /// rate limited together.
    pub fn with_cache(
        config: ClientConfig,
        cache: RateLimitedCache<Value>,
    ) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("coinwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self {
            http_client,
            cache,
            config,
        })
    }

    pub fn cache(&self) -> &RateLimitedCache<Value> {
        &self.cache
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetches the top `limit` coins by market cap
    ///
    /// # Arguments
    /// * `limit` - Number of coins, between 1 and [`MAX_MARKETS_PAGE`]
    pub async fn top_coins(&self, limit: u32) -> Result<Vec<CoinMarket>, ClientError> {
        if limit == 0 || limit > MAX_MARKETS_PAGE {
            return Err(ClientError::InvalidInput(format!(
                "limit must be between 1 and {}, got {}",
                MAX_MARKETS_PAGE, limit
            )));
        }
        let vs = &self.config.vs_currency;
        let url = format!(
            "{}/coins/markets?vs_currency={}&order=market_cap_desc&per_page={}&page=1&sparkline=false",
            self.config.base_url, vs, limit
        );
        let value = self
            .get_json::<Vec<CoinMarket>>(markets_key(vs, limit), url)
            .await?;
        decode(value, "coin markets")
    }

    /// Fetches the detail view of one coin
    pub async fn coin_details(&self, id: &str) -> Result<CoinDetail, ClientError> {
        let id = validate_id(id)?;
        let url = format!(
            "{}/coins/{}?localization=false&tickers=false&market_data=true&community_data=false&developer_data=false&sparkline=false",
            self.config.base_url, id
        );
        let value = self.get_json::<CoinDetail>(coin_key(&id), url).await?;
        decode(value, "coin detail")
    }

    /// Fetches `days` of price history for one coin
    pub async fn price_history(&self, id: &str, days: u32) -> Result<PriceHistory, ClientError> {
        let id = validate_id(id)?;
        if days == 0 {
            return Err(ClientError::InvalidInput("days must be at least 1".to_string()));
        }
        let vs = &self.config.vs_currency;
        let url = format!(
            "{}/coins/{}/market_chart?vs_currency={}&days={}",
            self.config.base_url, id, vs, days
        );
        let value = self
            .get_json::<PriceHistory>(history_key(&id, vs, days), url)
            .await?;
        decode(value, "price history")
    }

    /// Fetches current prices for several coins in one call
    pub async fn simple_prices(&self, ids: &[String]) -> Result<SimplePrices, ClientError> {
        let mut ids = ids
            .iter()
            .map(|id| validate_id(id))
            .collect::<Result<Vec<_>, _>>()?;
        if ids.is_empty() {
            return Err(ClientError::InvalidInput("at least one coin id is required".to_string()));
        }
        ids.sort();
        ids.dedup();
        let joined = ids.join(",");
        let vs = &self.config.vs_currency;
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies={}",
            self.config.base_url, joined, vs
        );
        let value = self
            .get_json::<SimplePrices>(prices_key(vs, &joined), url)
            .await?;
        decode(value, "simple prices")
    }

    /// Fetches `url` through the cache, checking the body decodes as `R`
    ///
    /// A body with the wrong shape fails the fetch with [`FetchError::Decode`],
    /// so it never replaces a good entry and the cache falls back instead.
    async fn get_json<R: DeserializeOwned + 'static>(
        &self,
        key: String,
        url: String,
    ) -> Result<Value, CacheError> {
        let client = self.http_client.clone();
        let api_key = self.config.api_key.clone();
        self.cache
            .get_cached_data(key, move || async move {
                let value = fetch_json(client, url, api_key).await?;
                serde_json::from_value::<R>(value.clone())?;
                Ok::<_, FetchError>(value)
            })
            .await
    }

    /// How long ago the cached markets listing was stored
    pub fn top_coins_age(&self, limit: u32) -> Option<Duration> {
        self.cache.age_of(&markets_key(&self.config.vs_currency, limit))
    }
}

/// Performs one GET and parses the body as JSON
///
/// Non-success statuses become [`FetchError::Status`] so the cache can tell a
/// 429 apart from other failures.
async fn fetch_json(
    client: Client,
    url: String,
    api_key: Option<String>,
) -> Result<Value, FetchError> {
    debug!(url = %url, "GET");
    let mut request = client.get(&url).header(ACCEPT, "application/json");
    if let Some(api_key) = api_key {
        request = request.header(API_KEY_HEADER, api_key);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let mut body = response.text().await.unwrap_or_default();
        truncate_at_char_boundary(&mut body, MAX_ERROR_BODY);
        return Err(FetchError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

fn decode<T: DeserializeOwned>(value: Value, what: &'static str) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|source| ClientError::Decode { what, source })
}

/// Normalizes a coin id and rejects anything that is not a CoinGecko slug
fn validate_id(id: &str) -> Result<String, ClientError> {
    let id = id.trim().to_lowercase();
    if id.is_empty() {
        return Err(ClientError::InvalidInput("coin id must not be empty".to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ClientError::InvalidInput(format!("invalid coin id: '{}'", id)));
    }
    Ok(id)
}

fn markets_key(vs: &str, limit: u32) -> String {
    format!("markets:{}:{}", vs, limit)
}

fn coin_key(id: &str) -> String {
    format!("coin:{}", id)
}

fn history_key(id: &str, vs: &str, days: u32) -> String {
    format!("history:{}:{}:{}", id, vs, days)
}

fn prices_key(vs: &str, joined_ids: &str) -> String {
    format!("price:{}:{}", vs, joined_ids)
}
