//! Market data models for coinwatch
//!
//! This module contains the types decoded from CoinGecko responses and the
//! client that fetches them through the rate-limited cache.

pub mod coingecko;

pub use coingecko::{ClientError, CoinGeckoClient};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of the `/coins/markets` listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinMarket {
    /// CoinGecko id, e.g. `bitcoin`
    pub id: String,
    /// Ticker symbol, e.g. `btc`
    pub symbol: String,
    /// Display name
    pub name: String,
    /// Price in the quote currency
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub total_volume: Option<f64>,
    /// Percentage change over the last 24 hours
    pub price_change_percentage_24h: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Detail view of a single coin from `/coins/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinDetail {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub description: Localized,
    #[serde(default)]
    pub links: CoinLinks,
    #[serde(default)]
    pub market_data: Option<MarketData>,
}

impl CoinDetail {
    /// English description, if CoinGecko has one
    pub fn description_en(&self) -> Option<&str> {
        self.description.en.as_deref().filter(|d| !d.is_empty())
    }

    /// First non-empty homepage link
    pub fn homepage(&self) -> Option<&str> {
        self.links
            .homepage
            .iter()
            .map(String::as_str)
            .find(|link| !link.is_empty())
    }

    /// Current price in `vs_currency`
    pub fn price_in(&self, vs_currency: &str) -> Option<f64> {
        self.market_data
            .as_ref()
            .and_then(|m| m.current_price.get(vs_currency).copied())
    }
}

/// Localized text; only English is kept
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Localized {
    #[serde(default)]
    pub en: Option<String>,
}

/// Links block of a coin detail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoinLinks {
    #[serde(default)]
    pub homepage: Vec<String>,
}

/// Market data block of a coin detail, keyed by quote currency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    #[serde(default)]
    pub current_price: BTreeMap<String, f64>,
    #[serde(default)]
    pub market_cap: BTreeMap<String, f64>,
    #[serde(default)]
    pub total_volume: BTreeMap<String, f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
}

/// A `[timestamp_ms, value]` pair as returned by `/market_chart`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint(pub f64, pub f64);

impl PricePoint {
    /// Time of the sample
    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0 as i64).single()
    }

    pub fn value(&self) -> f64 {
        self.1
    }
}

/// Price history from `/coins/{id}/market_chart`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    #[serde(default)]
    pub prices: Vec<PricePoint>,
    #[serde(default)]
    pub market_caps: Vec<PricePoint>,
    #[serde(default)]
    pub total_volumes: Vec<PricePoint>,
}

impl PriceHistory {
    /// Lowest and highest price in the series
    pub fn price_range(&self) -> Option<(f64, f64)> {
        let mut values = self.prices.iter().map(PricePoint::value);
        let first = values.next()?;
        Some(values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }

    /// Percentage change from the first to the last price
    pub fn change_percentage(&self) -> Option<f64> {
        let first = self.prices.first()?.value();
        let last = self.prices.last()?.value();
        if first == 0.0 {
            return None;
        }
        Some((last - first) / first * 100.0)
    }
}

/// `/simple/price` response: coin id → quote currency → price
pub type SimplePrices = BTreeMap<String, BTreeMap<String, f64>>;
