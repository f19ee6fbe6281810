//! Command-line interface parsing for coinwatch
//!
//! This module handles parsing of CLI arguments using clap and turning them
//! into the cache, client and refresh configuration the binary starts with.

use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use thiserror::Error;

use crate::config::{CacheConfig, ClientConfig, COINGECKO_BASE_URL};
use crate::data::coingecko::MAX_MARKETS_PAGE;
use crate::refresh::RefreshConfig;

/// Error types for CLI argument validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    /// A numeric argument was out of range
    #[error("Invalid value for --{name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// coinwatch - crypto market data behind a rate-limited cache
#[derive(Parser, Debug)]
#[command(name = "coinwatch")]
#[command(about = "Crypto market data from CoinGecko, rate limited and cached")]
#[command(version)]
pub struct Cli {
    /// Quote currency for prices
    #[arg(long, global = true, env = "COINWATCH_VS", default_value = "usd")]
    pub vs: String,

    /// CoinGecko API root
    #[arg(long, global = true, env = "COINWATCH_BASE_URL", default_value = COINGECKO_BASE_URL)]
    pub base_url: String,

    /// CoinGecko demo API key
    #[arg(long, global = true, env = "COINGECKO_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Seconds a cached response stays fresh
    #[arg(long, global = true, env = "COINWATCH_CACHE_SECS", default_value_t = 300)]
    pub cache_secs: u64,

    /// Minimum milliseconds between upstream calls
    #[arg(long, global = true, env = "COINWATCH_DELAY_MS", default_value_t = 1000)]
    pub delay_ms: u64,

    /// Let concurrent lookups for the same key share one upstream call
    #[arg(long, global = true)]
    pub coalesce: bool,

    /// Do not read or write the on-disk cache snapshot
    #[arg(long, global = true)]
    pub no_snapshot: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the top coins by market cap
    Top {
        /// Number of coins to list
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
    /// Show details for one coin
    Coin {
        /// CoinGecko id, e.g. bitcoin
        id: String,
    },
    /// Show price history for one coin
    History {
        /// CoinGecko id, e.g. bitcoin
        id: String,
        /// Number of days of history
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
    /// Show current prices for one or more coins
    Price {
        /// CoinGecko ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Keep refreshing the top coins
    Watch {
        /// Seconds between refreshes
        #[arg(short, long, default_value_t = 60)]
        interval: u64,
        /// Number of coins to list
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
        /// Stop after this many refreshes
        #[arg(short, long)]
        count: Option<u32>,
    },
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub cache: CacheConfig,
    pub client: ClientConfig,
    /// Only meaningful for `watch`
    pub refresh: Option<RefreshConfig>,
    pub use_snapshot: bool,
    pub json: bool,
}

fn check_limit(limit: u32) -> Result<(), CliError> {
    if limit == 0 || limit > MAX_MARKETS_PAGE {
        return Err(CliError::InvalidValue {
            name: "limit",
            reason: format!("must be between 1 and {}", MAX_MARKETS_PAGE),
        });
    }
    Ok(())
}

fn check_positive(name: &'static str, value: u64) -> Result<(), CliError> {
    if value == 0 {
        return Err(CliError::InvalidValue {
            name,
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with appropriate settings
    /// * `Err(CliError)` if a value is out of range
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        check_positive("cache-secs", cli.cache_secs)?;

        let refresh = match &cli.command {
            Command::Top { limit } => {
                check_limit(*limit)?;
                None
            }
            Command::History { days, .. } => {
                check_positive("days", u64::from(*days))?;
                None
            }
            Command::Coin { .. } | Command::Price { .. } => None,
            Command::Watch {
                interval, limit, ..
            } => {
                check_limit(*limit)?;
                check_positive("interval", *interval)?;
                Some(RefreshConfig {
                    interval: Duration::from_secs(*interval),
                    limit: *limit,
                    enabled: true,
                })
            }
        };

        let cache = CacheConfig::default()
            .with_cache_duration(Duration::from_secs(cli.cache_secs))
            .with_request_delay(Duration::from_millis(cli.delay_ms))
            .with_coalescing(cli.coalesce);

        let client = ClientConfig::default()
            .with_base_url(cli.base_url.as_str())
            .with_api_key(cli.api_key.clone())
            .with_vs_currency(cli.vs.as_str());

        Ok(StartupConfig {
            cache,
            client,
            refresh,
            use_snapshot: !cli.no_snapshot,
            json: cli.json,
        })
    }
}

/// Maps `-v` occurrences to a default log filter
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "coinwatch=warn",
        1 => "coinwatch=info",
        2 => "coinwatch=debug",
        _ => "coinwatch=trace",
    }
}
