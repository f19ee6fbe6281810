//! coinwatch library
//!
//! Exposes the rate-limited cache, the CoinGecko client and the CLI model for
//! use by the binary and integration tests.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod output;
pub mod refresh;
