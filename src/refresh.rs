//! Background data refresh system
//!
//! Periodically pulls the top-coins listing through the cache in the background
//! and hands the results to the caller over a tokio channel. Because the pull
//! goes through the cache, a tick inside the freshness window costs nothing and
//! a throttled upstream just yields the last listing again.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::data::{CoinGeckoClient, CoinMarket};

/// Messages sent from the background refresh to its owner
#[derive(Debug, Clone)]
pub enum RefreshMessage {
    /// Refresh started
    RefreshStarted,
    /// A new (or re-served) listing is available
    TopCoinsUpdated(Vec<CoinMarket>),
    /// The refresh failed with nothing cached to fall back to
    RefreshError(String),
    /// Refresh completed
    RefreshCompleted,
}

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Time between refreshes
    pub interval: Duration,
    /// Number of coins to pull
    pub limit: u32,
    /// Whether auto-refresh is enabled
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            limit: 10,
            enabled: true,
        }
    }
}

/// Handle for controlling the background refresh
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    /// Signals the task to stop
    shutdown_tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Spawns the refresh task
    ///
    /// The first refresh happens immediately, then once per `config.interval`.
    /// With `enabled = false` nothing is spawned and no messages arrive.
    pub fn spawn(client: CoinGeckoClient, config: RefreshConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        if config.enabled {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if !refresh_once(&client, config.limit, &msg_tx).await {
                                break;
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            debug!("Refresh task shutting down");
                            break;
                        }
                    }
                }
            });
        }

        Self {
            receiver: msg_rx,
            shutdown_tx,
        }
    }

    /// Waits for the next message
    ///
    /// Returns `None` once the refresh task has stopped.
    pub async fn recv(&mut self) -> Option<RefreshMessage> {
        self.receiver.recv().await
    }

    /// Shuts down the background refresh task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Runs one refresh cycle, returning `false` once nobody is listening
async fn refresh_once(
    client: &CoinGeckoClient,
    limit: u32,
    tx: &mpsc::Sender<RefreshMessage>,
) -> bool {
    if tx.send(RefreshMessage::RefreshStarted).await.is_err() {
        return false;
    }

    let update = match client.top_coins(limit).await {
        Ok(coins) => RefreshMessage::TopCoinsUpdated(coins),
        Err(e) => {
            warn!(error = %e, "Refresh failed");
            RefreshMessage::RefreshError(e.to_string())
        }
    };
    if tx.send(update).await.is_err() {
        return false;
    }

    tx.send(RefreshMessage::RefreshCompleted).await.is_ok()
}

/// Checks for pending refresh messages without blocking
///
/// # Returns
/// * `Some(RefreshMessage)` if a message was available
/// * `None` if no messages are pending
pub fn try_recv(handle: &mut RefreshHandle) -> Option<RefreshMessage> {
    handle.receiver.try_recv().ok()
}
