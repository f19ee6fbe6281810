//! coinwatch - crypto market data from the command line
//!
//! Fetches CoinGecko data through a rate-limited, stale-serving cache that is
//! snapshotted to disk between runs.

use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coinwatch::cache::SnapshotStore;
use coinwatch::cli::{log_filter, Cli, Command, StartupConfig};
use coinwatch::data::CoinGeckoClient;
use coinwatch::output;
use coinwatch::refresh::{RefreshHandle, RefreshMessage};

/// Snapshot file name for the CoinGecko cache
const SNAPSHOT_NAME: &str = "coingecko";

/// Snapshot entries older than this are not restored (1 day)
const SNAPSHOT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Sends logs to stderr so stdout stays clean for `--json`
fn init_logging(verbose: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(
    command: &Command,
    client: &CoinGeckoClient,
    startup: &StartupConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let vs = client.config().vs_currency.as_str();

    match command {
        Command::Top { limit } => {
            let coins = client.top_coins(*limit).await?;
            if startup.json {
                print_json(&coins)?;
            } else {
                print!("{}", output::render_markets(&coins, vs));
            }
        }
        Command::Coin { id } => {
            let detail = client.coin_details(id).await?;
            if startup.json {
                print_json(&detail)?;
            } else {
                print!("{}", output::render_detail(&detail, vs));
            }
        }
        Command::History { id, days } => {
            let history = client.price_history(id, *days).await?;
            if startup.json {
                print_json(&history)?;
            } else {
                print!("{}", output::render_history(id, *days, &history, vs));
            }
        }
        Command::Price { ids } => {
            let prices = client.simple_prices(ids).await?;
            if startup.json {
                print_json(&prices)?;
            } else {
                print!("{}", output::render_prices(&prices, vs));
            }
        }
        Command::Watch { count, .. } => {
            let refresh = startup.refresh.clone().unwrap_or_default();
            watch(client, refresh, *count, startup.json).await?;
        }
    }

    Ok(())
}

/// Prints every refreshed listing until `count` refreshes are done or Ctrl-C
async fn watch(
    client: &CoinGeckoClient,
    refresh: coinwatch::refresh::RefreshConfig,
    count: Option<u32>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let vs = client.config().vs_currency.clone();
    let mut handle = RefreshHandle::spawn(client.clone(), refresh);
    let mut completed = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            message = handle.recv() => match message {
                Some(RefreshMessage::TopCoinsUpdated(coins)) => {
                    if json {
                        print_json(&coins)?;
                    } else {
                        println!("{}", chrono::Local::now().format("%H:%M:%S"));
                        print!("{}", output::render_markets(&coins, &vs));
                    }
                }
                Some(RefreshMessage::RefreshError(e)) => eprintln!("refresh failed: {}", e),
                Some(RefreshMessage::RefreshStarted) => {}
                Some(RefreshMessage::RefreshCompleted) => {
                    completed += 1;
                    if count.is_some_and(|count| completed >= count) {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let startup = match StartupConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let client = CoinGeckoClient::new(startup.client.clone(), startup.cache.clone())?;

    let snapshots = if startup.use_snapshot {
        SnapshotStore::new()
    } else {
        None
    };
    if let Some(store) = &snapshots {
        if let Some(snapshot) = store.load(SNAPSHOT_NAME) {
            let restored = client
                .cache()
                .restore(snapshot.entries, Some(SNAPSHOT_MAX_AGE));
            info!(restored, "Restored cache snapshot");
        }
    }

    let result = run(&cli.command, &client, &startup).await;

    if let Some(store) = &snapshots {
        if let Err(e) = store.save(SNAPSHOT_NAME, client.cache().snapshot_entries()) {
            warn!(error = %e, "Failed to save cache snapshot");
        }
    }

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
