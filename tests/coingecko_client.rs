//! Integration tests for the CoinGecko client
//!
//! Runs the client against a tiny local HTTP server that answers with scripted
//! responses and records every request it sees.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use coinwatch::cache::{CacheError, FetchError, RateLimitedCache};
use coinwatch::config::{CacheConfig, ClientConfig};
use coinwatch::data::{ClientError, CoinGeckoClient};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A request as seen by the stub server
#[derive(Debug, Clone)]
struct Recorded {
    head: String,
    at: Instant,
}

impl Recorded {
    fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }
}

struct StubServer {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubServer {
    /// Starts a server answering each connection with the next scripted response
    ///
    /// Once the script runs out every request gets a 500.
    async fn start(script: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(VecDeque::from(script)));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                recorded.lock().unwrap().push(Recorded {
                    head: String::from_utf8_lossy(&buf).to_string(),
                    at: Instant::now(),
                });

                let (status, body) = script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or((500, "{\"error\":\"script exhausted\"}".to_string()));
                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { base_url, requests }
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

fn markets_body() -> String {
    json!([
        {
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "current_price": 67000.0,
            "market_cap_rank": 1
        },
        {
            "id": "ethereum",
            "symbol": "eth",
            "name": "Ethereum",
            "current_price": 3500.0,
            "market_cap_rank": 2
        }
    ])
    .to_string()
}

fn detail_body() -> String {
    json!({
        "id": "bitcoin",
        "symbol": "btc",
        "name": "Bitcoin",
        "market_data": {"current_price": {"usd": 67000.0}}
    })
    .to_string()
}

fn client_for(server: &StubServer, cache: CacheConfig) -> CoinGeckoClient {
    let config = ClientConfig::default().with_base_url(server.base_url.as_str());
    CoinGeckoClient::new(config, cache).expect("Client should build")
}

fn fast_cache() -> CacheConfig {
    CacheConfig::default().with_request_delay(Duration::from_millis(10))
}

#[tokio::test]
async fn test_top_coins_fetches_once_then_serves_cache() {
    let server = StubServer::start(vec![(200, markets_body())]).await;
    let client = client_for(&server, fast_cache());

    let first = client.top_coins(2).await.unwrap();
    let second = client.top_coins(2).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first[1].id, "ethereum");
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let line = requests[0].request_line();
    assert!(line.starts_with("GET /coins/markets?"), "{}", line);
    assert!(line.contains("vs_currency=usd"));
    assert!(line.contains("per_page=2"));
}

#[tokio::test]
async fn test_rate_limited_refetch_serves_previous_listing() {
    let server = StubServer::start(vec![
        (200, markets_body()),
        (429, "{\"status\":{\"error_code\":429}}".to_string()),
    ])
    .await;
    let cache = fast_cache().with_cache_duration(Duration::from_millis(200));
    let client = client_for(&server, cache);

    let first = client.top_coins(2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let throttled = client.top_coins(2).await.unwrap();
    assert_eq!(throttled, first);
    assert!(client.top_coins_age(2).unwrap() < Duration::from_millis(200));

    // Freshness was restarted, so this one never reaches the server
    let again = client.top_coins(2).await.unwrap();
    assert_eq!(again, first);
    assert_eq!(server.requests().len(), 2);
    assert_eq!(client.cache().stats().rate_limited_fallbacks, 1);
}

#[tokio::test]
async fn test_server_error_serves_stale_listing() {
    let server =
        StubServer::start(vec![(200, markets_body()), (502, "bad gateway".to_string())]).await;
    let cache = fast_cache().with_cache_duration(Duration::from_millis(100));
    let client = client_for(&server, cache);

    let first = client.top_coins(2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let stale = client.top_coins(2).await.unwrap();
    assert_eq!(stale, first);
    assert!(client.top_coins_age(2).unwrap() >= Duration::from_millis(100));
    assert_eq!(client.cache().stats().stale_fallbacks, 1);
}

#[tokio::test]
async fn test_cold_failure_is_returned() {
    let server = StubServer::start(vec![(500, "{\"error\":\"boom\"}".to_string())]).await;
    let client = client_for(&server, fast_cache());

    let err = client.coin_details("bitcoin").await.unwrap_err();

    match err {
        ClientError::Cache(CacheError::Fetch(inner)) => {
            assert_eq!(inner.status_code(), Some(500));
            assert!(inner.to_string().contains("boom"));
        }
        other => panic!("Expected fetch failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_api_key_header_is_sent() {
    let server = StubServer::start(vec![(200, detail_body())]).await;
    let config = ClientConfig::default()
        .with_base_url(server.base_url.as_str())
        .with_api_key(Some("secret".to_string()));
    let client = CoinGeckoClient::new(config, fast_cache()).unwrap();

    let detail = client.coin_details("bitcoin").await.unwrap();

    assert_eq!(detail.price_in("usd"), Some(67000.0));
    let head = server.requests()[0].head.to_lowercase();
    assert!(head.contains("x-cg-demo-api-key: secret"), "{}", head);
}

#[tokio::test]
async fn test_upstream_calls_are_spaced_by_request_delay() {
    let server = StubServer::start(vec![
        (200, markets_body()),
        (200, detail_body()),
        (200, "{\"prices\": [[1700000000000, 1.0]]}".to_string()),
    ])
    .await;
    let delay = Duration::from_millis(100);
    let client = client_for(&server, CacheConfig::default().with_request_delay(delay));

    let (markets, detail, history) = tokio::join!(
        client.top_coins(2),
        client.coin_details("bitcoin"),
        client.price_history("bitcoin", 1),
    );
    markets.unwrap();
    detail.unwrap();
    assert_eq!(history.unwrap().prices.len(), 1);

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].request_line().contains("/coins/markets"));
    assert!(requests[1].request_line().contains("/coins/bitcoin?"));
    assert!(requests[2].request_line().contains("/coins/bitcoin/market_chart"));
    for pair in requests.windows(2) {
        assert!(pair[1].at - pair[0].at >= delay, "Requests closer than the delay");
    }
}

#[tokio::test]
async fn test_coalescing_shares_one_request() {
    let server = StubServer::start(vec![(200, detail_body()), (200, detail_body())]).await;
    let client = client_for(&server, fast_cache().with_coalescing(true));

    let (a, b) = tokio::join!(client.coin_details("bitcoin"), client.coin_details("BITCOIN"));

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(server.requests().len(), 1);
    assert_eq!(client.cache().stats().coalesced, 1);
}

#[tokio::test]
async fn test_clients_sharing_a_cache_share_the_queue() {
    let server = StubServer::start(vec![(200, detail_body())]).await;
    let cache = RateLimitedCache::new(fast_cache());
    let config = ClientConfig::default().with_base_url(server.base_url.as_str());
    let first = CoinGeckoClient::with_cache(config.clone(), cache.clone()).unwrap();
    let second = CoinGeckoClient::with_cache(config, cache).unwrap();

    first.coin_details("bitcoin").await.unwrap();
    second.coin_details("bitcoin").await.unwrap();

    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_malformed_success_body_keeps_previous_listing() {
    let server = StubServer::start(vec![
        (200, markets_body()),
        (200, "{\"error\":\"maintenance\"}".to_string()),
        (500, "{\"error\":\"boom\"}".to_string()),
    ])
    .await;
    let cache = fast_cache().with_cache_duration(Duration::from_millis(100));
    let client = client_for(&server, cache);

    let first = client.top_coins(2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    // A 200 with the wrong shape counts as a failed fetch, not new data
    let after_bad_body = client.top_coins(2).await.unwrap();
    assert_eq!(after_bad_body, first);

    let after_server_error = client.top_coins(2).await.unwrap();
    assert_eq!(after_server_error, first);

    assert_eq!(server.requests().len(), 3);
    let stats = client.cache().stats();
    assert_eq!(stats.stale_fallbacks, 2);
    assert_eq!(stats.failures, 0);
}

#[tokio::test]
async fn test_malformed_success_body_with_nothing_cached_is_a_decode_failure() {
    let server = StubServer::start(vec![(200, "\"maintenance\"".to_string())]).await;
    let client = client_for(&server, fast_cache());

    let err = client.coin_details("bitcoin").await.unwrap_err();

    match err {
        ClientError::Cache(CacheError::Fetch(inner)) => {
            assert!(matches!(*inner, FetchError::Decode(_)), "{:?}", inner);
        }
        other => panic!("Expected fetch failure, got {:?}", other),
    }
    assert!(client.cache().peek("coin:bitcoin").is_none());
}
