// REST Snapshot Client - Binance Futures depth snapshots
// One GET per call; retry policy lives with the caller that schedules resyncs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::config::{secs_to_duration, FeedConfig};
use crate::layer2::parser::{parse_depth_snapshot, ParseError, ParsedDepthSnapshot};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum RestClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid snapshot: {0}")]
    Parse(#[from] ParseError),
}

// ============================================================================
// Snapshot Source
// ============================================================================

/// Anything that can produce a depth snapshot for the configured symbol
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<ParsedDepthSnapshot, RestClientError>;
}

// ============================================================================
// Client Statistics
// ============================================================================

#[derive(Debug, Clone)]
pub struct RestClientStats {
    pub requests_sent: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub success_rate: f64,
}

impl fmt::Display for RestClientStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RestClientStats(sent={}, ok={}, fail={}, rate={:.2}%)",
            self.requests_sent,
            self.requests_succeeded,
            self.requests_failed,
            self.success_rate * 100.0
        )
    }
}

// ============================================================================
// Snapshot Client
// ============================================================================

/// HTTP client for `GET /fapi/v1/depth`
pub struct SnapshotClient {
    url: String,
    symbol: String,
    limit: u32,
    timeout: Duration,
    client: Client,

    requests_sent: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
}

impl SnapshotClient {
    pub fn new(url: &str, symbol: &str, limit: u32, timeout: Duration) -> Result<Self, RestClientError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            url: url.to_string(),
            symbol: symbol.to_uppercase(),
            limit,
            timeout,
            client,
            requests_sent: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &FeedConfig) -> Result<Self, RestClientError> {
        Self::new(
            &config.rest_depth_url,
            &config.symbol,
            config.snapshot_limit,
            secs_to_duration(config.snapshot_timeout_sec),
        )
    }

    /// Full request URL including query string
    pub fn request_url(&self) -> String {
        format!("{}?symbol={}&limit={}", self.url, self.symbol, self.limit)
    }

    async fn get_snapshot(&self) -> Result<ParsedDepthSnapshot, RestClientError> {
        let url = self.request_url();
        debug!(url = %url, "Fetching depth snapshot");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            return Err(RestClientError::Status {
                code: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }

        Ok(parse_depth_snapshot(&body)?)
    }

    pub fn get_stats(&self) -> RestClientStats {
        let sent = self.requests_sent.load(Ordering::Relaxed);
        let succeeded = self.requests_succeeded.load(Ordering::Relaxed);

        RestClientStats {
            requests_sent: sent,
            requests_succeeded: succeeded,
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            success_rate: if sent > 0 {
                succeeded as f64 / sent as f64
            } else {
                0.0
            },
        }
    }
}

#[async_trait]
impl SnapshotSource for SnapshotClient {
    async fn fetch_snapshot(&self) -> Result<ParsedDepthSnapshot, RestClientError> {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);

        let result = match tokio::time::timeout(self.timeout, self.get_snapshot()).await {
            Ok(result) => result,
            Err(_) => Err(RestClientError::Timeout(self.timeout)),
        };

        match &result {
            Ok(snapshot) => {
                self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    last_update_id = snapshot.last_update_id,
                    bids = snapshot.bids.len(),
                    asks = snapshot.asks.len(),
                    "Depth snapshot received"
                );
            }
            Err(e) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, symbol = %self.symbol, "Depth snapshot request failed");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url() {
        let client = SnapshotClient::from_config(&FeedConfig::default()).unwrap();
        assert_eq!(
            client.request_url(),
            "https://fapi.binance.com/fapi/v1/depth?symbol=BTCUSDT&limit=1000"
        );
    }

    #[test]
    fn test_stats_initial() {
        let client = SnapshotClient::from_config(&FeedConfig::default()).unwrap();
        let stats = client.get_stats();
        assert_eq!(stats.requests_sent, 0);
        assert_eq!(stats.requests_failed, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn test_parse_error_converts() {
        let err: RestClientError = ParseError::InvalidJson("eof".to_string()).into();
        assert!(err.to_string().starts_with("Invalid snapshot"));
    }

    #[tokio::test]
    async fn test_unreachable_host_counts_failure() {
        let client = SnapshotClient::new(
            "http://127.0.0.1:1/fapi/v1/depth",
            "btcusdt",
            10,
            Duration::from_secs(2),
        )
        .unwrap();

        assert!(client.fetch_snapshot().await.is_err());
        let stats = client.get_stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.requests_failed, 1);
    }
}
