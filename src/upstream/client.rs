//! Rate-limited HTTP client for the public trade/position venue.
//!
//! Every request acquires a token from the shared limiter first and carries
//! an explicit deadline. Timeouts surface as retryable errors with a
//! synthetic 408 status.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::error::{PipelineError, Result};
use crate::limits::RateLimiter;
use crate::upstream::types::{parse_bool, MarketStatus, PositionRecord};

const USER_AGENT: &str = concat!("polycopy-pipeline/", env!("CARGO_PKG_VERSION"));

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    markets_base_url: String,
    markets_api_key: Option<String>,
    data_timeout: Duration,
    probe_timeout: Duration,
    positions_page_limit: u32,
    limiter: Arc<RateLimiter>,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(PipelineError::Http)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            markets_base_url: config.markets_base_url.trim_end_matches('/').to_string(),
            markets_api_key: config.markets_api_key.clone(),
            data_timeout: Duration::from_secs(config.data_timeout_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            positions_page_limit: config.positions_page_limit,
            limiter,
        })
    }

    async fn get_json(&self, url: &str, timeout: Duration) -> Result<Value> {
        self.limiter.acquire().await;

        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Timeout(timeout)
                } else {
                    PipelineError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::UpstreamStatus {
                status: status.as_u16(),
                message: url.to_string(),
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::Timeout(timeout)
            } else {
                PipelineError::Http(e)
            }
        })
    }

    /// One page of the wallet's trade listing, newest-first by the upstream
    /// clock. Rows are returned raw; the caller types them against its
    /// watermark.
    pub async fn fetch_trades_page(
        &self,
        wallet: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Value>> {
        let url = format!(
            "{}/trades?user={wallet}&limit={limit}&offset={offset}",
            self.base_url
        );
        match self.get_json(&url, self.data_timeout).await? {
            Value::Array(rows) => Ok(rows),
            other => Err(PipelineError::Payload(format!(
                "trades listing is not an array: {other}"
            ))),
        }
    }

    /// The wallet's full open-position snapshot, paginated until a short
    /// page. 404/400 mean "no positions".
    pub async fn fetch_positions(&self, wallet: &str) -> Result<Vec<PositionRecord>> {
        let limit = self.positions_page_limit;
        let mut all = Vec::new();
        let mut offset: u32 = 0;

        loop {
            let url = format!(
                "{}/positions?user={wallet}&limit={limit}&offset={offset}",
                self.base_url
            );
            let page = match self.get_json(&url, self.data_timeout).await {
                Ok(Value::Array(rows)) => rows,
                Ok(other) => {
                    return Err(PipelineError::Payload(format!(
                        "positions listing is not an array: {other}"
                    )))
                }
                Err(PipelineError::UpstreamStatus { status: 404 | 400, .. }) => {
                    return Ok(all);
                }
                Err(e) => return Err(e),
            };

            let count = page.len() as u32;
            for raw in &page {
                all.push(PositionRecord::from_upstream(raw)?);
            }

            if count < limit {
                break;
            }
            offset += count;
        }

        debug!(wallet, count = all.len(), "fetched positions snapshot");
        Ok(all)
    }

    /// Authoritative market-status probe. Lookup failures degrade to
    /// `Unknown` rather than failing the reconciliation.
    pub async fn market_status(&self, market_id: &str) -> MarketStatus {
        let mut url = format!("{}/markets/{market_id}", self.markets_base_url);
        if let Some(key) = &self.markets_api_key {
            url.push_str(&format!("?api_key={key}"));
        }

        let body = match self.get_json(&url, self.probe_timeout).await {
            Ok(body) => body,
            Err(PipelineError::UpstreamStatus { status, .. })
                if status == StatusCode::NOT_FOUND.as_u16() =>
            {
                return MarketStatus::Unknown;
            }
            Err(e) => {
                warn!(market_id, error = %e, "market status lookup failed");
                return MarketStatus::Unknown;
            }
        };

        // Some deployments wrap the market object in a one-element array.
        let market = match &body {
            Value::Array(items) => match items.first() {
                Some(m) => m,
                None => return MarketStatus::Unknown,
            },
            other => other,
        };

        let closed = parse_bool(market.get("closed")).optional("closed").ok().flatten();
        let resolved = parse_bool(market.get("resolved"))
            .optional("resolved")
            .ok()
            .flatten();

        match (closed, resolved) {
            (Some(true), _) | (_, Some(true)) => MarketStatus::Closed,
            (Some(false), _) | (_, Some(false)) => MarketStatus::Open,
            (None, None) => MarketStatus::Unknown,
        }
    }
}
