//! Client for this system's own control plane (bearer-authenticated).
//!
//! The stream ingester forwards execution-eligible trades here and notifies
//! fills. Transport errors and timeouts surface as [`PipelineError`]; any
//! HTTP response that arrives is returned with its status so the circuit
//! breaker can account for it.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::DownstreamConfig;
use crate::error::{PipelineError, Result};

pub struct ControlClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct TargetTradersResponse {
    pub traders: Vec<String>,
    #[serde(default)]
    pub has_leaderboard_wallets: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncTradeBody {
    #[serde(default)]
    pub inserted: i64,
    #[serde(default)]
    pub message: Option<String>,
}

/// A sync-trade call that produced an HTTP response.
#[derive(Debug)]
pub struct SyncTradeOutcome {
    pub status: u16,
    pub inserted: i64,
}

#[derive(Debug, Deserialize)]
pub struct FillNotifyResponse {
    pub updated: bool,
    #[serde(default)]
    pub new_status: Option<String>,
    #[serde(default)]
    pub fill_rate: Option<f64>,
}

impl ControlClient {
    pub fn new(config: &DownstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("polycopy-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(PipelineError::Http)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
            timeout: Duration::from_secs(config.dispatch_timeout_secs),
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> PipelineError {
        if e.is_timeout() {
            PipelineError::Timeout(self.timeout)
        } else {
            PipelineError::Http(e)
        }
    }

    /// Execution-target wallet set, refreshed every few minutes by the
    /// stream ingester.
    pub async fn target_traders(&self) -> Result<TargetTradersResponse> {
        let url = format!("{}/api/copytrade/target-traders", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::UpstreamStatus {
                status: status.as_u16(),
                message: url,
            });
        }
        response.json().await.map_err(|e| self.map_send_error(e))
    }

    /// Forward one raw upstream trade for follower execution. Returns the
    /// response status even for non-2xx so the breaker can classify it.
    pub async fn sync_trade(&self, trade: &Value) -> Result<SyncTradeOutcome> {
        let url = format!("{}/api/copytrade/sync-trade", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.bearer_token)
            .timeout(self.timeout)
            .json(&json!({ "trade": trade }))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status().as_u16();
        let body: SyncTradeBody = response.json().await.unwrap_or_default();
        if let Some(message) = &body.message {
            debug!(status, message = %message, "sync-trade response");
        }
        Ok(SyncTradeOutcome {
            status,
            inserted: body.inserted,
        })
    }

    /// Best-effort trigger for the downstream executor.
    pub async fn execute(&self) -> Result<()> {
        let url = format!("{}/api/copytrade/execute", self.base_url);
        self.http
            .post(&url)
            .bearer_auth(&self.bearer_token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Ok(())
    }

    /// Notify the control plane that an outbound order saw a fill.
    pub async fn notify_fill(&self, order_id: &str) -> Result<FillNotifyResponse> {
        let url = format!("{}/api/copytrade/ws-fill", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.bearer_token)
            .timeout(self.timeout)
            .json(&json!({ "order_id": order_id }))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::UpstreamStatus {
                status: status.as_u16(),
                message: url,
            });
        }
        response.json().await.map_err(|e| self.map_send_error(e))
    }
}
