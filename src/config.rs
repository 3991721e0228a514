//! Configuration — TOML file defaults + environment variable overrides.
//!
//! Tuning parameters live in `config/default.toml` (optional).
//! Secrets (store URL, control-plane bearer token, market API key) come from
//! environment variables.

use serde::Deserialize;
use std::env;

use crate::error::PipelineError;

/// Top-level configuration shared by all three workers.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub downstream: DownstreamConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub hot: HotPollConfig,
    #[serde(default)]
    pub cold: ColdPollConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub positions: PositionsConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_data_api_url")]
    pub base_url: String,
    #[serde(default = "default_markets_api_url")]
    pub markets_base_url: String,
    /// Optional API key for the authoritative market-status lookup.
    #[serde(default)]
    pub markets_api_key: Option<String>,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Deadline for trade/position page fetches, seconds.
    #[serde(default = "default_data_timeout")]
    pub data_timeout_secs: u64,
    /// Deadline for single-market status probes, seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_trades_page_limit")]
    pub trades_page_limit: u32,
    #[serde(default = "default_positions_page_limit")]
    pub positions_page_limit: u32,
}

fn default_data_api_url() -> String {
    crate::DATA_API_BASE.into()
}
fn default_markets_api_url() -> String {
    crate::GAMMA_API_BASE.into()
}
fn default_ws_url() -> String {
    crate::ACTIVITY_WS_URL.into()
}
fn default_data_timeout() -> u64 {
    15
}
fn default_probe_timeout() -> u64 {
    10
}
fn default_trades_page_limit() -> u32 {
    200
}
fn default_positions_page_limit() -> u32 {
    500
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_data_api_url(),
            markets_base_url: default_markets_api_url(),
            markets_api_key: None,
            ws_url: default_ws_url(),
            data_timeout_secs: default_data_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            trades_page_limit: default_trades_page_limit(),
            positions_page_limit: default_positions_page_limit(),
        }
    }
}

/// Control-plane endpoints (this system's own API).
#[derive(Debug, Clone, Deserialize)]
pub struct DownstreamConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub bearer_token: String,
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,
}

fn default_dispatch_timeout() -> u64 {
    15
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            bearer_token: String::new(),
            dispatch_timeout_secs: default_dispatch_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HotPollConfig {
    /// Target gap between hot cycles, milliseconds.
    #[serde(default = "default_hot_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_hot_rate")]
    pub rate_per_sec: f64,
    #[serde(default = "default_hot_burst")]
    pub burst: f64,
    /// Minimum gap between calls for the same wallet, milliseconds.
    #[serde(default = "default_hot_cooldown")]
    pub wallet_cooldown_ms: u64,
    /// Non-timeout errors tolerated within one cycle before the process exits.
    #[serde(default = "default_error_budget")]
    pub error_budget: usize,
}

fn default_hot_interval() -> u64 {
    2_000
}
fn default_hot_rate() -> f64 {
    10.0
}
fn default_hot_burst() -> f64 {
    20.0
}
fn default_hot_cooldown() -> u64 {
    1_000
}
fn default_error_budget() -> usize {
    50
}

impl Default for HotPollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_hot_interval(),
            rate_per_sec: default_hot_rate(),
            burst: default_hot_burst(),
            wallet_cooldown_ms: default_hot_cooldown(),
            error_budget: default_error_budget(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColdPollConfig {
    /// Gap between cold sweeps, seconds.
    #[serde(default = "default_cold_interval")]
    pub interval_secs: u64,
    /// Named-lock duration, seconds. Exceeds the interval so two replicas
    /// cannot overlap across an interval boundary.
    #[serde(default = "default_lock_duration")]
    pub lock_duration_secs: u64,
    /// Lock heartbeat gap, seconds.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_cold_rate")]
    pub rate_per_sec: f64,
    #[serde(default = "default_cold_burst")]
    pub burst: f64,
    #[serde(default = "default_cold_cooldown")]
    pub wallet_cooldown_ms: u64,
    /// Extend the lock every N wallets during the sweep.
    #[serde(default = "default_extend_every")]
    pub extend_every_wallets: usize,
    /// Upper bound on post-cycle sleep jitter, seconds.
    #[serde(default = "default_jitter")]
    pub jitter_max_secs: u64,
}

fn default_cold_interval() -> u64 {
    3_600
}
fn default_lock_duration() -> u64 {
    65 * 60
}
fn default_heartbeat() -> u64 {
    30 * 60
}
fn default_cold_rate() -> f64 {
    5.0
}
fn default_cold_burst() -> f64 {
    10.0
}
fn default_cold_cooldown() -> u64 {
    5_000
}
fn default_extend_every() -> usize {
    100
}
fn default_jitter() -> u64 {
    60
}

impl Default for ColdPollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cold_interval(),
            lock_duration_secs: default_lock_duration(),
            heartbeat_secs: default_heartbeat(),
            rate_per_sec: default_cold_rate(),
            burst: default_cold_burst(),
            wallet_cooldown_ms: default_cold_cooldown(),
            extend_every_wallets: default_extend_every(),
            jitter_max_secs: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Feed rows buffered before a size-triggered flush.
    #[serde(default = "default_buffer_max")]
    pub buffer_max_size: usize,
    /// Interval-triggered flush gap, milliseconds.
    #[serde(default = "default_flush_interval")]
    pub buffer_flush_ms: u64,
    /// Concurrent execution dispatches in flight; saturated dispatches drop.
    #[serde(default = "default_inflight_cap")]
    pub inflight_cap: usize,
    /// Wallet-set cache refresh gap, seconds.
    #[serde(default = "default_sets_refresh")]
    pub sets_refresh_secs: u64,
    /// Pending-orders cache refresh gap, seconds.
    #[serde(default = "default_orders_refresh")]
    pub pending_orders_refresh_secs: u64,
    /// Delay before reconnecting a closed socket, seconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_open")]
    pub breaker_open_secs: u64,
    /// Warn when RSS exceeds this fraction of the memory limit.
    #[serde(default = "default_memory_warn")]
    pub memory_warn_fraction: f64,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
}

fn default_buffer_max() -> usize {
    50
}
fn default_flush_interval() -> u64 {
    2_000
}
fn default_inflight_cap() -> usize {
    20
}
fn default_sets_refresh() -> u64 {
    300
}
fn default_orders_refresh() -> u64 {
    60
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_open() -> u64 {
    60
}
fn default_memory_warn() -> f64 {
    0.85
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_max_size: default_buffer_max(),
            buffer_flush_ms: default_flush_interval(),
            inflight_cap: default_inflight_cap(),
            sets_refresh_secs: default_sets_refresh(),
            pending_orders_refresh_secs: default_orders_refresh(),
            reconnect_delay_secs: default_reconnect_delay(),
            breaker_failure_threshold: default_breaker_threshold(),
            breaker_open_secs: default_breaker_open(),
            memory_warn_fraction: default_memory_warn(),
            memory_limit_mb: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionsConfig {
    /// Size-change tolerance in shares. Deltas at or below this are treated
    /// as float jitter, not a reduction.
    #[serde(default = "default_size_tolerance")]
    pub size_delta_tolerance: f64,
    /// Concurrent market-status lookups per reconciliation.
    #[serde(default = "default_oracle_concurrency")]
    pub oracle_concurrency: usize,
}

fn default_size_tolerance() -> f64 {
    0.01
}
fn default_oracle_concurrency() -> usize {
    5
}

impl Default for PositionsConfig {
    fn default() -> Self {
        Self {
            size_delta_tolerance: default_size_tolerance(),
            oracle_concurrency: default_oracle_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}
fn default_port() -> u16 {
    8080
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_output: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_output: false,
        }
    }
}

impl Config {
    /// Load configuration from `config/default.toml` merged with env vars
    /// prefixed with `PC`. Secrets always come from their dedicated env vars.
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("PC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: Config = builder.try_deserialize()?;

        // Secrets are never read from TOML
        if let Ok(v) = env::var("DATABASE_URL") {
            cfg.database.url = v;
        }
        if let Ok(v) = env::var("UPSTREAM_BASE_URL") {
            cfg.upstream.base_url = v;
        }
        if let Ok(v) = env::var("MARKETS_API_KEY") {
            cfg.upstream.markets_api_key = Some(v);
        }
        if let Ok(v) = env::var("DOWNSTREAM_BASE_URL") {
            cfg.downstream.base_url = v;
        }
        if let Ok(v) = env::var("DOWNSTREAM_BEARER_TOKEN") {
            cfg.downstream.bearer_token = v;
        }

        Ok(cfg)
    }

    /// Validation shared by all workers. Fatal at startup, exit 1.
    pub fn require_database(&self) -> Result<(), PipelineError> {
        if self.database.url.is_empty() {
            return Err(PipelineError::Config("DATABASE_URL is not set".into()));
        }
        Ok(())
    }

    /// Extra validation for the stream ingester, which dispatches downstream.
    pub fn require_downstream(&self) -> Result<(), PipelineError> {
        if self.downstream.base_url.is_empty() {
            return Err(PipelineError::Config("DOWNSTREAM_BASE_URL is not set".into()));
        }
        if self.downstream.bearer_token.is_empty() {
            return Err(PipelineError::Config(
                "DOWNSTREAM_BEARER_TOKEN is not set".into(),
            ));
        }
        Ok(())
    }
}
