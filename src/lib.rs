pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod limits;
pub mod logging;
pub mod poller;
pub mod reconcile;
pub mod stream;
pub mod upstream;
pub mod watchdog;
pub mod web;

/// Polymarket data API base URL (public, no auth required)
pub const DATA_API_BASE: &str = "https://data-api.polymarket.com";

/// Gamma API base URL — authoritative market status lookups
pub const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

/// Real-time data service WebSocket URL (activity feed)
pub const ACTIVITY_WS_URL: &str = "wss://ws-live-data.polymarket.com";
