pub mod client;
pub mod types;

pub use client::UpstreamClient;
pub use types::{MarketStatus, PositionRecord, Side, TradeRow};
