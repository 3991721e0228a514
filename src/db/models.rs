//! Database row types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DbPosition {
    pub wallet: String,
    pub market_id: String,
    pub size: f64,
    pub redeemable: bool,
    pub last_seen_at: DateTime<Utc>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DbPollState {
    pub wallet: String,
    pub last_trade_time_seen: Option<DateTime<Utc>>,
    pub last_position_check_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
