//! Typed views over upstream payloads.
//!
//! The upstream emits loosely-typed JSON: numbers arrive as numbers or
//! numeric strings, timestamps as seconds or milliseconds. Every field goes
//! through an explicit parser returning [`Field`] so a malformed value fails
//! the record instead of being silently dropped. The raw payload is carried
//! alongside the typed row for forensic replay.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{PipelineError, Result};

/// Outcome of parsing one field out of an upstream payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Value(T),
    Missing,
    Invalid(String),
}

impl<T> Field<T> {
    /// Unwrap a field the record cannot exist without.
    pub fn required(self, name: &str) -> Result<T> {
        match self {
            Field::Value(v) => Ok(v),
            Field::Missing => Err(PipelineError::Payload(format!("missing field `{name}`"))),
            Field::Invalid(detail) => Err(PipelineError::Payload(format!(
                "invalid field `{name}`: {detail}"
            ))),
        }
    }

    /// Unwrap an optional field; an invalid value is still an error.
    pub fn optional(self, name: &str) -> Result<Option<T>> {
        match self {
            Field::Value(v) => Ok(Some(v)),
            Field::Missing => Ok(None),
            Field::Invalid(detail) => Err(PipelineError::Payload(format!(
                "invalid field `{name}`: {detail}"
            ))),
        }
    }
}

/// Canonical wallet form: trimmed, lowercase hex. All joins key on this.
pub fn canonical_wallet(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub fn parse_number(value: Option<&Value>) -> Field<f64> {
    match value {
        None | Some(Value::Null) => Field::Missing,
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if f.is_finite() => Field::Value(f),
            _ => Field::Invalid(format!("non-finite number {n}")),
        },
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Field::Missing;
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() => Field::Value(f),
                _ => Field::Invalid(format!("unparseable number {trimmed:?}")),
            }
        }
        Some(other) => Field::Invalid(format!("expected number, got {other}")),
    }
}

pub fn parse_integer(value: Option<&Value>) -> Field<i64> {
    match parse_number(value) {
        Field::Value(f) if f.fract() == 0.0 => Field::Value(f as i64),
        Field::Value(f) => Field::Invalid(format!("expected integer, got {f}")),
        Field::Missing => Field::Missing,
        Field::Invalid(d) => Field::Invalid(d),
    }
}

pub fn parse_string(value: Option<&Value>) -> Field<String> {
    match value {
        None | Some(Value::Null) => Field::Missing,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Field::Missing
            } else {
                Field::Value(trimmed.to_string())
            }
        }
        Some(other) => Field::Invalid(format!("expected string, got {other}")),
    }
}

pub fn parse_bool(value: Option<&Value>) -> Field<bool> {
    match value {
        None | Some(Value::Null) => Field::Missing,
        Some(Value::Bool(b)) => Field::Value(*b),
        Some(other) => Field::Invalid(format!("expected bool, got {other}")),
    }
}

/// Upstream timestamps arrive as seconds or milliseconds, number or numeric
/// string. Values at or above 1e12 are already milliseconds.
pub fn parse_timestamp_ms(value: Option<&Value>) -> Field<i64> {
    match parse_number(value) {
        Field::Value(f) if f <= 0.0 => Field::Invalid(format!("non-positive timestamp {f}")),
        Field::Value(f) if f >= 1e12 => Field::Value(f.round() as i64),
        Field::Value(f) => Field::Value((f * 1000.0).round() as i64),
        Field::Missing => Field::Missing,
        Field::Invalid(d) => Field::Invalid(d),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(value: Option<&Value>) -> Field<Side> {
        match parse_string(value) {
            Field::Value(s) => match s.to_ascii_uppercase().as_str() {
                "BUY" => Field::Value(Side::Buy),
                "SELL" => Field::Value(Side::Sell),
                other => Field::Invalid(format!("unknown side {other:?}")),
            },
            Field::Missing => Field::Missing,
            Field::Invalid(d) => Field::Invalid(d),
        }
    }
}

/// Authoritative market status from the oracle lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketStatus {
    Closed,
    Open,
    /// The market could not be confirmed closed. The reconciler treats this
    /// as an explicit exit by the holder.
    Unknown,
}

/// One fill, typed and ready for the trades upsert.
#[derive(Debug, Clone)]
pub struct TradeRow {
    pub trade_id: String,
    pub wallet: String,
    pub tx_hash: Option<String>,
    pub condition_id: String,
    pub event_slug: Option<String>,
    pub market_slug: Option<String>,
    pub title: Option<String>,
    pub side: Side,
    pub outcome: Option<String>,
    pub outcome_index: Option<i64>,
    pub size: f64,
    pub price: f64,
    pub traded_at: DateTime<Utc>,
    pub raw: Value,
}

impl TradeRow {
    /// Build a row from a raw upstream trade object (HTTP page or stream
    /// event — the shapes mirror each other). The wallet argument wins over
    /// any wallet field in the payload.
    pub fn from_upstream(wallet: &str, raw: &Value) -> Result<TradeRow> {
        let wallet = canonical_wallet(wallet);

        let condition_id = parse_string(raw.get("conditionId")).required("conditionId")?;
        let tx_hash = parse_string(raw.get("transactionHash")).optional("transactionHash")?;
        let side = Side::parse(raw.get("side")).required("side")?;
        let outcome = parse_string(raw.get("outcome")).optional("outcome")?;
        let outcome_index = parse_integer(raw.get("outcomeIndex")).optional("outcomeIndex")?;
        let size = parse_number(raw.get("size")).required("size")?;
        let price = parse_number(raw.get("price")).required("price")?;
        let ts_ms = parse_timestamp_ms(raw.get("timestamp")).required("timestamp")?;

        if size < 0.0 {
            return Err(PipelineError::Payload(format!("negative size {size}")));
        }

        let traded_at = DateTime::<Utc>::from_timestamp_millis(ts_ms)
            .ok_or_else(|| PipelineError::Payload(format!("timestamp out of range: {ts_ms}")))?;

        // Asset (CLOB token id) participates in the synthetic identity when
        // the tx hash is absent.
        let asset = parse_string(raw.get("asset")).optional("asset")?;

        let trade_id = match &tx_hash {
            Some(hash) => hash.clone(),
            None => {
                let key = asset.as_deref().unwrap_or(&condition_id);
                format!("{wallet}:{key}:{ts_ms}")
            }
        };

        Ok(TradeRow {
            trade_id,
            wallet,
            tx_hash,
            condition_id,
            event_slug: parse_string(raw.get("eventSlug")).optional("eventSlug")?,
            market_slug: parse_string(raw.get("slug")).optional("slug")?,
            title: parse_string(raw.get("title")).optional("title")?,
            side,
            outcome,
            outcome_index,
            size,
            price,
            traded_at,
            raw: raw.clone(),
        })
    }
}

/// One open position from the wallet's snapshot.
#[derive(Debug, Clone)]
pub struct PositionRecord {
    /// Condition id when present, else the CLOB asset id.
    pub market_id: String,
    pub size: f64,
    pub redeemable: bool,
    pub raw: Value,
}

impl PositionRecord {
    pub fn from_upstream(raw: &Value) -> Result<PositionRecord> {
        let market_id = match parse_string(raw.get("conditionId")) {
            Field::Value(v) => v,
            Field::Missing => parse_string(raw.get("asset")).required("conditionId|asset")?,
            Field::Invalid(d) => {
                return Err(PipelineError::Payload(format!("invalid conditionId: {d}")))
            }
        };
        let size = parse_number(raw.get("size")).required("size")?;
        let redeemable = parse_bool(raw.get("redeemable"))
            .optional("redeemable")?
            .unwrap_or(false);

        Ok(PositionRecord {
            market_id,
            size,
            redeemable,
            raw: raw.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_accept_seconds_and_milliseconds() {
        let secs = json!(1_700_000_000);
        let ms = json!(1_700_000_000_123i64);
        let s = json!("1700000000");

        assert_eq!(
            parse_timestamp_ms(Some(&secs)),
            Field::Value(1_700_000_000_000)
        );
        assert_eq!(parse_timestamp_ms(Some(&ms)), Field::Value(1_700_000_000_123));
        assert_eq!(parse_timestamp_ms(Some(&s)), Field::Value(1_700_000_000_000));
    }

    #[test]
    fn invalid_number_is_an_error_not_a_drop() {
        let raw = json!({
            "conditionId": "0xc1",
            "side": "BUY",
            "size": "not-a-number",
            "price": 0.5,
            "timestamp": 1_700_000_000,
        });
        let err = TradeRow::from_upstream("0xAB", &raw).unwrap_err();
        assert!(matches!(err, PipelineError::Payload(_)));
    }

    #[test]
    fn trade_id_prefers_tx_hash() {
        let raw = json!({
            "transactionHash": "0xhash",
            "conditionId": "0xc1",
            "side": "SELL",
            "size": "12.5",
            "price": "0.42",
            "timestamp": 1_700_000_000,
        });
        let row = TradeRow::from_upstream("0xAB", &raw).unwrap();
        assert_eq!(row.trade_id, "0xhash");
        assert_eq!(row.wallet, "0xab");
        assert_eq!(row.side, Side::Sell);
        assert_eq!(row.size, 12.5);
    }

    #[test]
    fn synthetic_trade_id_is_deterministic() {
        let raw = json!({
            "conditionId": "0xc1",
            "asset": "77001122",
            "side": "BUY",
            "size": 3,
            "price": 0.5,
            "timestamp": 1_700_000_000,
        });
        let a = TradeRow::from_upstream("0xAB", &raw).unwrap();
        let b = TradeRow::from_upstream("0xab", &raw).unwrap();
        assert_eq!(a.trade_id, b.trade_id);
        assert_eq!(a.trade_id, "0xab:77001122:1700000000000");
    }

    #[test]
    fn position_falls_back_to_asset_id() {
        let raw = json!({ "asset": "555", "size": 10.0, "redeemable": true });
        let pos = PositionRecord::from_upstream(&raw).unwrap();
        assert_eq!(pos.market_id, "555");
        assert!(pos.redeemable);

        let raw = json!({ "size": 10.0 });
        assert!(PositionRecord::from_upstream(&raw).is_err());
    }
}
