//! End-to-end checks for the pure pipeline pieces: trade typing, watermark
//! boundaries, reconciliation classification, and replay determinism.

use chrono::Utc;
use serde_json::json;

use polycopy_pipeline::reconcile::{reconcile, CloseReason, StoredPosition};
use polycopy_pipeline::upstream::types::{canonical_wallet, PositionRecord, TradeRow};
use polycopy_pipeline::upstream::MarketStatus;

fn stored(market_id: &str, size: f64, redeemable: bool) -> StoredPosition {
    StoredPosition {
        market_id: market_id.to_string(),
        size,
        redeemable,
        raw: json!({ "conditionId": market_id, "size": size, "redeemable": redeemable }),
    }
}

fn current(market_id: &str, size: f64) -> PositionRecord {
    PositionRecord {
        market_id: market_id.to_string(),
        size,
        redeemable: false,
        raw: json!({ "conditionId": market_id, "size": size }),
    }
}

#[test]
fn wallets_are_canonicalized_lowercase() {
    assert_eq!(
        canonical_wallet("  0xDB27BF2aC5d428A9C63dbc914611036855A6C56E "),
        "0xdb27bf2ac5d428a9c63dbc914611036855a6c56e"
    );
}

#[test]
fn trade_rows_from_poll_and_stream_shapes_collapse_to_one_identity() {
    // The HTTP listing and the stream event mirror each other; both must
    // produce the same trade_id so the idempotent upsert collapses them.
    let http_shape = json!({
        "transactionHash": "0xdeadbeef",
        "conditionId": "0xc0ffee",
        "side": "BUY",
        "outcome": "Yes",
        "outcomeIndex": 0,
        "size": "150.5",
        "price": "0.62",
        "timestamp": 1_700_000_100,
        "title": "Will it rain tomorrow?",
    });
    let ws_shape = json!({
        "transactionHash": "0xdeadbeef",
        "conditionId": "0xc0ffee",
        "side": "BUY",
        "outcome": "Yes",
        "outcomeIndex": 0,
        "size": 150.5,
        "price": 0.62,
        "timestamp": 1_700_000_100_000i64,
        "title": "Will it rain tomorrow?",
    });

    let from_http = TradeRow::from_upstream("0xAB", &http_shape).unwrap();
    let from_ws = TradeRow::from_upstream("0xab", &ws_shape).unwrap();

    assert_eq!(from_http.trade_id, from_ws.trade_id);
    assert_eq!(from_http.traded_at, from_ws.traded_at);
    assert_eq!(from_http.size, from_ws.size);
}

#[tokio::test]
async fn mixed_disappearances_classify_independently() {
    let prev = vec![
        stored("m_closed", 5.0, false),
        stored("m_manual", 3.0, false),
        stored("m_redeemed", 2.0, true),
        stored("m_kept", 7.0, false),
    ];
    let curr = vec![current("m_kept", 7.0)];
    let now = Utc::now();

    let outcome = reconcile("0xw", &prev, &curr, now, 0.01, 3, |market_id: String| async move {
        match market_id.as_str() {
            "m_closed" => MarketStatus::Closed,
            _ => MarketStatus::Unknown,
        }
    })
    .await;

    assert_eq!(outcome.close_events.len(), 3);
    let reason_for = |id: &str| {
        outcome
            .close_events
            .iter()
            .find(|e| e.market_id == id)
            .map(|e| e.reason)
    };
    assert_eq!(reason_for("m_closed"), Some(CloseReason::MarketClosed));
    assert_eq!(reason_for("m_manual"), Some(CloseReason::ManualClose));
    assert_eq!(reason_for("m_redeemed"), Some(CloseReason::Redeemed));
    assert_eq!(reason_for("m_kept"), None);

    for event in &outcome.close_events {
        assert_eq!(event.closed_at, now);
        assert_eq!(event.wallet, "0xw");
    }
}

#[tokio::test]
async fn replaying_the_same_cycle_emits_an_identical_event_set() {
    let prev = vec![stored("m1", 5.0, false), stored("m2", 1.0, true)];
    let curr: Vec<PositionRecord> = Vec::new();
    let now = Utc::now();

    let oracle = |market_id: String| async move {
        if market_id == "m1" {
            MarketStatus::Closed
        } else {
            MarketStatus::Unknown
        }
    };

    let first = reconcile("0xw", &prev, &curr, now, 0.01, 2, oracle).await;
    let second = reconcile("0xw", &prev, &curr, now, 0.01, 2, oracle).await;

    let keys = |events: &[polycopy_pipeline::reconcile::PositionCloseEvent]| {
        events
            .iter()
            .map(|e| (e.wallet.clone(), e.market_id.clone(), e.closed_at, e.reason))
            .collect::<Vec<_>>()
    };
    assert_eq!(keys(&first.close_events), keys(&second.close_events));
}
