//! Position reconciler — diffs the previous stored snapshot against a fresh
//! one and emits idempotent lifecycle events.
//!
//! Pure over its inputs and the oracle: replaying with identical inputs
//! yields an identical event set, which combined with the
//! `(wallet, market_id, closed_at)` emit key makes close events exactly-once
//! in practice.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use serde_json::Value;

use crate::upstream::types::{MarketStatus, PositionRecord};

/// Why a position ceased to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ManualClose,
    MarketClosed,
    Redeemed,
    /// Reserved for partial reductions; never emitted today.
    #[allow(dead_code)]
    Partial,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ManualClose => "manual_close",
            CloseReason::MarketClosed => "market_closed",
            CloseReason::Redeemed => "redeemed",
            CloseReason::Partial => "partial",
        }
    }
}

/// Immutable record that a `(wallet, market_id)` position ceased to exist.
#[derive(Debug, Clone)]
pub struct PositionCloseEvent {
    pub wallet: String,
    pub market_id: String,
    pub closed_at: DateTime<Utc>,
    pub reason: CloseReason,
    /// Last-seen payload of the position, for forensic replay.
    pub raw: Value,
}

/// A surviving position whose size moved by more than the tolerance.
/// A partial reduction is not a close; this is reported for logging only.
#[derive(Debug, Clone)]
pub struct SizeChange {
    pub market_id: String,
    pub prev_size: f64,
    pub new_size: f64,
}

/// A position as previously stored, the reconciler's `prev` input.
#[derive(Debug, Clone)]
pub struct StoredPosition {
    pub market_id: String,
    pub size: f64,
    pub redeemable: bool,
    pub raw: Value,
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub close_events: Vec<PositionCloseEvent>,
    pub size_changes: Vec<SizeChange>,
}

/// Diff `prev` against `curr` for one wallet.
///
/// Disappearances are classified through the oracle with bounded
/// concurrency. A position last seen as redeemable closes as `redeemed`
/// without consulting the oracle. `Unknown` oracle answers classify as
/// `manual_close`: a market we cannot confirm closed is treated as an
/// explicit exit by the holder.
pub async fn reconcile<F, Fut>(
    wallet: &str,
    prev: &[StoredPosition],
    curr: &[PositionRecord],
    now: DateTime<Utc>,
    size_tolerance: f64,
    oracle_concurrency: usize,
    oracle: F,
) -> ReconcileOutcome
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = MarketStatus>,
{
    let curr_by_id: HashMap<&str, &PositionRecord> =
        curr.iter().map(|p| (p.market_id.as_str(), p)).collect();

    let mut disappeared: Vec<&StoredPosition> = Vec::new();
    let mut size_changes = Vec::new();

    for stored in prev {
        match curr_by_id.get(stored.market_id.as_str()) {
            None => disappeared.push(stored),
            Some(current) => {
                if (stored.size - current.size).abs() > size_tolerance {
                    size_changes.push(SizeChange {
                        market_id: stored.market_id.clone(),
                        prev_size: stored.size,
                        new_size: current.size,
                    });
                }
            }
        }
    }

    // Redeemable positions skip the oracle; everything else is classified
    // by the authoritative market status, in one bounded parallel batch.
    let (redeemed, to_probe): (Vec<_>, Vec<_>) =
        disappeared.into_iter().partition(|p| p.redeemable);

    let mut close_events: Vec<PositionCloseEvent> = redeemed
        .into_iter()
        .map(|p| PositionCloseEvent {
            wallet: wallet.to_string(),
            market_id: p.market_id.clone(),
            closed_at: now,
            reason: CloseReason::Redeemed,
            raw: p.raw.clone(),
        })
        .collect();

    let probed: Vec<(&StoredPosition, MarketStatus)> = stream::iter(to_probe)
        .map(|p| {
            let status = oracle(p.market_id.clone());
            async move { (p, status.await) }
        })
        .buffer_unordered(oracle_concurrency.max(1))
        .collect()
        .await;

    for (stored, status) in probed {
        let reason = match status {
            MarketStatus::Closed => CloseReason::MarketClosed,
            MarketStatus::Open | MarketStatus::Unknown => CloseReason::ManualClose,
        };
        close_events.push(PositionCloseEvent {
            wallet: wallet.to_string(),
            market_id: stored.market_id.clone(),
            closed_at: now,
            reason,
            raw: stored.raw.clone(),
        });
    }

    // buffer_unordered completes out of order; keep the event set
    // deterministic for replay comparison.
    close_events.sort_by(|a, b| a.market_id.cmp(&b.market_id));

    ReconcileOutcome {
        close_events,
        size_changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(market_id: &str, size: f64) -> StoredPosition {
        StoredPosition {
            market_id: market_id.to_string(),
            size,
            redeemable: false,
            raw: json!({ "conditionId": market_id, "size": size }),
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

    fn oracle_fixed(
        answers: Vec<(&'static str, MarketStatus)>,
    ) -> impl Fn(String) -> std::future::Ready<MarketStatus> {
        move |market_id: String| {
            let status = answers
                .iter()
                .find(|(m, _)| *m == market_id)
                .map(|(_, s)| *s)
                .unwrap_or(MarketStatus::Unknown);
            std::future::ready(status)
        }
    }

    #[tokio::test]
    async fn disappearance_with_closed_market_classifies_market_closed() {
        let prev = vec![stored("m1", 5.0), stored("m2", 3.0)];
        let curr = vec![current("m1", 5.0)];
        let now = Utc::now();

        let outcome = reconcile(
            "0xw",
            &prev,
            &curr,
            now,
            0.01,
            5,
            oracle_fixed(vec![("m2", MarketStatus::Closed)]),
        )
        .await;

        assert_eq!(outcome.close_events.len(), 1);
        let ev = &outcome.close_events[0];
        assert_eq!(ev.market_id, "m2");
        assert_eq!(ev.reason, CloseReason::MarketClosed);
        assert_eq!(ev.closed_at, now);
        assert!(outcome.size_changes.is_empty());
    }

    #[tokio::test]
    async fn oracle_uncertainty_classifies_manual_close() {
        let prev = vec![stored("m1", 5.0), stored("m2", 3.0)];
        let curr = vec![current("m1", 5.0)];

        let outcome = reconcile(
            "0xw",
            &prev,
            &curr,
            Utc::now(),
            0.01,
            5,
            oracle_fixed(vec![("m2", MarketStatus::Unknown)]),
        )
        .await;

        assert_eq!(outcome.close_events.len(), 1);
        assert_eq!(outcome.close_events[0].reason, CloseReason::ManualClose);
    }

    #[tokio::test]
    async fn partial_reduction_is_not_a_close() {
        let prev = vec![stored("m1", 5.0)];
        let curr = vec![current("m1", 2.0)];

        let outcome = reconcile(
            "0xw",
            &prev,
            &curr,
            Utc::now(),
            0.01,
            5,
            oracle_fixed(vec![]),
        )
        .await;

        assert!(outcome.close_events.is_empty());
        assert_eq!(outcome.size_changes.len(), 1);
        assert_eq!(outcome.size_changes[0].new_size, 2.0);
    }

    #[tokio::test]
    async fn size_jitter_within_tolerance_is_ignored() {
        let prev = vec![stored("m1", 5.0)];
        let curr = vec![current("m1", 5.005)];

        let outcome = reconcile(
            "0xw",
            &prev,
            &curr,
            Utc::now(),
            0.01,
            5,
            oracle_fixed(vec![]),
        )
        .await;

        assert!(outcome.close_events.is_empty());
        assert!(outcome.size_changes.is_empty());
    }

    #[tokio::test]
    async fn empty_current_snapshot_closes_everything() {
        let prev = vec![stored("m1", 1.0), stored("m2", 2.0), stored("m3", 3.0)];
        let curr: Vec<PositionRecord> = Vec::new();

        let outcome = reconcile(
            "0xw",
            &prev,
            &curr,
            Utc::now(),
            0.01,
            2,
            oracle_fixed(vec![("m1", MarketStatus::Closed)]),
        )
        .await;

        assert_eq!(outcome.close_events.len(), prev.len());
    }

    #[tokio::test]
    async fn redeemable_positions_close_as_redeemed_without_oracle() {
        let mut pos = stored("m1", 5.0);
        pos.redeemable = true;

        let outcome = reconcile(
            "0xw",
            &[pos],
            &[],
            Utc::now(),
            0.01,
            5,
            |_m: String| async move { panic!("oracle must not be consulted") },
        )
        .await;

        assert_eq!(outcome.close_events.len(), 1);
        assert_eq!(outcome.close_events[0].reason, CloseReason::Redeemed);
    }

    #[tokio::test]
    async fn replay_with_identical_inputs_is_identical() {
        let prev = vec![stored("m1", 5.0), stored("m2", 3.0), stored("m3", 1.0)];
        let curr = vec![current("m2", 3.0)];
        let now = Utc::now();
        let answers = [
            ("m1", MarketStatus::Closed),
            ("m3", MarketStatus::Open),
        ];

        let a = reconcile("0xw", &prev, &curr, now, 0.01, 2, oracle_fixed(answers.to_vec())).await;
        let b = reconcile("0xw", &prev, &curr, now, 0.01, 2, oracle_fixed(answers.to_vec())).await;

        let key = |events: &[PositionCloseEvent]| {
            events
                .iter()
                .map(|e| (e.market_id.clone(), e.reason, e.closed_at))
                .collect::<Vec<_>>()
        };
        assert_eq!(key(&a.close_events), key(&b.close_events));
    }
}
