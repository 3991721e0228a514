//! One polling cycle for one wallet: walk trade pages down to the
//! watermark, flush new rows, fetch the positions snapshot, reconcile, and
//! advance the cursors.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::config::PositionsConfig;
use crate::db::queries;
use crate::error::Result;
use crate::limits::{RateLimiter, RetryPolicy, WalletCooldown};
use crate::reconcile::{self, StoredPosition};
use crate::upstream::types::TradeRow;
use crate::upstream::UpstreamClient;

pub struct PollEngine {
    pool: PgPool,
    upstream: Arc<UpstreamClient>,
    limiter: Arc<RateLimiter>,
    cooldown: WalletCooldown,
    retry: RetryPolicy,
    trades_page_limit: u32,
    positions: PositionsConfig,
}

#[derive(Debug, Default)]
pub struct CycleStats {
    pub new_trades: usize,
    pub close_events: usize,
    pub open_positions: usize,
}

/// What one trade page contributes, relative to the watermark.
struct PageScan {
    kept: Vec<TradeRow>,
    oldest: Option<DateTime<Utc>>,
}

/// Keep rows strictly newer than the watermark. Pages are newest-first, so
/// once a page's oldest row is at or below the watermark, older pages cannot
/// contain new trades.
fn scan_page(rows: Vec<TradeRow>, watermark: Option<DateTime<Utc>>) -> PageScan {
    let mut kept = Vec::with_capacity(rows.len());
    let mut oldest: Option<DateTime<Utc>> = None;

    for row in rows {
        oldest = Some(match oldest {
            Some(o) if o <= row.traded_at => o,
            _ => row.traded_at,
        });
        if watermark.map_or(true, |w| row.traded_at > w) {
            kept.push(row);
        }
    }

    PageScan { kept, oldest }
}

impl PollEngine {
    pub fn new(
        pool: PgPool,
        upstream: Arc<UpstreamClient>,
        limiter: Arc<RateLimiter>,
        cooldown: WalletCooldown,
        trades_page_limit: u32,
        positions: PositionsConfig,
    ) -> Self {
        Self {
            pool,
            upstream,
            limiter,
            cooldown,
            retry: RetryPolicy::default(),
            trades_page_limit,
            positions,
        }
    }

    /// Run one full cycle for `wallet`. Transient upstream errors are
    /// retried inside the HTTP calls; anything that escapes fails this
    /// wallet's cycle only, and the watermark is left unadvanced.
    pub async fn poll_wallet(&self, wallet: &str) -> Result<CycleStats> {
        self.cooldown.wait_if_needed(wallet).await;

        let state = queries::get_poll_state(&self.pool, wallet).await?;
        let watermark = state.and_then(|s| s.last_trade_time_seen);

        let (rows, max_seen) = self.walk_trade_pages(wallet, watermark).await?;
        let new_trades = rows.len();

        for chunk in rows.chunks(queries::TRADE_BATCH_MAX) {
            self.limiter.acquire().await;
            queries::upsert_trades(&self.pool, chunk).await?;
        }

        let snapshot = self
            .retry
            .run("fetch_positions", || self.upstream.fetch_positions(wallet))
            .await?;

        let prev: Vec<StoredPosition> = queries::get_current_positions(&self.pool, wallet)
            .await?
            .into_iter()
            .map(|p| StoredPosition {
                market_id: p.market_id,
                size: p.size,
                redeemable: p.redeemable,
                raw: p.raw,
            })
            .collect();

        let now = Utc::now();
        let upstream = Arc::clone(&self.upstream);
        let outcome = reconcile::reconcile(
            wallet,
            &prev,
            &snapshot,
            now,
            self.positions.size_delta_tolerance,
            self.positions.oracle_concurrency,
            move |market_id: String| {
                let upstream = Arc::clone(&upstream);
                async move { upstream.market_status(&market_id).await }
            },
        )
        .await;

        for change in &outcome.size_changes {
            debug!(
                wallet,
                market_id = %change.market_id,
                prev_size = change.prev_size,
                new_size = change.new_size,
                "position size changed"
            );
        }

        if !outcome.close_events.is_empty() {
            info!(
                wallet,
                count = outcome.close_events.len(),
                "emitting position close events"
            );
            queries::emit_position_closed(&self.pool, &outcome.close_events).await?;
            let closed_ids: Vec<String> = outcome
                .close_events
                .iter()
                .map(|e| e.market_id.clone())
                .collect();
            queries::delete_positions(&self.pool, wallet, &closed_ids).await?;
        }

        queries::upsert_current_positions(&self.pool, wallet, &snapshot, now).await?;
        queries::update_poll_state(&self.pool, wallet, max_seen.or(watermark), now).await?;

        Ok(CycleStats {
            new_trades,
            close_events: outcome.close_events.len(),
            open_positions: snapshot.len(),
        })
    }

    /// Walk the newest-first trade listing until a short page or until a
    /// page bottoms out at the watermark. Returns the kept rows and the
    /// newest timestamp observed.
    async fn walk_trade_pages(
        &self,
        wallet: &str,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<(Vec<TradeRow>, Option<DateTime<Utc>>)> {
        let limit = self.trades_page_limit;
        let mut offset: u32 = 0;
        let mut all: Vec<TradeRow> = Vec::new();
        let mut max_seen: Option<DateTime<Utc>> = None;

        loop {
            let page = self
                .retry
                .run("fetch_trades_page", || {
                    self.upstream.fetch_trades_page(wallet, limit, offset)
                })
                .await?;
            let page_len = page.len() as u32;
            if page_len == 0 {
                break;
            }

            let mut rows = Vec::with_capacity(page.len());
            for raw in &page {
                rows.push(TradeRow::from_upstream(wallet, raw)?);
            }

            let scan = scan_page(rows, watermark);
            for row in &scan.kept {
                max_seen = Some(match max_seen {
                    Some(m) if m >= row.traded_at => m,
                    _ => row.traded_at,
                });
            }
            all.extend(scan.kept);

            if page_len < limit {
                break;
            }
            if let (Some(w), Some(o)) = (watermark, scan.oldest) {
                if o <= w {
                    break;
                }
            }
            offset += page_len;
        }

        debug!(wallet, count = all.len(), "collected new trades");
        Ok((all, max_seen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row_at(secs: i64) -> TradeRow {
        let raw = json!({
            "transactionHash": format!("0x{secs}"),
            "conditionId": "0xc1",
            "side": "BUY",
            "size": 1.0,
            "price": 0.5,
            "timestamp": secs,
        });
        TradeRow::from_upstream("0xw", &raw).unwrap()
    }

    #[test]
    fn watermark_excludes_older_and_equal_timestamps() {
        // Newest-first page: 1500, 1200, 1000, 900, 800 against watermark 1000
        let page = vec![
            row_at(1500),
            row_at(1200),
            row_at(1000),
            row_at(900),
            row_at(800),
        ];
        let watermark = DateTime::<Utc>::from_timestamp(1000, 0);

        let scan = scan_page(page, watermark);

        let kept: Vec<i64> = scan.kept.iter().map(|r| r.traded_at.timestamp()).collect();
        assert_eq!(kept, vec![1500, 1200]);
        assert_eq!(scan.oldest.unwrap().timestamp(), 800);
    }

    #[test]
    fn no_watermark_keeps_the_full_page() {
        let page = vec![row_at(1500), row_at(1200)];
        let scan = scan_page(page, None);
        assert_eq!(scan.kept.len(), 2);
    }
}
