//! SQL adapters for all pipeline tables. Every write is an idempotent upsert.
//!
//! Table contracts (schema owned by the platform, not migrated here):
//!   trades_feed        PK (trade_id)
//!   positions_current  PK (wallet, market_id)
//!   positions_closed   PK (wallet, market_id, closed_at)
//!   poll_state         PK (wallet)
//!   job_locks          PK (name)
//!   follows            active follow edges, trader_wallet column
//!   traders            tracked wallets, wallet_address column
//!   outbound_orders    open outbound orders, order_id + status columns

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::models::{DbPollState, DbPosition};
use crate::reconcile::PositionCloseEvent;
use crate::upstream::types::{PositionRecord, TradeRow};

/// Upsert batches above this size risk upstream statement timeouts.
pub const TRADE_BATCH_MAX: usize = 500;

// ── Trades ───────────────────────────────────────────────────────

fn push_trade_values<'a>(
    qb: &mut QueryBuilder<'a, Postgres>,
    chunk: &'a [TradeRow],
    now: DateTime<Utc>,
) {
    qb.push_values(chunk, |mut b, row| {
        b.push_bind(&row.trade_id)
            .push_bind(&row.wallet)
            .push_bind(row.tx_hash.as_deref())
            .push_bind(&row.condition_id)
            .push_bind(row.event_slug.as_deref())
            .push_bind(row.market_slug.as_deref())
            .push_bind(row.title.as_deref())
            .push_bind(row.side.as_str())
            .push_bind(row.outcome.as_deref())
            .push_bind(row.outcome_index)
            .push_bind(row.size)
            .push_bind(row.price)
            .push_bind(row.traded_at)
            .push_bind(&row.raw)
            .push_bind(now);
    });
}

const TRADE_COLUMNS: &str = "INSERT INTO trades_feed (trade_id, wallet, tx_hash, condition_id, \
     event_slug, market_slug, title, side, outcome, outcome_index, size, price, traded_at, raw, \
     source_updated_at) ";

/// Batch upsert keyed on `trade_id`; latest-wins on non-identity columns,
/// monotone on `traded_at`. Splits into ≤[`TRADE_BATCH_MAX`] chunks.
pub async fn upsert_trades(pool: &PgPool, rows: &[TradeRow]) -> sqlx::Result<()> {
    let now = Utc::now();
    for chunk in rows.chunks(TRADE_BATCH_MAX) {
        let mut qb = QueryBuilder::<Postgres>::new(TRADE_COLUMNS);
        push_trade_values(&mut qb, chunk, now);
        qb.push(
            " ON CONFLICT (trade_id) DO UPDATE SET \
               wallet = EXCLUDED.wallet, \
               tx_hash = EXCLUDED.tx_hash, \
               condition_id = EXCLUDED.condition_id, \
               event_slug = EXCLUDED.event_slug, \
               market_slug = EXCLUDED.market_slug, \
               title = EXCLUDED.title, \
               side = EXCLUDED.side, \
               outcome = EXCLUDED.outcome, \
               outcome_index = EXCLUDED.outcome_index, \
               size = EXCLUDED.size, \
               price = EXCLUDED.price, \
               traded_at = GREATEST(trades_feed.traded_at, EXCLUDED.traded_at), \
               raw = EXCLUDED.raw, \
               source_updated_at = EXCLUDED.source_updated_at",
        );
        qb.build().execute(pool).await?;
    }
    Ok(())
}

/// Batch insert for the stream path — duplicates already ingested by a
/// poller are silently ignored.
pub async fn insert_trades_ignore_duplicates(
    pool: &PgPool,
    rows: &[TradeRow],
) -> sqlx::Result<()> {
    let now = Utc::now();
    for chunk in rows.chunks(TRADE_BATCH_MAX) {
        let mut qb = QueryBuilder::<Postgres>::new(TRADE_COLUMNS);
        push_trade_values(&mut qb, chunk, now);
        qb.push(" ON CONFLICT (trade_id) DO NOTHING");
        qb.build().execute(pool).await?;
    }
    Ok(())
}

// ── Poll state ───────────────────────────────────────────────────

pub async fn get_poll_state(pool: &PgPool, wallet: &str) -> sqlx::Result<Option<DbPollState>> {
    let row = sqlx::query_as::<_, DbPollState>("SELECT * FROM poll_state WHERE wallet = $1")
        .bind(wallet)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Monotone poll-state upsert. The `GREATEST` guard means a stale writer can
/// never move the watermark backwards, even when two cycles overlap.
pub async fn update_poll_state(
    pool: &PgPool,
    wallet: &str,
    last_trade_time: Option<DateTime<Utc>>,
    last_position_check: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO poll_state (wallet, last_trade_time_seen, last_position_check_at, updated_at)
         VALUES ($1, $2, $3, now())
         ON CONFLICT (wallet) DO UPDATE SET
           last_trade_time_seen = GREATEST(poll_state.last_trade_time_seen, EXCLUDED.last_trade_time_seen),
           last_position_check_at = EXCLUDED.last_position_check_at,
           updated_at = now()",
    )
    .bind(wallet)
    .bind(last_trade_time)
    .bind(last_position_check)
    .execute(pool)
    .await?;
    Ok(())
}

// ── Positions ────────────────────────────────────────────────────

pub async fn get_current_positions(pool: &PgPool, wallet: &str) -> sqlx::Result<Vec<DbPosition>> {
    let rows =
        sqlx::query_as::<_, DbPosition>("SELECT * FROM positions_current WHERE wallet = $1")
            .bind(wallet)
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

/// Pure upsert of the incoming snapshot. Rows absent from the snapshot are
/// not touched here — their disappearance is the reconciler's input, and
/// [`delete_positions`] removes them once the close events are emitted.
pub async fn upsert_current_positions(
    pool: &PgPool,
    wallet: &str,
    snapshot: &[PositionRecord],
    seen_at: DateTime<Utc>,
) -> sqlx::Result<()> {
    if snapshot.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO positions_current (wallet, market_id, size, redeemable, last_seen_at, raw) ",
    );
    qb.push_values(snapshot, |mut b, pos| {
        b.push_bind(wallet)
            .push_bind(&pos.market_id)
            .push_bind(pos.size)
            .push_bind(pos.redeemable)
            .push_bind(seen_at)
            .push_bind(&pos.raw);
    });
    qb.push(
        " ON CONFLICT (wallet, market_id) DO UPDATE SET \
           size = EXCLUDED.size, \
           redeemable = EXCLUDED.redeemable, \
           last_seen_at = EXCLUDED.last_seen_at, \
           raw = EXCLUDED.raw",
    );
    qb.build().execute(pool).await?;
    Ok(())
}

pub async fn delete_positions(
    pool: &PgPool,
    wallet: &str,
    market_ids: &[String],
) -> sqlx::Result<()> {
    if market_ids.is_empty() {
        return Ok(());
    }
    sqlx::query("DELETE FROM positions_current WHERE wallet = $1 AND market_id = ANY($2)")
        .bind(wallet)
        .bind(market_ids)
        .execute(pool)
        .await?;
    Ok(())
}

/// Idempotent close-event emit keyed on `(wallet, market_id, closed_at)`.
pub async fn emit_position_closed(
    pool: &PgPool,
    events: &[PositionCloseEvent],
) -> sqlx::Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO positions_closed (wallet, market_id, closed_at, closed_reason, raw) ",
    );
    qb.push_values(events, |mut b, ev| {
        b.push_bind(&ev.wallet)
            .push_bind(&ev.market_id)
            .push_bind(ev.closed_at)
            .push_bind(ev.reason.as_str())
            .push_bind(&ev.raw);
    });
    qb.push(" ON CONFLICT (wallet, market_id, closed_at) DO NOTHING");
    qb.build().execute(pool).await?;
    Ok(())
}

// ── Named job locks ──────────────────────────────────────────────

/// CAS-style acquisition: writes `locked_until = now + duration` only when
/// the existing lock is absent or expired. Returns whether the lock was won.
pub async fn acquire_named_lock(
    pool: &PgPool,
    name: &str,
    duration: chrono::Duration,
    holder: &str,
) -> sqlx::Result<bool> {
    let locked_until = Utc::now() + duration;
    let row: Option<(String,)> = sqlx::query_as(
        "INSERT INTO job_locks (name, locked_until, holder)
         VALUES ($1, $2, $3)
         ON CONFLICT (name) DO UPDATE SET locked_until = EXCLUDED.locked_until, holder = EXCLUDED.holder
         WHERE job_locks.locked_until IS NULL OR job_locks.locked_until < now()
         RETURNING name",
    )
    .bind(name)
    .bind(locked_until)
    .bind(holder)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Push the expiry forward; only the current holder may extend.
pub async fn extend_named_lock(
    pool: &PgPool,
    name: &str,
    duration: chrono::Duration,
    holder: &str,
) -> sqlx::Result<bool> {
    let locked_until = Utc::now() + duration;
    let result = sqlx::query("UPDATE job_locks SET locked_until = $2 WHERE name = $1 AND holder = $3")
        .bind(name)
        .bind(locked_until)
        .bind(holder)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn release_named_lock(pool: &PgPool, name: &str, holder: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE job_locks SET locked_until = NULL WHERE name = $1 AND holder = $2")
        .bind(name)
        .bind(holder)
        .execute(pool)
        .await?;
    Ok(())
}

// ── Wallet sets ──────────────────────────────────────────────────

/// Distinct lowercased wallets with at least one active follow. A wallet's
/// tier is derived from this set at read time, never stored.
pub async fn get_active_follows(pool: &PgPool) -> sqlx::Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT LOWER(trader_wallet) FROM follows WHERE active = true",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(w,)| w).collect())
}

/// All tracked wallets, lowercased.
pub async fn get_active_traders(pool: &PgPool) -> sqlx::Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT LOWER(wallet_address) FROM traders WHERE wallet_address IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(w,)| w).collect())
}

/// Open outbound order ids, mirrored in memory by the stream ingester for
/// real-time fill detection.
pub async fn get_pending_order_ids(pool: &PgPool) -> sqlx::Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT order_id FROM outbound_orders WHERE status IN ('pending', 'open', 'partially_filled')",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
