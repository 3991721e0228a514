//! Real-time trade-stream ingester.
//!
//! Maintains one WebSocket subscription to the venue's activity topics
//! (`trades` and `orders_matched`), classifies each trade event against the
//! followed and execution-target wallet sets, buffers feed rows for batch
//! upsert, and forwards execution-eligible events through the dispatcher.
//!
//! On socket close the ingester reconnects after a short fixed delay,
//! resubscribes, and refreshes all three caches.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use sqlx::PgPool;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::control::ControlClient;
use crate::db::queries;
use crate::error::PipelineError;
use crate::stream::{Dispatcher, PendingOrders, TradeBuffer, WalletSets};
use crate::upstream::types::{canonical_wallet, Side, TradeRow};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct StreamIngester {
    config: StreamConfig,
    ws_url: String,
    pool: PgPool,
    control: Arc<ControlClient>,
    sets: Arc<WalletSets>,
    pending: Arc<PendingOrders>,
    buffer: TradeBuffer,
    dispatcher: Dispatcher,
    shutdown: watch::Receiver<bool>,
}

impl StreamIngester {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StreamConfig,
        ws_url: String,
        pool: PgPool,
        control: Arc<ControlClient>,
        sets: Arc<WalletSets>,
        pending: Arc<PendingOrders>,
        dispatcher: Dispatcher,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let buffer = TradeBuffer::new(config.buffer_max_size);
        Self {
            config,
            ws_url,
            pool,
            control,
            sets,
            pending,
            buffer,
            dispatcher,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let reconnect_delay = Duration::from_secs(self.config.reconnect_delay_secs);
        self.refresh_all_caches().await;

        while !*self.shutdown.borrow() {
            info!(url = %self.ws_url, "connecting to activity stream");
            match connect_async(self.ws_url.as_str()).await {
                Ok((ws, _)) => {
                    info!("activity stream connected");
                    if let Err(e) = self.consume(ws).await {
                        warn!(error = %e, "stream session ended");
                    }
                }
                Err(e) => {
                    error!(error = %e, "activity stream connection failed");
                }
            }

            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = sleep(reconnect_delay) => {}
                _ = self.shutdown.changed() => break,
            }
            self.refresh_all_caches().await;
        }

        // Final flush so shutdown loses nothing already classified.
        self.flush_rows(self.buffer.drain()).await;
        info!("stream ingester stopped");
        Ok(())
    }

    async fn consume(&self, ws: WsStream) -> Result<(), PipelineError> {
        let mut shutdown = self.shutdown.clone();
        let (mut write, mut read) = ws.split();

        let subscribe = serde_json::json!({
            "action": "subscribe",
            "subscriptions": [
                { "topic": "activity", "type": "trades" },
                { "topic": "activity", "type": "orders_matched" },
            ]
        });
        write
            .send(tungstenite::Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| PipelineError::WebSocket(e.to_string()))?;
        info!("subscribed to activity topics");

        let mut flush_tick = interval(Duration::from_millis(self.config.buffer_flush_ms));
        let mut sets_tick = interval(Duration::from_secs(self.config.sets_refresh_secs));
        let mut orders_tick =
            interval(Duration::from_secs(self.config.pending_orders_refresh_secs));
        let mut ping_tick = interval(Duration::from_secs(10));
        for tick in [&mut flush_tick, &mut sets_tick, &mut orders_tick, &mut ping_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await; // skip the immediate first tick
        }

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            self.handle_message(&text).await;
                        }
                        Some(Ok(tungstenite::Message::Ping(data))) => {
                            let _ = write.send(tungstenite::Message::Pong(data)).await;
                        }
                        Some(Ok(tungstenite::Message::Close(_))) => {
                            warn!("activity stream closed by server");
                            break;
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "activity stream error");
                            break;
                        }
                        None => {
                            warn!("activity stream ended");
                            break;
                        }
                        _ => {}
                    }
                }
                _ = flush_tick.tick() => {
                    self.flush_rows(self.buffer.drain()).await;
                }
                _ = sets_tick.tick() => {
                    self.refresh_wallet_sets().await;
                }
                _ = orders_tick.tick() => {
                    self.refresh_pending_orders().await;
                }
                _ = ping_tick.tick() => {
                    if write.send(tungstenite::Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    break;
                }
            }
        }

        self.flush_rows(self.buffer.drain()).await;
        Ok(())
    }

    async fn handle_message(&self, text: &str) {
        if text == "pong" || text == "PONG" {
            return;
        }
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, text_len = text.len(), "unparseable stream message");
                return;
            }
        };

        // The feed sends both single events and arrays of events.
        match value {
            Value::Array(events) => {
                for event in events {
                    self.handle_event(&event).await;
                }
            }
            event => self.handle_event(&event).await,
        }
    }

    async fn handle_event(&self, event: &Value) {
        let event_type = event
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        // Some deployments nest the event under `payload`, some flatten it.
        let payload = event.get("payload").unwrap_or(event);

        match event_type {
            "trades" | "trade" => self.handle_trade(payload).await,
            "orders_matched" => self.handle_orders_matched(payload).await,
            other => debug!(event_type = other, "unhandled stream event type"),
        }
    }

    async fn handle_trade(&self, payload: &Value) {
        let wallet = match payload
            .get("proxyWallet")
            .or_else(|| payload.get("wallet"))
            .or_else(|| payload.get("user"))
            .and_then(Value::as_str)
        {
            Some(w) => canonical_wallet(w),
            None => {
                debug!("trade event without a wallet field");
                return;
            }
        };

        let (follow, target) = self.sets.snapshot();
        let followed = follow.contains(&wallet);
        let targeted = target.contains(&wallet);
        if !followed && !targeted {
            return;
        }

        let row = match TradeRow::from_upstream(&wallet, payload) {
            Ok(row) => row,
            Err(e) => {
                warn!(wallet, error = %e, "malformed stream trade event");
                return;
            }
        };
        let is_buy = row.side == Side::Buy;

        if let Some(batch) = self.buffer.push(row) {
            self.flush_rows(batch).await;
        }

        if is_buy && targeted {
            self.dispatcher.dispatch_execution(&wallet, payload.clone());
        }
    }

    async fn handle_orders_matched(&self, payload: &Value) {
        let mut order_ids: Vec<String> = Vec::new();
        for key in ["takerOrderId", "makerOrderId"] {
            if let Some(id) = payload.get(key).and_then(Value::as_str) {
                order_ids.push(id.to_string());
            }
        }
        if let Some(makers) = payload.get("makerOrders").and_then(Value::as_array) {
            for maker in makers {
                if let Some(id) = maker.get("orderId").and_then(Value::as_str) {
                    order_ids.push(id.to_string());
                }
            }
        }

        for order_id in order_ids {
            if self.pending.remove(&order_id) {
                info!(order_id = %order_id, "outbound order matched on stream");
                self.dispatcher.dispatch_fill(order_id);
            }
        }
    }

    async fn flush_rows(&self, rows: Vec<TradeRow>) {
        if rows.is_empty() {
            return;
        }
        let count = rows.len();
        match queries::insert_trades_ignore_duplicates(&self.pool, &rows).await {
            Ok(()) => debug!(count, "flushed feed rows"),
            // Dropped rows are re-ingested by the pollers within a cycle.
            Err(e) => error!(count, error = %e, "feed flush failed"),
        }
    }

    async fn refresh_all_caches(&self) {
        self.refresh_wallet_sets().await;
        self.refresh_pending_orders().await;
    }

    async fn refresh_wallet_sets(&self) {
        match queries::get_active_follows(&self.pool).await {
            Ok(wallets) => {
                let set: HashSet<String> = wallets.into_iter().collect();
                debug!(count = set.len(), "follow set refreshed");
                self.sets.swap_follow(set);
            }
            Err(e) => warn!(error = %e, "follow set refresh failed, keeping stale snapshot"),
        }

        match self.control.target_traders().await {
            Ok(response) => {
                let set: HashSet<String> = response
                    .traders
                    .iter()
                    .map(|w| canonical_wallet(w))
                    .collect();
                debug!(count = set.len(), "target set refreshed");
                self.sets.swap_target(set);
            }
            Err(e) => warn!(error = %e, "target set refresh failed, keeping stale snapshot"),
        }
    }

    async fn refresh_pending_orders(&self) {
        match queries::get_pending_order_ids(&self.pool).await {
            Ok(ids) => {
                debug!(count = ids.len(), "pending orders refreshed");
                self.pending.replace(ids);
            }
            Err(e) => warn!(error = %e, "pending orders refresh failed, keeping stale cache"),
        }
    }
}
