//! Downstream dispatch — execution forwarding and fill notification.
//!
//! Execution dispatches pass through a circuit breaker and a bounded
//! in-flight window. When the window is saturated, new dispatches are
//! dropped with a warning rather than queued; the authoritative pollers
//! pick the trade up within seconds as a safety net.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::control::ControlClient;
use crate::limits::circuit_breaker::{is_breaker_failure, CircuitBreaker};

pub struct Dispatcher {
    control: Arc<ControlClient>,
    breaker: Arc<CircuitBreaker>,
    inflight: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(control: Arc<ControlClient>, breaker: CircuitBreaker, inflight_cap: usize) -> Self {
        Self {
            control,
            breaker: Arc::new(breaker),
            inflight: Arc::new(Semaphore::new(inflight_cap)),
        }
    }

    /// Forward a BUY by an execution-target wallet. Never blocks the
    /// ingester: saturation and an open breaker both drop the dispatch.
    pub fn dispatch_execution(&self, wallet: &str, raw: Value) {
        let permit = match Arc::clone(&self.inflight).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(wallet, "in-flight window saturated, dropping execution dispatch");
                return;
            }
        };

        if !self.breaker.try_acquire() {
            debug!(wallet, "circuit open, dropping execution dispatch");
            return;
        }

        let control = Arc::clone(&self.control);
        let breaker = Arc::clone(&self.breaker);
        let wallet = wallet.to_string();
        tokio::spawn(async move {
            let _permit = permit;
            match control.sync_trade(&raw).await {
                Ok(outcome) => {
                    if is_breaker_failure(Some(outcome.status)) {
                        breaker.record_failure();
                        warn!(wallet, status = outcome.status, "sync-trade dispatch failed");
                        return;
                    }
                    breaker.record_success();
                    debug!(wallet, inserted = outcome.inserted, "trade dispatched");

                    // A dispatch that inserted follower orders triggers the
                    // executor, fire-and-forget.
                    if outcome.inserted > 0 {
                        if let Err(e) = control.execute().await {
                            debug!(error = %e, "execute trigger failed");
                        }
                    }
                }
                Err(e) => {
                    if is_breaker_failure(e.status()) {
                        breaker.record_failure();
                    } else {
                        breaker.record_success();
                    }
                    warn!(wallet, error = %e, "sync-trade dispatch errored");
                }
            }
        });
    }

    /// Notify the control plane of a matched outbound order. Best-effort;
    /// missed notifications are reconciled downstream.
    pub fn dispatch_fill(&self, order_id: String) {
        let control = Arc::clone(&self.control);
        tokio::spawn(async move {
            match control.notify_fill(&order_id).await {
                Ok(response) => info!(
                    order_id = %order_id,
                    updated = response.updated,
                    new_status = ?response.new_status,
                    "fill notification delivered"
                ),
                Err(e) => warn!(order_id = %order_id, error = %e, "fill notification failed"),
            }
        });
    }
}
