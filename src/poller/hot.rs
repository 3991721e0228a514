//! Hot poller — high-frequency sweep of the active follow set.
//!
//! Wallets are polled sequentially to honor a single rate-limit budget.
//! Timeouts are tolerated; other errors count toward a per-cycle budget
//! that, when exhausted, crashes the process so the supervisor restarts it.

use sqlx::PgPool;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::HotPollConfig;
use crate::db::queries;
use crate::poller::PollEngine;

pub struct HotPoller {
    pool: PgPool,
    engine: PollEngine,
    config: HotPollConfig,
    shutdown: watch::Receiver<bool>,
}

impl HotPoller {
    pub fn new(
        pool: PgPool,
        engine: PollEngine,
        config: HotPollConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            engine,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let interval = Duration::from_millis(self.config.interval_ms);
        info!(interval_ms = self.config.interval_ms, "hot poller starting");

        while !*self.shutdown.borrow() {
            let cycle_start = Instant::now();

            let wallets = match queries::get_active_follows(&self.pool).await {
                Ok(w) => w,
                Err(e) => {
                    error!(error = %e, "failed to read follow set");
                    self.sleep_or_shutdown(interval).await;
                    continue;
                }
            };

            if wallets.is_empty() {
                debug!("no active follows, idling");
                self.sleep_or_shutdown(interval).await;
                continue;
            }

            // Error budget resets at the start of each cycle.
            let mut errors = 0usize;

            for wallet in &wallets {
                if *self.shutdown.borrow() {
                    break;
                }
                match self.engine.poll_wallet(wallet).await {
                    Ok(stats) => {
                        debug!(
                            wallet,
                            new_trades = stats.new_trades,
                            close_events = stats.close_events,
                            "hot cycle completed"
                        );
                    }
                    Err(e) if e.is_timeout() => {
                        warn!(wallet, error = %e, "poll cycle timed out, skipping wallet");
                    }
                    Err(e) => {
                        error!(wallet, error = %e, "poll cycle failed");
                        errors += 1;
                        if errors >= self.config.error_budget {
                            anyhow::bail!(
                                "hot poller error budget exhausted: {errors} failures in one cycle"
                            );
                        }
                    }
                }
            }

            let elapsed = cycle_start.elapsed();
            if let Some(rest) = interval.checked_sub(elapsed) {
                self.sleep_or_shutdown(rest).await;
            }
        }

        info!("hot poller stopped");
        Ok(())
    }

    async fn sleep_or_shutdown(&mut self, duration: Duration) {
        tokio::select! {
            _ = sleep(duration) => {}
            _ = self.shutdown.changed() => {}
        }
    }
}
