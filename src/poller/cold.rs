//! Cold poller — hourly sweep of the long tail of tracked wallets.
//!
//! Exactly one replica performs the sweep at a time, guarded by a named
//! lock whose duration exceeds the sweep interval. Losing the acquisition
//! race is normal; the replica just sleeps out the interval. A heartbeat
//! task extends the lock while the sweep runs, and the lock is released
//! even when the sweep errors or shuts down mid-flight.

use std::collections::HashSet;

use rand::Rng;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::config::ColdPollConfig;
use crate::db::queries;
use crate::poller::PollEngine;

pub const COLD_POLL_LOCK: &str = "cold_poll";

pub struct ColdPoller {
    pool: PgPool,
    engine: PollEngine,
    config: ColdPollConfig,
    holder: String,
    shutdown: watch::Receiver<bool>,
}

impl ColdPoller {
    pub fn new(
        pool: PgPool,
        engine: PollEngine,
        config: ColdPollConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let holder = format!("cold-poller-{}", std::process::id());
        Self {
            pool,
            engine,
            config,
            holder,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let lock_duration = chrono::Duration::seconds(self.config.lock_duration_secs as i64);
        info!(
            interval_secs = self.config.interval_secs,
            holder = %self.holder,
            "cold poller starting"
        );

        while !*self.shutdown.borrow() {
            let acquired = match queries::acquire_named_lock(
                &self.pool,
                COLD_POLL_LOCK,
                lock_duration,
                &self.holder,
            )
            .await
            {
                Ok(acquired) => acquired,
                Err(e) => {
                    error!(error = %e, "lock acquisition failed");
                    false
                }
            };

            if !acquired {
                debug!("another replica holds the cold sweep lock, skipping cycle");
                self.sleep_interval().await;
                continue;
            }

            let heartbeat = self.spawn_heartbeat(lock_duration);
            self.sweep(lock_duration).await;
            heartbeat.abort();

            if let Err(e) =
                queries::release_named_lock(&self.pool, COLD_POLL_LOCK, &self.holder).await
            {
                warn!(error = %e, "failed to release cold sweep lock");
            }

            self.sleep_interval().await;
        }

        // Shutdown may land mid-sweep; releasing an already-released lock is
        // a no-op thanks to the holder guard.
        if let Err(e) = queries::release_named_lock(&self.pool, COLD_POLL_LOCK, &self.holder).await
        {
            warn!(error = %e, "failed to release cold sweep lock on shutdown");
        }
        info!("cold poller stopped");
        Ok(())
    }

    /// One pass over `active_traders \ hot_set`. Wallet errors never
    /// propagate out of the sweep.
    async fn sweep(&mut self, lock_duration: chrono::Duration) {
        let hot: HashSet<String> = match queries::get_active_follows(&self.pool).await {
            Ok(wallets) => wallets.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "failed to read follow set, treating all wallets as cold");
                HashSet::new()
            }
        };

        let traders = match queries::get_active_traders(&self.pool).await {
            Ok(wallets) => wallets,
            Err(e) => {
                error!(error = %e, "failed to read tracked wallets, aborting sweep");
                return;
            }
        };

        let cold: Vec<String> = traders.into_iter().filter(|w| !hot.contains(w)).collect();
        info!(count = cold.len(), "cold sweep starting");

        for (index, wallet) in cold.iter().enumerate() {
            if *self.shutdown.borrow() {
                warn!(processed = index, "cold sweep interrupted by shutdown");
                return;
            }

            if index > 0 && index % self.config.extend_every_wallets == 0 {
                match queries::extend_named_lock(
                    &self.pool,
                    COLD_POLL_LOCK,
                    lock_duration,
                    &self.holder,
                )
                .await
                {
                    Ok(true) => debug!(processed = index, "cold sweep lock extended"),
                    Ok(false) => warn!("cold sweep lock no longer held by this replica"),
                    Err(e) => warn!(error = %e, "failed to extend cold sweep lock"),
                }
            }

            match self.engine.poll_wallet(wallet).await {
                Ok(stats) => debug!(
                    wallet,
                    new_trades = stats.new_trades,
                    close_events = stats.close_events,
                    "cold cycle completed"
                ),
                Err(e) => warn!(wallet, error = %e, "cold cycle failed, moving on"),
            }
        }

        info!(count = cold.len(), "cold sweep finished");
    }

    fn spawn_heartbeat(&self, lock_duration: chrono::Duration) -> tokio::task::JoinHandle<()> {
        let pool = self.pool.clone();
        let holder = self.holder.clone();
        let gap = Duration::from_secs(self.config.heartbeat_secs);
        tokio::spawn(async move {
            loop {
                sleep(gap).await;
                match queries::extend_named_lock(&pool, COLD_POLL_LOCK, lock_duration, &holder)
                    .await
                {
                    Ok(true) => debug!("cold sweep lock heartbeat"),
                    Ok(false) => warn!("heartbeat found the lock held elsewhere"),
                    Err(e) => warn!(error = %e, "heartbeat failed to extend lock"),
                }
            }
        })
    }

    async fn sleep_interval(&mut self) {
        let jitter = rand::thread_rng().gen_range(0..=self.config.jitter_max_secs);
        let total = Duration::from_secs(self.config.interval_secs + jitter);
        tokio::select! {
            _ = sleep(total) => {}
            _ = self.shutdown.changed() => {}
        }
    }
}
