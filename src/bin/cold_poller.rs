//! Cold poller — entry point.
//!
//! Sweeps the long tail of tracked wallets roughly hourly, under a named
//! lock so only one replica sweeps at a time. Releases the lock before
//! exiting on SIGTERM/SIGINT.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use polycopy_pipeline::config::Config;
use polycopy_pipeline::db::pool;
use polycopy_pipeline::limits::{RateLimiter, WalletCooldown};
use polycopy_pipeline::logging::structured::init_logging;
use polycopy_pipeline::poller::{ColdPoller, PollEngine};
use polycopy_pipeline::upstream::UpstreamClient;
use polycopy_pipeline::web;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    init_logging(&config.logging);
    config.require_database()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        interval_secs = config.cold.interval_secs,
        "cold poller starting"
    );

    let db_pool = pool::create_pool(&config.database).await?;
    pool::health_check(&db_pool).await?;
    info!("database connected");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    if config.web.enabled {
        let port = config.web.port;
        tokio::spawn(async move {
            if let Err(e) = web::serve_liveness(port).await {
                error!(error = %e, "liveness endpoint failed");
            }
        });
    }

    let limiter = Arc::new(RateLimiter::new(config.cold.rate_per_sec, config.cold.burst));
    let upstream = Arc::new(UpstreamClient::new(&config.upstream, Arc::clone(&limiter))?);
    let cooldown = WalletCooldown::new(Duration::from_millis(config.cold.wallet_cooldown_ms));
    let engine = PollEngine::new(
        db_pool.clone(),
        upstream,
        limiter,
        cooldown,
        config.upstream.trades_page_limit,
        config.positions.clone(),
    );

    ColdPoller::new(db_pool, engine, config.cold.clone(), shutdown_rx)
        .run()
        .await
}

async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received SIGINT");
    }
}
