//! Stream ingester — entry point.
//!
//! Consumes the venue's real-time activity feed, maintains the feed table,
//! and forwards execution-eligible trades to the control plane. Flushes its
//! buffer and closes the socket on SIGTERM/SIGINT.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use polycopy_pipeline::config::Config;
use polycopy_pipeline::control::ControlClient;
use polycopy_pipeline::db::pool;
use polycopy_pipeline::limits::CircuitBreaker;
use polycopy_pipeline::logging::structured::init_logging;
use polycopy_pipeline::stream::{Dispatcher, PendingOrders, StreamIngester, WalletSets};
use polycopy_pipeline::{watchdog, web};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    init_logging(&config.logging);
    config.require_database()?;
    config.require_downstream()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        ws_url = %config.upstream.ws_url,
        "stream ingester starting"
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

    watchdog::spawn(
        config.stream.memory_limit_mb,
        config.stream.memory_warn_fraction,
    );

    let control = Arc::new(ControlClient::new(&config.downstream)?);
    let breaker = CircuitBreaker::new(
        config.stream.breaker_failure_threshold,
        Duration::from_secs(config.stream.breaker_open_secs),
    );
    let dispatcher = Dispatcher::new(Arc::clone(&control), breaker, config.stream.inflight_cap);

    let ingester = StreamIngester::new(
        config.stream.clone(),
        config.upstream.ws_url.clone(),
        db_pool,
        control,
        Arc::new(WalletSets::new()),
        Arc::new(PendingOrders::new()),
        dispatcher,
        shutdown_rx,
    );

    ingester.run().await
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
