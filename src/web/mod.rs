//! Liveness endpoint — each worker answers 200 "ok" on a fixed port.
//! No readiness probe; workers self-recover.

use axum::{routing::get, Router};
use tracing::info;

async fn health() -> &'static str {
    "ok"
}

pub async fn serve_liveness(port: u16) -> anyhow::Result<()> {
    let app = Router::new().route("/health", get(health));
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "liveness endpoint starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
