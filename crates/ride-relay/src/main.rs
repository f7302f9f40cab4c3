//! Ride relay — WebSocket presence and ride-event server.
//!
//! Optional env: HOST, PORT, CORS_ORIGINS, FANOUT_CAPACITY, DIRECT_QUEUE_CAPACITY,
//! PING_INTERVAL_SECS, SNAPSHOT_ON_CONNECT, WS_CONNECT_REPLENISH_SECS, WS_CONNECT_BURST

use std::net::SocketAddr;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use ride_relay::{api, config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {}", e))?;

    let state = api::AppState::new(config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Ride relay listening on {}", addr);
    api::serve(listener, state, shutdown_signal()).await?;

    tracing::info!("Ride relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
