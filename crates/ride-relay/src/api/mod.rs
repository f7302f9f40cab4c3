//! HTTP and WebSocket surface.

mod routes;
mod session;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header::CONTENT_TYPE, Method};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::{AllowedOrigins, Config, ConfigError};
use crate::relay::{ConnectionRegistry, EventRouter, LocationStore};

/// Shared app state.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<EventRouter>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Fresh, empty stores wired into a new router.
    pub fn new(config: Config) -> Self {
        let router = EventRouter::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(LocationStore::new()),
            config.router_options(),
        );
        Self {
            router: Arc::new(router),
            config: Arc::new(config),
        }
    }
}

/// Per-IP limit on WebSocket upgrades, so a reconnect loop cannot churn the registry.
fn ws_rate_limit_layer(
    config: &Config,
) -> Result<
    GovernorLayer<
        tower_governor::key_extractor::PeerIpKeyExtractor,
        governor::middleware::NoOpMiddleware,
        axum::body::Body,
    >,
    ConfigError,
> {
    let governor = GovernorConfigBuilder::default()
        .per_second(config.ws_connect_replenish_secs)
        .burst_size(config.ws_connect_burst)
        .finish()
        .ok_or(ConfigError::InvalidRateLimit)?;
    Ok(GovernorLayer::new(governor))
}

fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    match origins {
        AllowedOrigins::Any => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        AllowedOrigins::List(list) => CorsLayer::new()
            .allow_origin(AllowOrigin::list(list.clone()))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([CONTENT_TYPE])
            .allow_credentials(true),
    }
}

pub fn router(state: AppState) -> Result<Router, ConfigError> {
    let cors = cors_layer(&state.config.cors_origins);
    let ws = Router::new()
        .route("/ws", get(routes::ws_handler))
        .layer(ws_rate_limit_layer(&state.config)?);

    Ok(Router::new()
        .route("/health", get(health))
        .nest("/api", routes::api_routes())
        .merge(ws)
        .layer(cors)
        .with_state(state))
}

/// Serve until `shutdown` resolves. Peer addresses are needed by the upgrade rate limiter.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state)?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}
