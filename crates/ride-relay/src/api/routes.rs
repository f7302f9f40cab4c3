//! API route handlers.

use std::net::SocketAddr;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    routing::get,
    Json, Router,
};

use shared::LocationSnapshotEntry;

use super::session;
use crate::api::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new().route("/locations", get(locations_list))
}

/// Current location table; ephemeral, nothing older than the live sessions.
async fn locations_list(State(state): State<AppState>) -> Json<Vec<LocationSnapshotEntry>> {
    Json(state.router.locations().snapshot())
}

// --- WebSocket ---

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| session::run(socket, state, peer))
}
