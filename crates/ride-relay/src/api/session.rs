//! One WebSocket connection: a reader loop feeding the router and a writer task draining the inbox.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use shared::{ClientEvent, WsEnvelope};

use crate::api::AppState;
use crate::relay::{EventRouter, Session};

pub async fn run(socket: WebSocket, state: AppState, peer: SocketAddr) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let router = state.router.clone();
    let (mut session, mut inbox) = router.connect();
    tracing::debug!(session = %session.id(), %peer, "websocket upgraded");

    let mut ping_interval = tokio::time::interval(state.config.ping_interval);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = inbox.recv() => {
                    let Some(event) = event else { break };
                    let envelope = event.to_envelope(Some(
                        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    ));
                    let json = match serde_json::to_string(&envelope) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::warn!(session = %inbox.session(), error = %e, "failed to encode event");
                            continue;
                        }
                    };
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_frame(&router, &mut session, text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(session = %session.id(), error = %e, "websocket read failed");
                break;
            }
        }
    }

    writer.abort();
    router.disconnect(session);
}

/// Decode one text frame and apply it. Bad frames are logged and skipped, never fatal.
fn handle_frame(router: &EventRouter, session: &mut Session, text: &str) {
    let envelope = match WsEnvelope::parse(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(session = %session.id(), error = %e, "ignoring unparseable frame");
            return;
        }
    };
    match ClientEvent::from_envelope(&envelope) {
        Ok(Some(event)) => {
            let name = event.name();
            let outcome = router.handle(session, event);
            tracing::debug!(session = %session.id(), event = name, ?outcome, "handled");
        }
        Ok(None) => {
            tracing::debug!(session = %session.id(), r#type = %envelope.r#type, "ignoring unknown event");
        }
        Err(e) => {
            tracing::warn!(session = %session.id(), error = %e, "ignoring malformed event");
        }
    }
}
