//! WebSocket client for the ride relay.

use std::time::Duration;

use anyhow::Result;
use futures_util::{Sink, SinkExt, StreamExt};
use shared::{
    ClientEvent, Identity, LocationPayload, RegisterUserPayload, RidePayload, ServerEvent,
    WsEnvelope,
};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

/// How `track` moves and paces its updates.
#[derive(Debug, Clone)]
pub struct TrackPlan {
    pub user: Identity,
    pub latitude: f64,
    pub longitude: f64,
    /// Degrees added to both coordinates per update.
    pub step: f64,
    pub interval: Duration,
    pub count: Option<u64>,
}

impl TrackPlan {
    /// Position for the `n`th update. Latitude is clamped, longitude wraps around.
    pub fn position(&self, n: u64) -> (f64, f64) {
        let delta = self.step * n as f64;
        let lat = (self.latitude + delta).clamp(-90.0, 90.0);
        let lon = (self.longitude + delta + 180.0).rem_euclid(360.0) - 180.0;
        (lat, lon)
    }
}

async fn send_event<S>(ws_tx: &mut S, event: &ClientEvent) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(&event.to_envelope())?;
    ws_tx.send(Message::Text(json)).await?;
    Ok(())
}

/// Decode a relay frame, or `None` for anything this client does not understand.
pub fn decode_frame(text: &str) -> Option<ServerEvent> {
    let envelope = match WsEnvelope::parse(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable frame from relay");
            return None;
        }
    };
    match ServerEvent::from_envelope(&envelope) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "malformed event from relay");
            None
        }
    }
}

fn fmt_coord(v: Option<f64>) -> String {
    v.map(|v| format!("{:.6}", v))
        .unwrap_or_else(|| "?".to_string())
}

/// One-line human description of an event.
pub fn describe(event: &ServerEvent) -> String {
    match event {
        ServerEvent::LocationUpdate(p) => format!(
            "location {} lat={} lon={}",
            p.user_id,
            fmt_coord(p.latitude),
            fmt_coord(p.longitude)
        ),
        ServerEvent::RideCompleted(p) => format!(
            "ride {} completed (passenger {}, driver {})",
            p.ride_index, p.passenger_id, p.driver_id
        ),
    }
}

async fn print_events<S>(mut ws_rx: S) -> Result<()>
where
    S: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(t)) => {
                if let Some(event) = decode_frame(&t) {
                    println!("{}", describe(&event));
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => return Err(e.into()),
            _ => continue,
        }
    }
    Ok(())
}

/// Print events until the relay closes the connection.
pub async fn watch(ws_url: &str, user: Option<Identity>) -> Result<()> {
    let (ws, _) = connect_async(ws_url).await?;
    tracing::info!("connected to {}", ws_url);
    let (mut ws_tx, ws_rx) = ws.split();
    if let Some(user) = user {
        send_event(
            &mut ws_tx,
            &ClientEvent::RegisterUser(RegisterUserPayload { user_id: user }),
        )
        .await?;
    }
    print_events(ws_rx).await
}

/// Register, then send `plan.count` position updates (or until interrupted).
pub async fn track(ws_url: &str, plan: TrackPlan) -> Result<()> {
    let (ws, _) = connect_async(ws_url).await?;
    tracing::info!(user = %plan.user, "connected to {}", ws_url);
    let (mut ws_tx, ws_rx) = ws.split();

    send_event(
        &mut ws_tx,
        &ClientEvent::RegisterUser(RegisterUserPayload {
            user_id: plan.user.clone(),
        }),
    )
    .await?;

    let printer = tokio::spawn(async move {
        if let Err(e) = print_events(ws_rx).await {
            tracing::warn!(error = %e, "relay connection lost");
        }
    });

    let mut ticker = tokio::time::interval(plan.interval);
    let mut sent = 0u64;
    while plan.count.map_or(true, |max| sent < max) {
        ticker.tick().await;
        if printer.is_finished() {
            anyhow::bail!("relay closed the connection");
        }
        let (latitude, longitude) = plan.position(sent);
        send_event(
            &mut ws_tx,
            &ClientEvent::UpdateLocation(LocationPayload {
                user_id: plan.user.clone(),
                latitude: Some(latitude),
                longitude: Some(longitude),
            }),
        )
        .await?;
        tracing::debug!(latitude, longitude, "position sent");
        sent += 1;
    }

    if let Err(e) = ws_tx.send(Message::Close(None)).await {
        tracing::debug!(error = %e, "close frame not sent");
    }
    printer.abort();
    Ok(())
}

/// Send a single `completeRide` and close.
pub async fn complete_ride(ws_url: &str, ride: RidePayload) -> Result<()> {
    let (ws, _) = connect_async(ws_url).await?;
    let (mut ws_tx, _ws_rx) = ws.split();
    let ride_index = ride.ride_index;
    send_event(&mut ws_tx, &ClientEvent::CompleteRide(ride)).await?;
    ws_tx.send(Message::Close(None)).await?;
    tracing::info!(ride_index, "completeRide sent");
    Ok(())
}
