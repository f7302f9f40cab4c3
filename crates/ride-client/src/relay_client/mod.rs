//! Relay connections: WebSocket events and the HTTP location snapshot.

pub mod ws;

use anyhow::Result;
use shared::LocationSnapshotEntry;

pub use ws::{complete_ride, track, watch, TrackPlan};

fn locations_url(base_url: &str) -> String {
    format!("{}/api/locations", base_url.trim_end_matches('/'))
}

/// Fetch `GET /api/locations`.
pub async fn fetch_locations(base_url: &str) -> Result<Vec<LocationSnapshotEntry>> {
    let client = reqwest::Client::new();
    let res = client.get(locations_url(base_url)).send().await?;
    if !res.status().is_success() {
        let status = res.status();
        let err: String = res.text().await.unwrap_or_default();
        anyhow::bail!("locations request failed ({}): {}", status, err);
    }
    Ok(res.json().await?)
}
