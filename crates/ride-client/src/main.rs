//! Ride relay client — command-line stand-in for the rider/driver app.

use std::env;
use std::time::Duration;

use clap::Parser;
use ride_client::{cli, relay_client};
use shared::{Identity, RidePayload};
use tracing_subscriber::EnvFilter;

fn identity(raw: String) -> anyhow::Result<Identity> {
    Identity::new(raw).map_err(|e| anyhow::anyhow!("{}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = cli::Cli::parse();
    let ws_url = env::var("RELAY_WS_URL").unwrap_or_else(|_| "ws://localhost:3000/ws".to_string());

    match cli.command {
        cli::Commands::Watch { user } => {
            let user = user.map(identity).transpose()?;
            relay_client::watch(&ws_url, user).await?;
        }
        cli::Commands::Track {
            user,
            lat,
            lon,
            step,
            interval_ms,
            count,
        } => {
            let plan = relay_client::TrackPlan {
                user: identity(user)?,
                latitude: lat,
                longitude: lon,
                step,
                interval: Duration::from_millis(interval_ms.max(1)),
                count,
            };
            relay_client::track(&ws_url, plan).await?;
        }
        cli::Commands::CompleteRide {
            ride_index,
            passenger,
            driver,
        } => {
            let ride = RidePayload {
                ride_index,
                passenger_id: identity(passenger)?,
                driver_id: identity(driver)?,
            };
            relay_client::complete_ride(&ws_url, ride).await?;
            println!("Ride {} marked complete.", ride_index);
        }
        cli::Commands::Locations => {
            let relay_url =
                env::var("RELAY_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
            let entries = relay_client::fetch_locations(&relay_url).await?;
            if entries.is_empty() {
                println!("No live locations.");
            }
            for entry in entries {
                let fmt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_else(|| "?".into());
                println!(
                    "{}\t{}\t{}",
                    entry.key,
                    fmt(entry.latitude),
                    fmt(entry.longitude)
                );
            }
        }
    }

    Ok(())
}
