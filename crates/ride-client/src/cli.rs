//! CLI argument parsing.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ride-client")]
#[command(about = "Ride relay client — stream positions and ride events")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect and print every event the relay sends
    Watch {
        /// Register as this identity first, to receive rideCompleted notifications
        #[arg(long)]
        user: Option<String>,
    },

    /// Register and stream position updates
    Track {
        #[arg(long)]
        user: String,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Degrees added to both coordinates after each update
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        step: f64,

        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Stop after this many updates (default: run until interrupted)
        #[arg(long)]
        count: Option<u64>,
    },

    /// Tell the passenger's session that a ride is complete
    CompleteRide {
        #[arg(long)]
        ride_index: u64,

        #[arg(long)]
        passenger: String,

        #[arg(long)]
        driver: String,
    },

    /// Print the relay's current location table
    Locations,
}
