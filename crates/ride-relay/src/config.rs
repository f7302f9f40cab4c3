//! Configuration for the relay.

use std::time::Duration;

use axum::http::HeaderValue;
use thiserror::Error;

use crate::relay::RouterOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid CORS origin {origin:?}")]
    InvalidOrigin { origin: String },
    #[error("WS_CONNECT_REPLENISH_SECS and WS_CONNECT_BURST must be at least 1")]
    InvalidRateLimit,
    #[error("PING_INTERVAL_SECS must be at least 1")]
    InvalidPingInterval,
}

/// Which browser origins may talk to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<HeaderValue>),
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cors_origins: AllowedOrigins,
    pub fanout_capacity: usize,
    pub direct_queue_capacity: usize,
    pub ping_interval: Duration,
    pub snapshot_on_connect: bool,
    pub ws_connect_replenish_secs: u64,
    pub ws_connect_burst: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_or("PORT", 3000);
        let cors_origins = parse_origins(
            &std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:5173,http://localhost:5174".to_string()),
        )?;
        let snapshot_on_connect = std::env::var("SNAPSHOT_ON_CONNECT")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let config = Self {
            host,
            port,
            cors_origins,
            fanout_capacity: env_or("FANOUT_CAPACITY", 256),
            direct_queue_capacity: env_or("DIRECT_QUEUE_CAPACITY", 32),
            ping_interval: Duration::from_secs(env_or("PING_INTERVAL_SECS", 30)),
            snapshot_on_connect,
            ws_connect_replenish_secs: env_or("WS_CONNECT_REPLENISH_SECS", 1),
            ws_connect_burst: env_or("WS_CONNECT_BURST", 20),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loopback config with permissive CORS and rate limits loose enough for tests.
    pub fn for_test() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: AllowedOrigins::Any,
            fanout_capacity: 64,
            direct_queue_capacity: 8,
            ping_interval: Duration::from_secs(30),
            snapshot_on_connect: false,
            ws_connect_replenish_secs: 1,
            ws_connect_burst: 100,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_connect_replenish_secs == 0 || self.ws_connect_burst == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }
        if self.ping_interval.is_zero() {
            return Err(ConfigError::InvalidPingInterval);
        }
        Ok(())
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            fanout_capacity: self.fanout_capacity,
            direct_capacity: self.direct_queue_capacity,
            snapshot_on_connect: self.snapshot_on_connect,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("invalid {} value {:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn parse_origins(raw: &str) -> Result<AllowedOrigins, ConfigError> {
    let parts: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() || parts.contains(&"*") {
        return Ok(AllowedOrigins::Any);
    }
    parts
        .into_iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|_| ConfigError::InvalidOrigin {
                origin: origin.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(AllowedOrigins::List)
}
