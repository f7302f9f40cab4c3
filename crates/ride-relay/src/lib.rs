//! Ride relay: live location fan-out and addressed ride notifications over WebSocket.

pub mod api;
pub mod config;
pub mod relay;
