//! Ride relay client library.

pub mod cli;
pub mod relay_client;
