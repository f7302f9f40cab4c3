//! Shared wire types for the ride relay server and its clients.

mod models;

// Explicit re-exports (avoids rust-analyzer issues with `pub use models::*`)
pub use models::ws_types;
pub use models::{
    ClientEvent, EventError, Identity, LocationKey, LocationPayload, LocationSnapshotEntry,
    RegisterUserPayload, RidePayload, ServerEvent, SessionId, WsEnvelope,
};
