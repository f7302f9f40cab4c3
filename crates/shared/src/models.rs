//! Wire models shared by the relay server and its clients.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Application-level participant key (wallet address or user id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Build an identity, rejecting empty or whitespace-only strings.
    pub fn new(raw: impl Into<String>) -> Result<Self, EventError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(EventError::EmptyIdentity);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = EventError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned id of one live connection. Random, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Decode failures for inbound frames.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("frame is not a valid envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("invalid {event} payload: {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("identity must not be empty")]
    EmptyIdentity,
    #[error("{field} out of range: {value}")]
    CoordinateOutOfRange { field: &'static str, value: f64 },
}

// --- WebSocket envelope ---

/// WebSocket message envelope (version 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(default)]
    pub version: u8,
    pub r#type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

impl WsEnvelope {
    pub const VERSION: u8 = 1;

    pub fn parse(text: &str) -> Result<Self, EventError> {
        serde_json::from_str(text).map_err(EventError::Envelope)
    }

    fn payload_as<T: DeserializeOwned>(&self, event: &'static str) -> Result<T, EventError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|source| EventError::Payload { event, source })
    }
}

/// WebSocket message types.
pub mod ws_types {
    pub const REGISTER_USER: &str = "registerUser";
    pub const UPDATE_LOCATION: &str = "updateLocation";
    pub const LOCATION_UPDATE: &str = "locationUpdate";
    pub const COMPLETE_RIDE: &str = "completeRide";
    pub const RIDE_COMPLETED: &str = "rideCompleted";
}

// --- Payloads ---

/// registerUser payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserPayload {
    pub user_id: Identity,
}

/// updateLocation / locationUpdate payload. Coordinates are `null` before the first fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub user_id: Identity,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl LocationPayload {
    fn validate(self) -> Result<Self, EventError> {
        check_coordinate("latitude", self.latitude, 90.0)?;
        check_coordinate("longitude", self.longitude, 180.0)?;
        Ok(self)
    }
}

fn check_coordinate(field: &'static str, value: Option<f64>, limit: f64) -> Result<(), EventError> {
    match value {
        Some(v) if !v.is_finite() || v.abs() > limit => {
            Err(EventError::CoordinateOutOfRange { field, value: v })
        }
        _ => Ok(()),
    }
}

/// completeRide / rideCompleted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RidePayload {
    pub ride_index: u64,
    pub passenger_id: Identity,
    pub driver_id: Identity,
}

// --- Events ---

/// Events a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    RegisterUser(RegisterUserPayload),
    UpdateLocation(LocationPayload),
    CompleteRide(RidePayload),
}

impl ClientEvent {
    /// Decode an envelope. `Ok(None)` means the event type is not one we know.
    pub fn from_envelope(env: &WsEnvelope) -> Result<Option<Self>, EventError> {
        let event = match env.r#type.as_str() {
            ws_types::REGISTER_USER => {
                Self::RegisterUser(env.payload_as(ws_types::REGISTER_USER)?)
            }
            ws_types::UPDATE_LOCATION => Self::UpdateLocation(
                env.payload_as::<LocationPayload>(ws_types::UPDATE_LOCATION)?
                    .validate()?,
            ),
            ws_types::COMPLETE_RIDE => Self::CompleteRide(env.payload_as(ws_types::COMPLETE_RIDE)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterUser(_) => ws_types::REGISTER_USER,
            Self::UpdateLocation(_) => ws_types::UPDATE_LOCATION,
            Self::CompleteRide(_) => ws_types::COMPLETE_RIDE,
        }
    }

    pub fn to_envelope(&self) -> WsEnvelope {
        let payload = match self {
            Self::RegisterUser(p) => serde_json::to_value(p),
            Self::UpdateLocation(p) => serde_json::to_value(p),
            Self::CompleteRide(p) => serde_json::to_value(p),
        };
        envelope(self.name(), payload, None)
    }
}

/// Events the relay sends to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    LocationUpdate(LocationPayload),
    RideCompleted(RidePayload),
}

impl ServerEvent {
    pub fn from_envelope(env: &WsEnvelope) -> Result<Option<Self>, EventError> {
        let event = match env.r#type.as_str() {
            ws_types::LOCATION_UPDATE => {
                Self::LocationUpdate(env.payload_as(ws_types::LOCATION_UPDATE)?)
            }
            ws_types::RIDE_COMPLETED => {
                Self::RideCompleted(env.payload_as(ws_types::RIDE_COMPLETED)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::LocationUpdate(_) => ws_types::LOCATION_UPDATE,
            Self::RideCompleted(_) => ws_types::RIDE_COMPLETED,
        }
    }

    pub fn to_envelope(&self, ts: Option<String>) -> WsEnvelope {
        let payload = match self {
            Self::LocationUpdate(p) => serde_json::to_value(p),
            Self::RideCompleted(p) => serde_json::to_value(p),
        };
        envelope(self.name(), payload, ts)
    }
}

// Payload structs hold only strings and numbers, so serializing them cannot fail in practice.
fn envelope(
    r#type: &str,
    payload: Result<serde_json::Value, serde_json::Error>,
    ts: Option<String>,
) -> WsEnvelope {
    WsEnvelope {
        version: WsEnvelope::VERSION,
        r#type: r#type.to_string(),
        payload: payload.unwrap_or(serde_json::Value::Null),
        ts,
    }
}

// --- HTTP ---

/// Key a location entry is stored under: the bound identity, or the raw session before registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKey {
    User(Identity),
    Session(SessionId),
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Session(id) => write!(f, "session:{}", id),
        }
    }
}

/// One row of `GET /api/locations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSnapshotEntry {
    pub key: LocationKey,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}
