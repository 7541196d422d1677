use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Signaling client errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("server rejected request: {0}")]
    Rejected(ErrorCode),

    #[error("signaling connection closed")]
    Closed,

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Error codes carried by `error` pushes, plus the local transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "ROOM_DOES_NOT_EXISTS")]
    RoomDoesNotExist,

    #[serde(rename = "SOCKET_ERROR")]
    SocketError,

    /// Any code this client does not know about
    #[serde(untagged)]
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::RoomDoesNotExist => "ROOM_DOES_NOT_EXISTS",
            ErrorCode::SocketError => "SOCKET_ERROR",
            ErrorCode::Other(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room id, assigned by the rendezvous server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Peer id, assigned by the rendezvous server per connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Payload of a `created` push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedData {
    pub you: PeerId,
    pub room: RoomId,
}

/// Payload of an `info` push. `data` is absent for rooms created without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoData<T> {
    pub peers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Payload of a `joined` push; `peers` lists the members already in the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedData<T> {
    pub you: PeerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub peers: Vec<PeerId>,
}

/// A signaling payload relayed to or from `peer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalData {
    pub peer: PeerId,
    pub data: Value,
}

/// Connection state of a signaling client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}
