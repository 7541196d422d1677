use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{CreatedData, ErrorCode, InfoData, JoinedData, PeerId, RoomId, SignalData};

/// Messages sent from client to server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "lowercase")]
pub enum Request<T> {
    /// Create a new room carrying `data`
    Create {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<T>,
    },

    /// Ask for the peer count and payload of a room
    Info { room: RoomId },

    /// Join an existing room
    Join { room: RoomId },

    /// Relay a signaling payload to another member
    Signal { peer: PeerId, data: Value },
}

/// Messages pushed from server to client
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum Response<T> {
    Created(CreatedData),
    Info(InfoData<T>),
    Joined(JoinedData<T>),
    Signal(SignalData),
    Error(ErrorCode),
}
