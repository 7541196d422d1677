use thiserror::Error;

use super::peer::{MediaStream, Role};
use crate::signaling::{PeerId, RoomId, SignalingError};

/// Mesh coordinator errors
#[derive(Debug, Error)]
pub enum MeshError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error("peer {peer} failed before connecting: {reason}")]
    PeerFailed { peer: PeerId, reason: String },

    #[error("mesh was left before the operation completed")]
    Left,

    #[error("join was replaced by a later join")]
    Superseded,

    #[error("mesh event loop has stopped")]
    Stopped,

    #[error("failed to encode action payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Local membership lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MembershipState {
    #[default]
    Unjoined,
    Creating,
    Joining,
    Joined,
    Left,
}

/// Lifecycle of one peer table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Opened, no signaling payload exchanged yet
    AwaitingSignal,
    Connecting,
    Connected,
}

/// Snapshot of one peer table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub id: PeerId,
    pub role: Role,
    pub state: PeerState,
}

/// What this side knows about its own membership.
#[derive(Debug, Clone)]
pub struct Membership<T> {
    pub you: Option<PeerId>,
    pub room: Option<RoomId>,
    pub data: Option<T>,
    pub stream: Option<MediaStream>,
    pub state: MembershipState,
}

impl<T> Default for Membership<T> {
    fn default() -> Self {
        Self {
            you: None,
            room: None,
            data: None,
            stream: None,
            state: MembershipState::Unjoined,
        }
    }
}
