//! Full-mesh peer coordination on top of a [`SignalingClient`](crate::signaling::SignalingClient)

mod actions;
mod actor;
pub mod events;
mod handle;
mod peer;
mod types;

pub use actions::{ActionReceiver, ActionSender};
pub use handle::Mesh;
pub use peer::{
    MediaStream, PeerCommand, PeerEnd, PeerEvent, PeerFactory, PeerLink, PeerOptions, Role,
};
pub use types::{Membership, MembershipState, MeshError, PeerState, PeerSummary};
