//! Peer-to-peer mesh over a signaling rendezvous server.
//!
//! A [`SignalingClient`] talks to the rendezvous server; a [`Mesh`] uses it to
//! create or join a room, connects to every other member through a
//! [`PeerFactory`] and multiplexes named actions over those connections.

pub mod bus;
pub mod mesh;
pub mod signaling;

#[cfg(test)]
pub(crate) mod testing;

pub use bus::{Event, EventBus, ListenerId};
pub use mesh::{Mesh, MeshError, PeerFactory};
pub use signaling::{SignalingClient, SignalingError};
