//! Lifecycle events emitted on a [`Mesh`](super::Mesh) bus.

use crate::bus::Event;
use crate::signaling::PeerId;

use super::peer::MediaStream;

/// This side finished joining: every existing member is connected.
pub struct Joined;

/// This side left the mesh.
pub struct Left;

pub struct PeerJoined;

pub struct PeerLeft;

/// A remote peer shared media.
pub struct PeerStream;

#[derive(Debug, Clone)]
pub struct PeerStreamData {
    pub peer: PeerId,
    pub stream: MediaStream,
}

impl Event for Joined {
    const NAME: &'static str = "join";
    type Payload = ();
}

impl Event for Left {
    const NAME: &'static str = "leave";
    type Payload = ();
}

impl Event for PeerJoined {
    const NAME: &'static str = "peer-join";
    type Payload = PeerId;
}

impl Event for PeerLeft {
    const NAME: &'static str = "peer-leave";
    type Payload = PeerId;
}

impl Event for PeerStream {
    const NAME: &'static str = "peer-stream";
    type Payload = PeerStreamData;
}
