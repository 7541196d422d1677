use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Which side proposes a peer connection. Exactly one side of each pair initiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn is_initiator(self) -> bool {
        self == Role::Initiator
    }
}

/// Opaque handle to local or remote media, passed through untouched.
#[derive(Clone)]
pub struct MediaStream(Arc<dyn Any + Send + Sync>);

impl MediaStream {
    pub fn new<M: Any + Send + Sync>(media: M) -> Self {
        Self(Arc::new(media))
    }

    pub fn downcast_ref<M: Any>(&self) -> Option<&M> {
        self.0.downcast_ref::<M>()
    }

    /// Whether both handles refer to the same media object.
    pub fn ptr_eq(&self, other: &MediaStream) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MediaStream(..)")
    }
}

/// Events reported by a peer connection primitive
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local signaling payload to relay to the remote side
    Signal(Value),
    Connect,
    Data(Vec<u8>),
    Stream(MediaStream),
    Close,
    Error(String),
}

/// Instructions for a peer connection primitive
#[derive(Debug, Clone)]
pub enum PeerCommand {
    /// A remote signaling payload
    Signal(Value),
    Send(Vec<u8>),
    Destroy,
}

#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub role: Role,
    pub stream: Option<MediaStream>,
}

/// Coordinator side of a peer connection.
pub struct PeerLink {
    pub commands: async_channel::Sender<PeerCommand>,
    pub events: async_channel::Receiver<PeerEvent>,
}

/// Primitive side of a [`PeerLink`].
pub struct PeerEnd {
    pub commands: async_channel::Receiver<PeerCommand>,
    pub events: async_channel::Sender<PeerEvent>,
}

impl PeerLink {
    pub fn pair() -> (PeerLink, PeerEnd) {
        let (cmd_tx, cmd_rx) = async_channel::unbounded();
        let (event_tx, event_rx) = async_channel::unbounded();
        (
            PeerLink {
                commands: cmd_tx,
                events: event_rx,
            },
            PeerEnd {
                commands: cmd_rx,
                events: event_tx,
            },
        )
    }
}

/// Creates peer connection primitives.
///
/// A primitive negotiates on its own: it emits `Signal` payloads that must reach
/// the remote side, and eventually `Connect`, or `Error`/`Close`. After `Destroy`
/// it emits `Close` and stops.
pub trait PeerFactory: Send + Sync {
    fn open(&self, options: PeerOptions) -> PeerLink;
}
