//! Client side of the rendezvous signaling protocol

mod client;
pub mod events;
mod messages;
mod transport;
mod types;

pub use client::{RoomData, SignalingClient};
pub use messages::{Request, Response};
pub use transport::{
    Connector, DEFAULT_RENDEZVOUS_URL, OutboundMessage, TransportCommand, TransportEnd,
    TransportEvent, TransportLink, WebSocketConnector,
};
pub use types::{
    ConnectionState, CreatedData, ErrorCode, InfoData, JoinedData, PeerId, RoomId, SignalData,
    SignalingError,
};
