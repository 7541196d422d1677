//! Events emitted on a [`SignalingClient`](super::SignalingClient) bus.

use std::marker::PhantomData;

use crate::bus::Event;

use super::types::{CreatedData, ErrorCode, InfoData, JoinedData, SignalData};

/// The transport is open.
pub struct Open;

/// The transport closed.
pub struct Close;

pub struct Created;

pub struct Info<T>(PhantomData<fn() -> T>);

pub struct Joined<T>(PhantomData<fn() -> T>);

/// A signaling payload relayed from another peer.
pub struct Signal;

/// An `error` push, or `SOCKET_ERROR` for a transport failure.
pub struct Error;

impl Event for Open {
    const NAME: &'static str = "open";
    type Payload = ();
}

impl Event for Close {
    const NAME: &'static str = "close";
    type Payload = ();
}

impl Event for Created {
    const NAME: &'static str = "created";
    type Payload = CreatedData;
}

impl<T: Send + Sync + 'static> Event for Info<T> {
    const NAME: &'static str = "info";
    type Payload = InfoData<T>;
}

impl<T: Send + Sync + 'static> Event for Joined<T> {
    const NAME: &'static str = "joined";
    type Payload = JoinedData<T>;
}

impl Event for Signal {
    const NAME: &'static str = "signal";
    type Payload = SignalData;
}

impl Event for Error {
    const NAME: &'static str = "error";
    type Payload = ErrorCode;
}
