use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus, ListenerId};

use super::events;
use super::messages::{Request, Response};
use super::transport::{Connector, OutboundMessage, TransportCommand, TransportEvent};
use super::types::{
    ConnectionState, CreatedData, ErrorCode, InfoData, JoinedData, PeerId, RoomId,
    SignalingError,
};

/// Application payload attached to a room.
pub trait RoomData: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> RoomData for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Client for one rendezvous connection.
///
/// Requests are answered by pushes of the matching event name. An `error` push
/// rejects whatever request is pending, since the wire carries no request ids.
pub struct SignalingClient<T> {
    bus: Arc<EventBus>,
    state: Arc<AtomicU8>,
    commands: async_channel::Sender<TransportCommand>,
    _data: PhantomData<fn() -> T>,
}

impl<T: RoomData> SignalingClient<T> {
    /// Open a transport to `address` and start dispatching its events.
    /// Must be called inside a tokio runtime.
    pub fn connect<C: Connector + ?Sized>(connector: &C, address: &str) -> Self {
        let link = connector.connect(address);
        let bus = Arc::new(EventBus::new());
        let state = Arc::new(AtomicU8::new(ConnectionState::Connecting as u8));

        tokio::spawn(dispatch_loop::<T>(link.events, bus.clone(), state.clone()));

        Self {
            bus,
            state,
            commands: link.commands,
            _data: PhantomData,
        }
    }

    /// Check whether a rendezvous server answers at `address`.
    ///
    /// Resolves `true` (and closes the probe connection) if it opens, `false` if it
    /// closes first, and fails if it errors first.
    pub async fn probe<C: Connector + ?Sized>(
        connector: &C,
        address: &str,
    ) -> Result<bool, SignalingError> {
        let link = connector.connect(address);
        loop {
            match link.events.recv().await {
                Ok(TransportEvent::Open) => {
                    let _ = link.commands.send(TransportCommand::Close).await;
                    return Ok(true);
                }
                Ok(TransportEvent::Close) | Err(_) => return Ok(false),
                Ok(TransportEvent::Error(reason)) => return Err(SignalingError::Transport(reason)),
                Ok(TransportEvent::Message(_)) => {}
            }
        }
    }

    /// Subscribe to [`events`] here.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Wait until the connection is open. Fails if it errors or closes first.
    pub async fn ready(&self) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        let reply = Reply::new(tx);
        let ids = [
            {
                let reply = reply.clone();
                self.bus.once::<events::Open>(move |_| reply.settle(Ok(())))
            },
            {
                let reply = reply.clone();
                self.bus.once::<events::Error>(move |code| {
                    reply.settle(Err(SignalingError::Rejected(code.clone())))
                })
            },
            {
                let reply = reply.clone();
                self.bus
                    .once::<events::Close>(move |_| reply.settle(Err(SignalingError::Closed)))
            },
        ];

        // the transport may have settled before the listeners were in place
        match self.state() {
            ConnectionState::Open => reply.settle(Ok(())),
            ConnectionState::Closing | ConnectionState::Closed => {
                reply.settle(Err(SignalingError::Closed))
            }
            ConnectionState::Connecting => {}
        }

        let result = rx.await.unwrap_or(Err(SignalingError::Closed));
        for id in ids {
            self.bus.off(id);
        }
        result
    }

    /// Create a room carrying `data`.
    pub async fn create(&self, data: Option<T>) -> Result<CreatedData, SignalingError> {
        self.request::<events::Created>(Request::Create { data }).await
    }

    /// Fetch the peer count and payload of `room`.
    pub async fn info(&self, room: RoomId) -> Result<InfoData<T>, SignalingError> {
        self.request::<events::Info<T>>(Request::Info { room }).await
    }

    /// Join `room`; the answer lists the peers already there.
    pub async fn join(&self, room: RoomId) -> Result<JoinedData<T>, SignalingError> {
        self.request::<events::Joined<T>>(Request::Join { room }).await
    }

    /// Relay a signaling payload to `peer`. No answer is expected.
    pub fn signal(&self, peer: PeerId, data: Value) -> Result<(), SignalingError> {
        self.send(&Request::Signal { peer, data })
    }

    /// Close the connection. Pending requests fail with [`SignalingError::Closed`].
    pub fn leave(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Open as u8,
            ConnectionState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self.commands.try_send(TransportCommand::Close);
    }

    fn send(&self, request: &Request<T>) -> Result<(), SignalingError> {
        let text = serde_json::to_string(request)?;
        self.commands
            .try_send(TransportCommand::Send(OutboundMessage::from(text)))
            .map_err(|_| SignalingError::Closed)
    }

    /// Send `request` and wait for the first push of `E`, an `error` or a close.
    async fn request<E>(&self, request: Request<T>) -> Result<E::Payload, SignalingError>
    where
        E: Event,
        E::Payload: Clone,
    {
        let (tx, rx) = oneshot::channel();
        let reply = Reply::new(tx);

        // listeners go in before the request leaves so the answer cannot be missed
        let ids: [ListenerId; 3] = [
            {
                let reply = reply.clone();
                self.bus
                    .once::<E>(move |payload| reply.settle(Ok(payload.clone())))
            },
            {
                let reply = reply.clone();
                self.bus.once::<events::Error>(move |code: &ErrorCode| {
                    reply.settle(Err(SignalingError::Rejected(code.clone())))
                })
            },
            {
                let reply = reply.clone();
                self.bus
                    .once::<events::Close>(move |_| reply.settle(Err(SignalingError::Closed)))
            },
        ];

        let result = match self.send(&request) {
            Ok(()) => {
                debug!("Sent '{}' request, waiting for '{}'", method_name(&request), E::NAME);
                rx.await.unwrap_or(Err(SignalingError::Closed))
            }
            Err(e) => Err(e),
        };

        for id in ids {
            self.bus.off(id);
        }
        result
    }
}

impl<T> Drop for SignalingClient<T> {
    fn drop(&mut self) {
        self.commands.close();
    }
}

fn method_name<T>(request: &Request<T>) -> &'static str {
    match request {
        Request::Create { .. } => "create",
        Request::Info { .. } => "info",
        Request::Join { .. } => "join",
        Request::Signal { .. } => "signal",
    }
}

/// One-shot reply shared by several listeners; the first to settle wins.
struct Reply<P>(Arc<Mutex<Option<oneshot::Sender<Result<P, SignalingError>>>>>);

impl<P> Clone for Reply<P> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<P> Reply<P> {
    fn new(tx: oneshot::Sender<Result<P, SignalingError>>) -> Self {
        Self(Arc::new(Mutex::new(Some(tx))))
    }

    fn settle(&self, result: Result<P, SignalingError>) {
        let tx = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = tx {
            let _ = tx.send(result);
        }
    }
}

async fn dispatch_loop<T: RoomData>(
    events: async_channel::Receiver<TransportEvent>,
    bus: Arc<EventBus>,
    state: Arc<AtomicU8>,
) {
    while let Ok(event) = events.recv().await {
        match event {
            TransportEvent::Open => {
                state.store(ConnectionState::Open as u8, Ordering::Release);
                info!("Signaling connection open");
                bus.emit::<events::Open>(&());
            }
            TransportEvent::Message(text) => dispatch_message::<T>(&bus, &text),
            TransportEvent::Error(reason) => {
                warn!("Signaling transport error: {}", reason);
                bus.emit::<events::Error>(&ErrorCode::SocketError);
            }
            TransportEvent::Close => break,
        }
    }

    state.store(ConnectionState::Closed as u8, Ordering::Release);
    info!("Signaling connection closed");
    bus.emit::<events::Close>(&());
}

fn dispatch_message<T: RoomData>(bus: &EventBus, text: &str) {
    let response: Response<T> = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!("Dropping malformed signaling message: {}", e);
            return;
        }
    };

    match response {
        Response::Created(data) => {
            bus.emit::<events::Created>(&data);
        }
        Response::Info(data) => {
            bus.emit::<events::Info<T>>(&data);
        }
        Response::Joined(data) => {
            bus.emit::<events::Joined<T>>(&data);
        }
        Response::Signal(data) => {
            debug!("Signal from {}", data.peer);
            bus.emit::<events::Signal>(&data);
        }
        Response::Error(code) => {
            warn!("Rendezvous server reported error: {}", code);
            bus.emit::<events::Error>(&code);
        }
    }
}
