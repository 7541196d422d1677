use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use super::actions::{ActionReceiver, ActionRegistry, ActionSender};
use super::actor::{Command, MeshActor, mesh_actor};
use super::events::{self, PeerStreamData};
use super::peer::{MediaStream, PeerFactory};
use super::types::{Membership, MembershipState, MeshError, PeerSummary};
use crate::bus::{EventBus, ListenerId};
use crate::signaling::{
    self, CreatedData, InfoData, JoinedData, PeerId, RoomData, RoomId, SignalingClient,
    WebSocketConnector,
};

/// Coordinates a full mesh of peer connections for one room.
///
/// All table mutations happen on a dedicated loop task fed by a single queue, so
/// events from the rendezvous server and from every peer are handled one at a
/// time in arrival order. Dropping the handle leaves the mesh.
pub struct Mesh<T: RoomData> {
    signaling: Arc<SignalingClient<T>>,
    bus: Arc<EventBus>,
    actions: Arc<ActionRegistry>,
    membership: Arc<RwLock<Membership<T>>>,
    commands: mpsc::UnboundedSender<Command>,
    signal_listener: ListenerId,
}

impl<T: RoomData> Mesh<T> {
    /// Build a mesh on top of `signaling`. Must be called inside a tokio runtime.
    pub fn new<F: PeerFactory + 'static>(signaling: SignalingClient<T>, factory: F) -> Self {
        let signaling = Arc::new(signaling);
        let bus = Arc::new(EventBus::new());
        let actions = Arc::new(ActionRegistry::default());
        let membership = Arc::new(RwLock::new(Membership::default()));
        let (tx, rx) = mpsc::unbounded_channel();

        let relay = tx.clone();
        let signal_listener = signaling
            .events()
            .on::<signaling::events::Signal>(move |signal| {
                let _ = relay.send(Command::Signal(signal.clone()));
            });

        let actor = MeshActor::new(
            signaling.clone(),
            Arc::new(factory),
            bus.clone(),
            actions.clone(),
            membership.clone(),
            tx.downgrade(),
        );
        tokio::spawn(mesh_actor(actor, rx));

        Self {
            signaling,
            bus,
            actions,
            membership,
            commands: tx,
            signal_listener,
        }
    }

    /// Connect to a rendezvous server over WebSocket and build a mesh on it.
    pub fn connect<F: PeerFactory + 'static>(address: &str, factory: F) -> Self {
        Self::new(SignalingClient::connect(&WebSocketConnector, address), factory)
    }

    pub fn signaling(&self) -> &SignalingClient<T> {
        &self.signaling
    }

    /// Wait until the signaling connection is open.
    pub async fn ready(&self) -> Result<(), MeshError> {
        Ok(self.signaling.ready().await?)
    }

    /// Create a room carrying `data`. No peer connections are opened: the room is
    /// empty until someone joins and connects to us.
    pub async fn create(
        &self,
        data: T,
        stream: Option<MediaStream>,
    ) -> Result<CreatedData, MeshError> {
        self.update(|m| {
            m.data = Some(data.clone());
            m.stream = stream;
            m.state = MembershipState::Creating;
        });

        let created = match self.signaling.create(Some(data)).await {
            Ok(created) => created,
            Err(e) => {
                self.update(|m| m.state = MembershipState::Unjoined);
                return Err(e.into());
            }
        };

        info!("Created room {} as {}", created.room, created.you);
        self.update(|m| {
            m.you = Some(created.you.clone());
            m.room = Some(created.room.clone());
            m.state = MembershipState::Joined;
        });
        Ok(created)
    }

    pub async fn info(&self, room: RoomId) -> Result<InfoData<T>, MeshError> {
        Ok(self.signaling.info(room).await?)
    }

    /// Join `room` and connect to every member already in it.
    ///
    /// Resolves once all of those connections are up; the first one that fails
    /// fails the join with [`MeshError::PeerFailed`].
    pub async fn join(
        &self,
        room: RoomId,
        stream: Option<MediaStream>,
    ) -> Result<JoinedData<T>, MeshError> {
        self.update(|m| {
            m.stream = stream;
            m.state = MembershipState::Joining;
        });

        let joined = match self.signaling.join(room.clone()).await {
            Ok(joined) => joined,
            Err(e) => {
                self.update(|m| m.state = MembershipState::Unjoined);
                return Err(e.into());
            }
        };

        info!(
            "Joined room {} as {}, connecting to {} peer(s)",
            room,
            joined.you,
            joined.peers.len()
        );
        self.update(|m| {
            m.you = Some(joined.you.clone());
            m.room = Some(room);
            m.data = joined.data.clone();
        });

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                peers: joined.peers.clone(),
                reply,
            })
            .map_err(|_| MeshError::Stopped)?;
        rx.await.map_err(|_| MeshError::Stopped)??;

        Ok(joined)
    }

    /// Destroy every peer connection and close the signaling connection.
    /// Leaving a mesh that already left does nothing.
    pub async fn leave(&self) -> Result<(), MeshError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Leave { reply }).is_err() {
            return Ok(());
        }
        // the loop stops right after answering, so a closed reply means it already left
        let _ = rx.await;
        Ok(())
    }

    /// Snapshot of the peer table, sorted by peer id.
    pub async fn peers(&self) -> Vec<PeerSummary> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Snapshot { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Create a typed action called `name`.
    ///
    /// The sender encodes `{"action": name, "data": ...}` for connected peers; the
    /// receiver installs the handler for incoming actions with that name.
    pub fn make_action<P>(&self, name: &str) -> (ActionSender<P>, ActionReceiver<P>)
    where
        P: Serialize + DeserializeOwned + 'static,
    {
        let name: Arc<str> = Arc::from(name);
        (
            ActionSender::new(name.clone(), self.commands.clone()),
            ActionReceiver::new(name, self.actions.clone()),
        )
    }

    pub fn on_join(&self, handler: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.bus.on::<events::Joined>(move |_| handler())
    }

    pub fn on_leave(&self, handler: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.bus.on::<events::Left>(move |_| handler())
    }

    pub fn on_peer_join(&self, handler: impl Fn(&PeerId) + Send + Sync + 'static) -> ListenerId {
        self.bus.on::<events::PeerJoined>(handler)
    }

    pub fn on_peer_leave(&self, handler: impl Fn(&PeerId) + Send + Sync + 'static) -> ListenerId {
        self.bus.on::<events::PeerLeft>(handler)
    }

    pub fn on_peer_stream(
        &self,
        handler: impl Fn(&PeerId, &MediaStream) + Send + Sync + 'static,
    ) -> ListenerId {
        self.bus
            .on::<events::PeerStream>(move |s: &PeerStreamData| handler(&s.peer, &s.stream))
    }

    /// Remove a handler registered with one of the `on_*` methods.
    pub fn off(&self, id: ListenerId) -> bool {
        self.bus.off(id)
    }

    pub fn you(&self) -> Option<PeerId> {
        self.read(|m| m.you.clone())
    }

    pub fn room(&self) -> Option<RoomId> {
        self.read(|m| m.room.clone())
    }

    pub fn data(&self) -> Option<T> {
        self.read(|m| m.data.clone())
    }

    pub fn stream(&self) -> Option<MediaStream> {
        self.read(|m| m.stream.clone())
    }

    pub fn state(&self) -> MembershipState {
        self.read(|m| m.state)
    }

    fn read<R>(&self, f: impl FnOnce(&Membership<T>) -> R) -> R {
        f(&self.membership.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn update(&self, f: impl FnOnce(&mut Membership<T>)) {
        f(&mut self.membership.write().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<T: RoomData> Drop for Mesh<T> {
    fn drop(&mut self) {
        self.signaling.events().off(self.signal_listener);
        let (reply, _) = oneshot::channel();
        let _ = self.commands.send(Command::Leave { reply });
    }
}
