use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::actions::ActionRegistry;
use super::events::{self, PeerStreamData};
use super::peer::{PeerCommand, PeerEvent, PeerFactory, PeerOptions, Role};
use super::types::{MembershipState, Membership, MeshError, PeerState, PeerSummary};
use crate::bus::EventBus;
use crate::signaling::{PeerId, RoomData, SignalData, SignalingClient};

/// Everything the mesh loop reacts to, in arrival order
pub(crate) enum Command {
    /// Open initiator connections to the members listed by `joined`
    Connect {
        peers: Vec<PeerId>,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    /// A `signal` push from the rendezvous server
    Signal(SignalData),
    /// An event from the primitive of table entry `generation`
    Peer {
        peer: PeerId,
        generation: u64,
        event: PeerEvent,
    },
    Broadcast {
        payload: Vec<u8>,
        targets: Vec<PeerId>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<PeerSummary>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

struct PeerEntry {
    role: Role,
    state: PeerState,
    generation: u64,
    commands: async_channel::Sender<PeerCommand>,
}

struct PendingJoin {
    waiting: HashSet<PeerId>,
    reply: oneshot::Sender<Result<(), MeshError>>,
}

pub(crate) struct MeshActor<T> {
    signaling: Arc<SignalingClient<T>>,
    factory: Arc<dyn PeerFactory>,
    bus: Arc<EventBus>,
    actions: Arc<ActionRegistry>,
    membership: Arc<RwLock<Membership<T>>>,
    commands: mpsc::WeakUnboundedSender<Command>,
    peers: HashMap<PeerId, PeerEntry>,
    pending_join: Option<PendingJoin>,
    next_generation: u64,
}

pub(crate) async fn mesh_actor<T: RoomData>(
    mut actor: MeshActor<T>,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Connect { peers, reply } => actor.connect(peers, reply),
            Command::Signal(signal) => actor.relay_inbound(signal),
            Command::Peer {
                peer,
                generation,
                event,
            } => actor.handle_peer_event(peer, generation, event),
            Command::Broadcast { payload, targets } => actor.broadcast(&payload, &targets),
            Command::Snapshot { reply } => {
                let _ = reply.send(actor.snapshot());
            }
            Command::Leave { reply } => {
                actor.leave();
                let _ = reply.send(());
                break;
            }
        }
    }
    debug!("Mesh loop stopped");
}

impl<T: RoomData> MeshActor<T> {
    pub(crate) fn new(
        signaling: Arc<SignalingClient<T>>,
        factory: Arc<dyn PeerFactory>,
        bus: Arc<EventBus>,
        actions: Arc<ActionRegistry>,
        membership: Arc<RwLock<Membership<T>>>,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            signaling,
            factory,
            bus,
            actions,
            membership,
            commands,
            peers: HashMap::new(),
            pending_join: None,
            next_generation: 0,
        }
    }

    /// The only place table entries are created.
    fn open_peer(&mut self, peer: PeerId, role: Role) {
        let stream = self
            .membership
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .stream
            .clone();
        let link = self.factory.open(PeerOptions { role, stream });

        self.next_generation += 1;
        let generation = self.next_generation;
        if let Some(commands) = self.commands.upgrade() {
            tokio::spawn(forward_peer_events(
                peer.clone(),
                generation,
                link.events,
                commands,
            ));
        }

        debug!("Opened {:?} connection for {}", role, peer);
        self.peers.insert(
            peer,
            PeerEntry {
                role,
                state: PeerState::AwaitingSignal,
                generation,
                commands: link.commands,
            },
        );
    }

    fn connect(&mut self, peers: Vec<PeerId>, reply: oneshot::Sender<Result<(), MeshError>>) {
        let mut waiting = HashSet::new();
        for peer in peers {
            match self.peers.get(&peer) {
                Some(entry) if entry.state == PeerState::Connected => {}
                Some(_) => {
                    waiting.insert(peer);
                }
                None => {
                    self.open_peer(peer.clone(), Role::Initiator);
                    waiting.insert(peer);
                }
            }
        }

        if let Some(previous) = self.pending_join.replace(PendingJoin { waiting, reply }) {
            let _ = previous.reply.send(Err(MeshError::Superseded));
        }
        self.settle_join();
    }

    fn settle_join(&mut self) {
        if !self
            .pending_join
            .as_ref()
            .is_some_and(|p| p.waiting.is_empty())
        {
            return;
        }
        if let Some(pending) = self.pending_join.take() {
            self.set_state(MembershipState::Joined);
            info!("Mesh joined, {} peer(s) connected", self.connected_count());
            self.bus.emit::<events::Joined>(&());
            let _ = pending.reply.send(Ok(()));
        }
    }

    fn relay_inbound(&mut self, signal: SignalData) {
        let SignalData { peer, data } = signal;
        if !self.peers.contains_key(&peer) {
            self.open_peer(peer.clone(), Role::Responder);
        }

        if let Some(entry) = self.peers.get_mut(&peer) {
            if entry.state == PeerState::AwaitingSignal {
                entry.state = PeerState::Connecting;
            }
            if entry.commands.try_send(PeerCommand::Signal(data)).is_err() {
                warn!("Dropping signal for {}: connection is gone", peer);
            }
        }
    }

    fn handle_peer_event(&mut self, peer: PeerId, generation: u64, event: PeerEvent) {
        let Some(entry) = self.peers.get_mut(&peer) else {
            debug!("Ignoring event from removed peer {}", peer);
            return;
        };
        if entry.generation != generation {
            debug!("Ignoring event from replaced connection to {}", peer);
            return;
        }

        match event {
            PeerEvent::Signal(data) => {
                if entry.state == PeerState::AwaitingSignal {
                    entry.state = PeerState::Connecting;
                }
                if let Err(e) = self.signaling.signal(peer.clone(), data) {
                    warn!("Failed to relay signal to {}: {}", peer, e);
                }
            }
            PeerEvent::Connect => {
                entry.state = PeerState::Connected;
                info!("Peer {} connected", peer);
                self.bus.emit::<events::PeerJoined>(&peer);
                if let Some(pending) = self.pending_join.as_mut() {
                    pending.waiting.remove(&peer);
                }
                self.settle_join();
            }
            PeerEvent::Data(bytes) => {
                self.actions.dispatch(&peer, &bytes);
            }
            PeerEvent::Stream(stream) => {
                self.bus
                    .emit::<events::PeerStream>(&PeerStreamData { peer, stream });
            }
            PeerEvent::Close => self.remove_peer(&peer, "connection closed".to_string()),
            PeerEvent::Error(reason) => self.remove_peer(&peer, reason),
        }
    }

    fn remove_peer(&mut self, peer: &PeerId, reason: String) {
        let Some(entry) = self.peers.remove(peer) else {
            return;
        };
        let _ = entry.commands.try_send(PeerCommand::Destroy);

        if entry.state == PeerState::Connected {
            info!("Peer {} left: {}", peer, reason);
            self.bus.emit::<events::PeerLeft>(peer);
        } else {
            warn!("Peer {} failed before connecting: {}", peer, reason);
        }

        // the first failure during the join fan-out fails the whole join
        if self
            .pending_join
            .as_ref()
            .is_some_and(|p| p.waiting.contains(peer))
        {
            if let Some(pending) = self.pending_join.take() {
                let _ = pending.reply.send(Err(MeshError::PeerFailed {
                    peer: peer.clone(),
                    reason,
                }));
            }
        }
    }

    fn broadcast(&self, payload: &[u8], targets: &[PeerId]) {
        let mut sent = 0;
        for (id, entry) in &self.peers {
            if entry.state != PeerState::Connected {
                continue;
            }
            if !targets.is_empty() && !targets.contains(id) {
                continue;
            }
            if entry
                .commands
                .try_send(PeerCommand::Send(payload.to_vec()))
                .is_ok()
            {
                sent += 1;
            }
        }
        debug!("Action delivered to {} peer(s)", sent);
    }

    fn leave(&mut self) {
        let mut departed: Vec<PeerId> = Vec::new();
        for (id, entry) in self.peers.drain() {
            let _ = entry.commands.try_send(PeerCommand::Destroy);
            if entry.state == PeerState::Connected {
                departed.push(id);
            }
        }
        departed.sort();
        for peer in &departed {
            self.bus.emit::<events::PeerLeft>(peer);
        }

        if let Some(pending) = self.pending_join.take() {
            let _ = pending.reply.send(Err(MeshError::Left));
        }

        self.signaling.leave();
        self.set_state(MembershipState::Left);
        info!("Left mesh, closed {} peer connection(s)", departed.len());
        self.bus.emit::<events::Left>(&());
    }

    fn snapshot(&self) -> Vec<PeerSummary> {
        let mut peers: Vec<PeerSummary> = self
            .peers
            .iter()
            .map(|(id, entry)| PeerSummary {
                id: id.clone(),
                role: entry.role,
                state: entry.state,
            })
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|e| e.state == PeerState::Connected)
            .count()
    }

    fn set_state(&self, state: MembershipState) {
        self.membership
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .state = state;
    }
}

/// Feed one primitive's events into the mesh loop, tagged with its entry.
async fn forward_peer_events(
    peer: PeerId,
    generation: u64,
    events: async_channel::Receiver<PeerEvent>,
    commands: mpsc::UnboundedSender<Command>,
) {
    while let Ok(event) = events.recv().await {
        let last = matches!(event, PeerEvent::Close | PeerEvent::Error(_));
        let cmd = Command::Peer {
            peer: peer.clone(),
            generation,
            event,
        };
        if commands.send(cmd).is_err() || last {
            break;
        }
    }
}
