//! In-memory stand-ins for the rendezvous server and the peer primitive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::mesh::{
    MediaStream, PeerCommand, PeerEnd, PeerEvent, PeerFactory, PeerLink, PeerOptions, Role,
};
use crate::signaling::{
    Connector, CreatedData, ErrorCode, InfoData, JoinedData, PeerId, Request, Response, RoomId,
    SignalData, TransportCommand, TransportEnd, TransportEvent, TransportLink,
};

struct RoomState {
    data: Option<Value>,
    members: Vec<PeerId>,
}

#[derive(Default)]
struct ServerState {
    next_peer: u64,
    next_room: u64,
    rooms: HashMap<RoomId, RoomState>,
    clients: HashMap<PeerId, async_channel::Sender<TransportEvent>>,
    membership: HashMap<PeerId, RoomId>,
}

impl ServerState {
    fn push(&self, to: &PeerId, response: Response<Value>) {
        if let Some(tx) = self.clients.get(to) {
            let text = serde_json::to_string(&response).unwrap();
            let _ = tx.try_send(TransportEvent::Message(text));
        }
    }

    fn handle(&mut self, from: &PeerId, text: &str) {
        let Ok(request) = serde_json::from_str::<Request<Value>>(text) else {
            return;
        };

        match request {
            Request::Create { data } => {
                self.next_room += 1;
                let room = RoomId::from(format!("r{}", self.next_room));
                self.rooms.insert(
                    room.clone(),
                    RoomState {
                        data,
                        members: vec![from.clone()],
                    },
                );
                self.membership.insert(from.clone(), room.clone());
                let created = CreatedData {
                    you: from.clone(),
                    room,
                };
                self.push(from, Response::Created(created));
            }
            Request::Info { room } => {
                let response = match self.rooms.get(&room) {
                    Some(r) => Response::Info(InfoData {
                        peers: r.members.len(),
                        data: r.data.clone(),
                    }),
                    None => Response::Error(ErrorCode::RoomDoesNotExist),
                };
                self.push(from, response);
            }
            Request::Join { room } => {
                let response = match self.rooms.get_mut(&room) {
                    Some(r) => {
                        let joined = JoinedData {
                            you: from.clone(),
                            data: r.data.clone(),
                            peers: r.members.clone(),
                        };
                        r.members.push(from.clone());
                        self.membership.insert(from.clone(), room);
                        Response::Joined(joined)
                    }
                    None => Response::Error(ErrorCode::RoomDoesNotExist),
                };
                self.push(from, response);
            }
            Request::Signal { peer, data } => {
                let signal = SignalData {
                    peer: from.clone(),
                    data,
                };
                self.push(&peer, Response::Signal(signal));
            }
        }
    }

    fn disconnect(&mut self, peer: &PeerId) {
        self.clients.remove(peer);
        if let Some(room) = self.membership.remove(peer) {
            if let Some(r) = self.rooms.get_mut(&room) {
                r.members.retain(|p| p != peer);
                if r.members.is_empty() {
                    self.rooms.remove(&room);
                }
            }
        }
    }
}

/// Rendezvous server living in the test process. Peers are named `p1`, `p2`, ...
/// in connection order and rooms `r1`, `r2`, ...
#[derive(Clone, Default)]
pub(crate) struct MemoryRendezvous {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryRendezvous {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl Connector for MemoryRendezvous {
    fn connect(&self, _address: &str) -> TransportLink {
        let (link, end) = TransportLink::pair();
        let peer = {
            let mut state = self.state.lock().unwrap();
            state.next_peer += 1;
            let peer = PeerId::from(format!("p{}", state.next_peer));
            state.clients.insert(peer.clone(), end.events.clone());
            peer
        };
        let _ = end.events.try_send(TransportEvent::Open);
        tokio::spawn(serve(self.state.clone(), peer, end));
        link
    }
}

async fn serve(state: Arc<Mutex<ServerState>>, peer: PeerId, end: TransportEnd) {
    while let Ok(cmd) = end.commands.recv().await {
        match cmd {
            TransportCommand::Send(msg) => {
                state.lock().unwrap().handle(&peer, msg.as_str());
            }
            TransportCommand::Close => break,
        }
    }
    state.lock().unwrap().disconnect(&peer);
    let _ = end.events.send(TransportEvent::Close).await;
}

enum Script {
    Silent,
    Refusing,
    Unreachable,
}

/// Connector whose far side is driven by the test itself.
pub(crate) struct ScriptedConnector {
    script: Script,
    events: Mutex<Option<async_channel::Sender<TransportEvent>>>,
}

impl ScriptedConnector {
    /// Opens, then only speaks when the test calls `push` or `fail`.
    pub(crate) fn silent() -> Self {
        Self::with(Script::Silent)
    }

    /// Closes without ever opening.
    pub(crate) fn refusing() -> Self {
        Self::with(Script::Refusing)
    }

    /// Errors, then closes.
    pub(crate) fn unreachable() -> Self {
        Self::with(Script::Unreachable)
    }

    fn with(script: Script) -> Self {
        Self {
            script,
            events: Mutex::new(None),
        }
    }

    pub(crate) fn push(&self, text: &str) {
        self.emit(TransportEvent::Message(text.to_string()));
    }

    pub(crate) fn fail(&self, reason: &str) {
        self.emit(TransportEvent::Error(reason.to_string()));
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.try_send(event);
        }
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, _address: &str) -> TransportLink {
        let (link, end) = TransportLink::pair();
        match self.script {
            Script::Silent => {
                let _ = end.events.try_send(TransportEvent::Open);
                *self.events.lock().unwrap() = Some(end.events.clone());
                tokio::spawn(async move {
                    while let Ok(cmd) = end.commands.recv().await {
                        if matches!(cmd, TransportCommand::Close) {
                            break;
                        }
                    }
                    let _ = end.events.send(TransportEvent::Close).await;
                });
            }
            Script::Refusing => {
                let _ = end.events.try_send(TransportEvent::Close);
            }
            Script::Unreachable => {
                let _ = end
                    .events
                    .try_send(TransportEvent::Error("unreachable".to_string()));
                let _ = end.events.try_send(TransportEvent::Close);
            }
        }
        link
    }
}

#[derive(Default)]
struct LoopbackState {
    next_token: u64,
    sides: HashMap<u64, async_channel::Sender<PeerEvent>>,
    opened: Vec<Role>,
    fail_initiators: bool,
}

/// Peer primitives that negotiate through a single offer/answer exchange and then
/// deliver data straight to each other inside the process.
#[derive(Clone, Default)]
pub(crate) struct LoopbackPeers {
    shared: Arc<Mutex<LoopbackState>>,
}

impl LoopbackPeers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Initiators report an error instead of producing an offer.
    pub(crate) fn failing_initiators() -> Self {
        let peers = Self::default();
        peers.shared.lock().unwrap().fail_initiators = true;
        peers
    }

    /// Roles of every primitive opened so far
    pub(crate) fn opened(&self) -> Vec<Role> {
        self.shared.lock().unwrap().opened.clone()
    }

    /// Make the `nth` primitive opened (counting from 1) report an error, as a
    /// dropped connection would.
    pub(crate) fn fail_opened(&self, nth: u64, reason: &str) {
        if let Some(tx) = self.side(nth) {
            let _ = tx.try_send(PeerEvent::Error(reason.to_string()));
        }
    }

    fn side(&self, token: u64) -> Option<async_channel::Sender<PeerEvent>> {
        self.shared.lock().unwrap().sides.get(&token).cloned()
    }
}

impl PeerFactory for LoopbackPeers {
    fn open(&self, options: PeerOptions) -> PeerLink {
        let (link, end) = PeerLink::pair();
        let (token, fail) = {
            let mut state = self.shared.lock().unwrap();
            state.next_token += 1;
            let token = state.next_token;
            state.sides.insert(token, end.events.clone());
            state.opened.push(options.role);
            (token, state.fail_initiators)
        };

        if options.role.is_initiator() {
            let event = if fail {
                PeerEvent::Error("negotiation failed".to_string())
            } else {
                PeerEvent::Signal(json!({"type": "offer", "token": token}))
            };
            let _ = end.events.try_send(event);
        }

        tokio::spawn(run_loopback(self.clone(), token, options.stream, end));
        link
    }
}

async fn run_loopback(peers: LoopbackPeers, token: u64, stream: Option<MediaStream>, end: PeerEnd) {
    let mut partner: Option<u64> = None;

    while let Ok(cmd) = end.commands.recv().await {
        match cmd {
            PeerCommand::Signal(data) => {
                let Some(remote) = data["token"].as_u64() else {
                    continue;
                };
                match data["type"].as_str() {
                    Some("offer") => {
                        let answer = json!({"type": "answer", "token": token});
                        let _ = end.events.try_send(PeerEvent::Signal(answer));
                    }
                    Some("answer") => {}
                    _ => continue,
                }
                partner = Some(remote);
                let _ = end.events.try_send(PeerEvent::Connect);
                if let (Some(stream), Some(tx)) = (stream.as_ref(), peers.side(remote)) {
                    let _ = tx.try_send(PeerEvent::Stream(stream.clone()));
                }
            }
            PeerCommand::Send(bytes) => {
                if let Some(tx) = partner.and_then(|p| peers.side(p)) {
                    let _ = tx.try_send(PeerEvent::Data(bytes));
                }
            }
            PeerCommand::Destroy => break,
        }
    }

    let remote = partner.and_then(|p| peers.side(p));
    peers.shared.lock().unwrap().sides.remove(&token);
    let _ = end.events.try_send(PeerEvent::Close);
    if let Some(tx) = remote {
        let _ = tx.try_send(PeerEvent::Close);
    }
}
