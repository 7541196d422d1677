use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::actor::Command;
use super::types::MeshError;
use crate::bus::isolate;
use crate::signaling::PeerId;

pub(crate) type ActionHandler = Arc<dyn Fn(Value, &PeerId) + Send + Sync>;

/// Wire form of an action, `{"action": name, "data": payload}`.
#[derive(Serialize)]
struct OutboundAction<'a, P> {
    action: &'a str,
    data: &'a P,
}

#[derive(Deserialize)]
struct InboundAction {
    action: String,
    #[serde(default)]
    data: Value,
}

pub(crate) fn encode<P: Serialize>(name: &str, data: &P) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&OutboundAction { action: name, data })
}

/// One receiver per action name; the last registration wins.
#[derive(Default)]
pub(crate) struct ActionRegistry {
    handlers: RwLock<HashMap<String, ActionHandler>>,
}

impl ActionRegistry {
    pub(crate) fn set(&self, name: &str, handler: ActionHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), handler);
    }

    /// Decode a chunk received from `peer` and hand it to its receiver.
    /// Returns whether a receiver ran.
    pub(crate) fn dispatch(&self, peer: &PeerId, raw: &[u8]) -> bool {
        let inbound: InboundAction = match serde_json::from_slice(raw) {
            Ok(a) => a,
            Err(e) => {
                debug!("Dropping malformed action from {}: {}", peer, e);
                return false;
            }
        };

        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&inbound.action)
            .cloned();

        match handler {
            Some(handler) => {
                isolate(&inbound.action, || handler(inbound.data, peer));
                true
            }
            None => {
                debug!("No receiver for action '{}' from {}", inbound.action, peer);
                false
            }
        }
    }
}

/// Sending half of an action created by [`Mesh::make_action`](super::Mesh::make_action).
pub struct ActionSender<P> {
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    _payload: PhantomData<fn(&P)>,
}

impl<P> Clone for ActionSender<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            commands: self.commands.clone(),
            _payload: PhantomData,
        }
    }
}

impl<P: Serialize> ActionSender<P> {
    pub(crate) fn new(name: Arc<str>, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            name,
            commands,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send `data` to the connected peers listed in `targets`, or to every connected
    /// peer if `targets` is empty. Peers that are not connected are skipped.
    pub fn send(&self, data: &P, targets: &[PeerId]) -> Result<(), MeshError> {
        let payload = encode(&self.name, data)?;
        self.commands
            .send(Command::Broadcast {
                payload,
                targets: targets.to_vec(),
            })
            .map_err(|_| MeshError::Stopped)
    }

    pub fn broadcast(&self, data: &P) -> Result<(), MeshError> {
        self.send(data, &[])
    }
}

/// Receiving half of an action created by [`Mesh::make_action`](super::Mesh::make_action).
pub struct ActionReceiver<P> {
    name: Arc<str>,
    registry: Arc<ActionRegistry>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: DeserializeOwned + 'static> ActionReceiver<P> {
    pub(crate) fn new(name: Arc<str>, registry: Arc<ActionRegistry>) -> Self {
        Self {
            name,
            registry,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install the handler called with `(data, sender)` for every matching action,
    /// replacing any earlier handler for this name.
    pub fn on(&self, handler: impl Fn(P, &PeerId) + Send + Sync + 'static) {
        let name = self.name.clone();
        let erased = move |value: Value, peer: &PeerId| match serde_json::from_value::<P>(value) {
            Ok(data) => handler(data, peer),
            Err(e) => debug!("Dropping '{}' action from {}: {}", name, peer, e),
        };
        self.registry.set(&self.name, Arc::new(erased));
    }
}
