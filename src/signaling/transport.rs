use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tracing::{debug, info, warn};

pub const DEFAULT_RENDEZVOUS_URL: &str = "ws://127.0.0.1:3479";

/// Lifecycle and traffic reported by a rendezvous transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Close,
    Error(String),
}

/// Instructions for a rendezvous transport
#[derive(Debug)]
pub enum TransportCommand {
    Send(OutboundMessage),
    Close,
}

/// Wrapper for outbound text frames using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    pub fn new(s: impl Into<Utf8Bytes>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

/// Client side of a transport: commands go out, events come back.
pub struct TransportLink {
    pub commands: async_channel::Sender<TransportCommand>,
    pub events: async_channel::Receiver<TransportEvent>,
}

/// Transport side of a [`TransportLink`].
pub struct TransportEnd {
    pub commands: async_channel::Receiver<TransportCommand>,
    pub events: async_channel::Sender<TransportEvent>,
}

impl TransportLink {
    pub fn pair() -> (TransportLink, TransportEnd) {
        let (cmd_tx, cmd_rx) = async_channel::unbounded();
        let (event_tx, event_rx) = async_channel::unbounded();
        (
            TransportLink {
                commands: cmd_tx,
                events: event_rx,
            },
            TransportEnd {
                commands: cmd_rx,
                events: event_tx,
            },
        )
    }
}

/// Opens rendezvous transports.
///
/// `connect` must not block: it hands back a link right away and reports
/// `Open`, `Error` and `Close` on it as the connection progresses. After `Close`
/// no further events are sent.
pub trait Connector: Send + Sync {
    fn connect(&self, address: &str) -> TransportLink;
}

/// WebSocket transport backed by tokio-tungstenite. Must be used inside a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(&self, address: &str) -> TransportLink {
        let (link, end) = TransportLink::pair();
        tokio::spawn(run_websocket(address.to_owned(), end));
        link
    }
}

async fn run_websocket(address: String, end: TransportEnd) {
    let ws_stream = match connect_async(address.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!("WebSocket connect to {} failed: {}", address, e);
            let _ = end.events.send(TransportEvent::Error(e.to_string())).await;
            let _ = end.events.send(TransportEvent::Close).await;
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    info!("WebSocket connected to {}", address);
    if end.events.send(TransportEvent::Open).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            cmd = end.commands.recv() => match cmd {
                Ok(TransportCommand::Send(msg)) => {
                    if let Err(e) = ws_tx.send(Message::Text(msg.into_inner())).await {
                        warn!("WebSocket send error: {}", e);
                        let _ = end.events.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
                // a dropped link closes the socket as well
                Ok(TransportCommand::Close) | Err(_) => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },

            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    debug!("Received {} bytes from {}", text.len(), address);
                    let event = TransportEvent::Message(text.as_str().to_owned());
                    if end.events.send(event).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Close received from {}", address);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    let _ = end.events.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
            }
        }
    }

    info!("WebSocket disconnected: {}", address);
    let _ = end.events.send(TransportEvent::Close).await;
}
