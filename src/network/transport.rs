//! Transport
//!
//! Reliable ordered message links between peers. Every implementation feeds
//! one `TransportEvent` queue and hands out one `mpsc::Sender<PeerMessage>`
//! per connected peer. WebSocket over TCP for real games, an in-memory link
//! for tests.

use std::net::SocketAddr;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async, connect_async};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::PeerMessage;
use super::session::PeerId;

/// Something happened on a link.
#[derive(Debug)]
pub enum TransportEvent {
    /// A link came up. Messages for the peer go through `sender`.
    Connected {
        /// Link identity.
        peer: PeerId,
        /// Outbound queue.
        sender: mpsc::Sender<PeerMessage>,
    },
    /// A message arrived.
    Message {
        /// Link identity.
        peer: PeerId,
        /// Decoded message.
        message: PeerMessage,
    },
    /// The link went down.
    Disconnected {
        /// Link identity.
        peer: PeerId,
    },
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to bind or connect.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

// =============================================================================
// WEBSOCKET
// =============================================================================

/// Bound WebSocket listener.
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl Listener {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close every link.
    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        self.task.abort();
    }
}

/// Accept WebSocket peers on `addr`.
pub async fn listen(
    addr: SocketAddr,
    events: mpsc::Sender<TransportEvent>,
    queue: usize,
) -> Result<Listener, TransportError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("Listening for peers on {}", local_addr);

    let (shutdown_tx, _) = broadcast::channel(1);
    let accept_shutdown = shutdown_tx.clone();
    let task = tokio::spawn(async move {
        let mut shutdown_rx = accept_shutdown.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote)) => {
                            info!("New connection from {}", remote);
                            let events = events.clone();
                            let shutdown_rx = accept_shutdown.subscribe();
                            tokio::spawn(async move {
                                accept_peer(stream, remote, events, queue, shutdown_rx).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("Listener shutting down");
                    break;
                }
            }
        }
    });

    Ok(Listener { local_addr, shutdown_tx, task })
}

async fn accept_peer(
    stream: TcpStream,
    remote: SocketAddr,
    events: mpsc::Sender<TransportEvent>,
    queue: usize,
    shutdown_rx: broadcast::Receiver<()>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", remote, e);
            return;
        }
    };
    pump(ws_stream, Uuid::new_v4(), events, queue, shutdown_rx).await;
}

/// Open a WebSocket link to an authority. Returns the link's peer id; the
/// link's events arrive on `events` and it closes when `shutdown` fires.
pub async fn connect(
    address: &str,
    port: u16,
    events: mpsc::Sender<TransportEvent>,
    queue: usize,
    shutdown: broadcast::Receiver<()>,
) -> Result<PeerId, TransportError> {
    let url = format!("ws://{}:{}", address, port);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    info!("Connected to {}", url);

    let peer = Uuid::new_v4();
    tokio::spawn(pump(ws_stream, peer, events, queue, shutdown));
    Ok(peer)
}

/// Drive one WebSocket: a sender task drains the outbound queue, this task
/// decodes inbound frames. Dropping every outbound sender closes the link.
async fn pump<S>(
    ws_stream: S,
    peer: PeerId,
    events: mpsc::Sender<TransportEvent>,
    queue: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Send
        + Unpin
        + 'static,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<PeerMessage>(queue);

    if events.send(TransportEvent::Connected { peer, sender: msg_tx }).await.is_err() {
        return;
    }

    // Spawn message sender task
    let mut sender_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Handle incoming messages
    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match PeerMessage::from_json(&text) {
                        Ok(message) => {
                            if events.send(TransportEvent::Message { peer, message }).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(%peer, "Invalid message: {}", e);
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%peer, "Peer closed the link");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(%peer, "WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            _ = &mut sender_task => {
                debug!(%peer, "Outbound queue closed");
                break;
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    sender_task.abort();
    let _ = events.send(TransportEvent::Disconnected { peer }).await;
}

// =============================================================================
// LOOPBACK
// =============================================================================

/// In-memory link between two event queues.
#[derive(Debug)]
pub struct LoopbackLink {
    a: PeerId,
    b: PeerId,
    tasks: Vec<JoinHandle<()>>,
    a_events: mpsc::Sender<TransportEvent>,
    b_events: mpsc::Sender<TransportEvent>,
}

/// Connect two event queues. Side `a` sees the link as peer `b` and vice
/// versa.
pub async fn loopback(
    a_events: mpsc::Sender<TransportEvent>,
    b_events: mpsc::Sender<TransportEvent>,
    queue: usize,
) -> LoopbackLink {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let (to_b_tx, to_b_rx) = mpsc::channel::<PeerMessage>(queue);
    let (to_a_tx, to_a_rx) = mpsc::channel::<PeerMessage>(queue);

    // Each side learns of the other before any message can flow
    let _ = a_events.send(TransportEvent::Connected { peer: b, sender: to_b_tx }).await;
    let _ = b_events.send(TransportEvent::Connected { peer: a, sender: to_a_tx }).await;

    let tasks = vec![
        tokio::spawn(forward(to_b_rx, (a, a_events.clone()), (b, b_events.clone()))),
        tokio::spawn(forward(to_a_rx, (b, b_events.clone()), (a, a_events.clone()))),
    ];
    LoopbackLink { a, b, tasks, a_events, b_events }
}

/// Carry one direction. Once the sending side drops its queue, both sides
/// see the link go down.
async fn forward(
    mut rx: mpsc::Receiver<PeerMessage>,
    from: (PeerId, mpsc::Sender<TransportEvent>),
    to: (PeerId, mpsc::Sender<TransportEvent>),
) {
    while let Some(message) = rx.recv().await {
        if to.1.send(TransportEvent::Message { peer: from.0, message }).await.is_err() {
            return;
        }
    }
    let _ = to.1.send(TransportEvent::Disconnected { peer: from.0 }).await;
    let _ = from.1.send(TransportEvent::Disconnected { peer: to.0 }).await;
}

impl LoopbackLink {
    /// Peer id side `b` sees for side `a`.
    pub fn a(&self) -> PeerId {
        self.a
    }

    /// Peer id side `a` sees for side `b`.
    pub fn b(&self) -> PeerId {
        self.b
    }

    /// Cut the link; both sides see a disconnect.
    pub async fn sever(self) {
        for task in &self.tasks {
            task.abort();
        }
        let _ = self.a_events.send(TransportEvent::Disconnected { peer: self.b }).await;
        let _ = self.b_events.send(TransportEvent::Disconnected { peer: self.a }).await;
    }
}

// =============================================================================
// TESTS
// =============================================================================
