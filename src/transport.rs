//! Socket transport
//!
//! The session never talks to a websocket directly: it asks a
//! `SocketFactory` for a `Socket` and receives the socket's events through
//! the `SocketListener` it hands over. `WsSocketFactory` is the real
//! tokio-tungstenite implementation; tests substitute their own factory.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::session::SessionCommand;

/// A live (or connecting) socket owned by a session
pub trait Socket: Send {
    /// Queue a text frame for sending
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Close the connection; further sends fail
    fn close(&self);
}

/// Creates and starts sockets for a session
pub trait SocketFactory: Send + Sync {
    /// Start connecting to `url`, reporting every event to `listener`
    fn create(&self, url: &str, listener: SocketListener) -> Result<Box<dyn Socket>, TransportError>;
}

/// Event reported by a socket
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Close { closed_by_server: bool },
    Error(TransportError),
}

/// Event sink a socket reports to
///
/// Every event is queued on the session's command channel, so the session
/// processes them one at a time and in order. Holds only a weak handle:
/// a socket never keeps a dropped session alive.
#[derive(Debug, Clone)]
pub struct SocketListener {
    generation: u64,
    commands: mpsc::WeakUnboundedSender<SessionCommand>,
}

impl SocketListener {
    pub(crate) fn new(generation: u64, commands: mpsc::WeakUnboundedSender<SessionCommand>) -> Self {
        Self {
            generation,
            commands,
        }
    }

    pub fn on_open(&self) {
        self.report(TransportEvent::Open);
    }

    pub fn on_message(&self, text: impl Into<String>) {
        self.report(TransportEvent::Message(text.into()));
    }

    pub fn on_close(&self, closed_by_server: bool) {
        self.report(TransportEvent::Close { closed_by_server });
    }

    pub fn on_error(&self, error: TransportError) {
        self.report(TransportEvent::Error(error));
    }

    fn report(&self, event: TransportEvent) {
        let Some(commands) = self.commands.upgrade() else {
            debug!("Session gone, dropping transport event {:?}", event);
            return;
        };
        let _ = commands.send(SessionCommand::Transport {
            generation: self.generation,
            event,
        });
    }
}

/// Commands from the session to a websocket task
#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

/// Socket handle backed by a tokio-tungstenite task
#[derive(Debug)]
pub struct WsSocket {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Socket for WsSocket {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Opens real websocket connections with tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct WsSocketFactory;

impl SocketFactory for WsSocketFactory {
    fn create(&self, url: &str, listener: SocketListener) -> Result<Box<dyn Socket>, TransportError> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(url.to_string(), listener, outbound_rx));
        Ok(Box::new(WsSocket {
            outbound: outbound_tx,
        }))
    }
}

/// Drive one websocket connection
///
/// Connects, then pumps outbound frames to the socket and inbound frames
/// to the listener until either side closes.
async fn run_socket(
    url: String,
    listener: SocketListener,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    debug!("Connecting to {}", url);

    let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}", url, e);
            listener.on_error(TransportError::Connect(e.to_string()));
            return;
        }
    };

    info!("WebSocket connected to {}", url);
    listener.on_open();

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        error!("WebSocket send failed: {}", e);
                        listener.on_error(e.into());
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    debug!("Closing WebSocket to {}", url);
                    let _ = ws_sender.close().await;
                    listener.on_close(false);
                    break;
                }
            },
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    listener.on_message(text.to_string());
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server sent close frame: {:?}", frame);
                    listener.on_close(true);
                    break;
                }
                Some(Ok(_)) => {
                    // Binary, ping and pong frames - ignore
                    // (websocket-level pong is handled by tungstenite)
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    listener.on_error(e.into());
                    break;
                }
                None => {
                    debug!("WebSocket stream ended");
                    listener.on_close(true);
                    break;
                }
            },
        }
    }

    debug!("Socket task ended for {}", url);
}
