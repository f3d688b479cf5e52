//! Test doubles for the socket transport
//!
//! `MockSocketFactory` hands every created socket's `SocketListener` to the
//! paired `MockServer`, which injects server frames through it and reads
//! back whatever the session sent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::session::{ConnectListener, Session};
use crate::subscription::StreamListener;
use crate::transport::{Socket, SocketFactory, SocketListener};
use crate::types::{ConnectionState, SessionId};

/// How long a test waits for the session before failing
const WAIT: Duration = Duration::from_secs(2);

pub(crate) struct MockSocketFactory {
    created: mpsc::UnboundedSender<(String, SocketListener)>,
    frames: mpsc::UnboundedSender<String>,
    closes: Arc<AtomicUsize>,
}

pub(crate) struct MockServer {
    created: mpsc::UnboundedReceiver<(String, SocketListener)>,
    frames: mpsc::UnboundedReceiver<String>,
    closes: Arc<AtomicUsize>,
    last_url: String,
}

struct MockSocket {
    frames: mpsc::UnboundedSender<String>,
    closes: Arc<AtomicUsize>,
}

impl Socket for MockSocket {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.frames.send(text).map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl SocketFactory for MockSocketFactory {
    fn create(&self, url: &str, listener: SocketListener) -> Result<Box<dyn Socket>, TransportError> {
        let _ = self.created.send((url.to_string(), listener));
        Ok(Box::new(MockSocket {
            frames: self.frames.clone(),
            closes: self.closes.clone(),
        }))
    }
}

pub(crate) fn mock_transport() -> (MockSocketFactory, MockServer) {
    let (created_tx, created_rx) = mpsc::unbounded_channel();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));

    let factory = MockSocketFactory {
        created: created_tx,
        frames: frames_tx,
        closes: closes.clone(),
    };
    let server = MockServer {
        created: created_rx,
        frames: frames_rx,
        closes,
        last_url: String::new(),
    };
    (factory, server)
}

impl MockServer {
    /// Wait for the session to create a socket
    pub(crate) async fn accept(&mut self) -> SocketListener {
        let (url, listener) = timeout(WAIT, self.created.recv())
            .await
            .expect("no socket created")
            .expect("factory dropped");
        self.last_url = url;
        listener
    }

    /// Accept a socket and complete the handshake with `session_id`
    pub(crate) async fn handshake(&mut self, session_id: &str) -> SocketListener {
        let socket = self.accept().await;
        socket.on_open();
        let frame = self.next_frame().await;
        assert_eq!(frame["msg"], "connect");
        socket.on_message(format!(r#"{{"msg":"connected","session":"{}"}}"#, session_id));
        socket
    }

    /// Next frame the session sent, parsed
    pub(crate) async fn next_frame(&mut self) -> Value {
        let text = timeout(WAIT, self.frames.recv())
            .await
            .expect("no frame sent")
            .expect("session dropped");
        serde_json::from_str(&text).expect("session sent invalid JSON")
    }

    /// True if no socket gets created within `window`
    pub(crate) async fn no_socket_within(&mut self, window: Duration) -> bool {
        timeout(window, self.created.recv()).await.is_err()
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn last_url(&self) -> &str {
        &self.last_url
    }
}

/// Records lifecycle callbacks as strings
#[derive(Default)]
pub(crate) struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ConnectListener for RecordingListener {
    fn on_connect(&self, session_id: &SessionId) {
        self.events.lock().unwrap().push(format!("connect:{}", session_id));
    }

    fn on_disconnect(&self, closed_by_server: bool) {
        self.events.lock().unwrap().push(format!("disconnect:{}", closed_by_server));
    }

    fn on_connect_error(&self, error: &SessionError) {
        self.events.lock().unwrap().push(format!("connect_error:{}", error));
    }
}

/// Records stream events as strings
#[derive(Default)]
pub(crate) struct RecordingStream {
    events: Mutex<Vec<String>>,
}

impl RecordingStream {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl StreamListener for RecordingStream {
    fn on_added(&self, id: &str, fields: &Value) {
        self.events.lock().unwrap().push(format!("added:{}:{}", id, fields));
    }

    fn on_changed(&self, id: &str, fields: &Value) {
        self.events.lock().unwrap().push(format!("changed:{}:{}", id, fields));
    }

    fn on_removed(&self, id: &str) {
        self.events.lock().unwrap().push(format!("removed:{}", id));
    }
}

/// A session over the mock transport, already `Open` as session "S1"
pub(crate) async fn open_session() -> (Session, MockServer, SocketListener, Arc<RecordingListener>) {
    let (factory, mut server) = mock_transport();
    let session = Session::new(SessionConfig::new("ws://test/websocket").without_ping(), factory);
    let listener = Arc::new(RecordingListener::default());

    session.connect(listener.clone()).await.unwrap();
    let socket = server.handshake("S1").await;
    timeout(WAIT, session.wait_for_state(ConnectionState::Open))
        .await
        .expect("session never opened")
        .unwrap();

    (session, server, socket, listener)
}
