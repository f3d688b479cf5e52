//! Session actor implementation
//!
//! The central actor that owns the socket, the pending-call registry and
//! the active subscriptions. Caller commands and transport events arrive
//! on one mpsc channel and are processed one at a time, so none of that
//! state needs a lock. `Session` is the cloneable handle applications use.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::message::{decode, CallOutcome, DecodedMessage, OutgoingMessage};
use crate::pending::{PendingCalls, Responder};
use crate::subscription::{StreamEvent, StreamListener, Subscription, Subscriptions};
use crate::transport::{Socket, SocketFactory, SocketListener, TransportEvent, WsSocketFactory};
use crate::types::{CallIdGenerator, ConnectionState, SessionId, SubscriptionId};

/// Connection lifecycle callbacks
///
/// Invoked from the session actor; implementations must not block.
pub trait ConnectListener: Send + Sync {
    /// Handshake finished, calls may be issued
    fn on_connect(&self, session_id: &SessionId);

    /// Connection closed
    fn on_disconnect(&self, closed_by_server: bool);

    /// A connect attempt failed before the handshake finished
    fn on_connect_error(&self, error: &SessionError);
}

/// Listener that ignores every lifecycle event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConnectListener;

impl ConnectListener for NoopConnectListener {
    fn on_connect(&self, _session_id: &SessionId) {}
    fn on_disconnect(&self, _closed_by_server: bool) {}
    fn on_connect_error(&self, _error: &SessionError) {}
}

/// Commands processed by the session actor
pub(crate) enum SessionCommand {
    /// Open a connection
    Connect {
        listener: Arc<dyn ConnectListener>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Close the connection and fail pending calls
    Disconnect { reply: oneshot::Sender<()> },
    /// Issue a method call
    Call {
        method: String,
        params: Vec<Value>,
        reply: Responder,
    },
    /// Register a stream subscription
    Subscribe { subscription: Subscription },
    /// Remove a stream subscription
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    /// Event from the socket created with `generation`
    Transport { generation: u64, event: TransportEvent },
    /// Heartbeat timer fired
    Heartbeat,
    /// Reconnect timer fired
    Reconnect,
}

/// Handle to a chat session
///
/// Cheap to clone; the session stops once every handle is dropped.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl Session {
    /// Start a session that creates its sockets with `factory`
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: SessionConfig, factory: impl SocketFactory + 'static) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let actor = SessionActor::new(config, Arc::new(factory), cmd_rx, cmd_tx.downgrade(), state_tx);
        tokio::spawn(actor.run());

        Self {
            commands: cmd_tx,
            state: state_rx,
        }
    }

    /// Start a session over real websockets
    pub fn with_websocket(config: SessionConfig) -> Self {
        Self::new(config, WsSocketFactory)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `target`
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), SessionError> {
        let mut state = self.state.clone();
        let reached = state.wait_for(|s| *s == target).await.is_ok();
        if reached {
            Ok(())
        } else {
            Err(SessionError::SessionStopped)
        }
    }

    /// Create the socket and start the handshake
    ///
    /// Returns once the socket has been requested; `listener.on_connect`
    /// fires when the server confirms the session.
    pub async fn connect(&self, listener: Arc<dyn ConnectListener>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Connect { listener, reply })?;
        rx.await.map_err(|_| SessionError::SessionStopped)?
    }

    /// Close the connection, failing every pending call
    ///
    /// Safe to call in any state; repeated calls have no further effect.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(SessionCommand::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Call a remote method and wait for its result
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Call {
            method: method.to_string(),
            params,
            reply,
        })?;
        rx.await.map_err(|_| SessionError::ConnectionClosed)?
    }

    /// Call a remote method and deserialize its result
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, SessionError> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Subscribe to a publication
    ///
    /// The subscription is sent now if the session is open, and again after
    /// every reconnect, until `unsubscribe` is called.
    pub async fn subscribe(
        &self,
        name: &str,
        params: Vec<Value>,
        listener: Arc<dyn StreamListener>,
    ) -> Result<SubscriptionId, SessionError> {
        let subscription = Subscription::new(name, params, listener);
        let id = subscription.id;
        self.send(SessionCommand::Subscribe { subscription })?;
        Ok(id)
    }

    /// Remove a subscription; returns false if it was not active
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Unsubscribe { id, reply })?;
        rx.await.map_err(|_| SessionError::SessionStopped)
    }

    fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(cmd)
            .map_err(|_| SessionError::SessionStopped)
    }
}

/// The session actor
///
/// Holds a weak sender to its own channel for sockets and timers, so the
/// channel closes once the last `Session` handle is gone.
struct SessionActor {
    config: SessionConfig,
    factory: Arc<dyn SocketFactory>,
    receiver: mpsc::UnboundedReceiver<SessionCommand>,
    commands: mpsc::WeakUnboundedSender<SessionCommand>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    socket: Option<Box<dyn Socket>>,
    /// Incremented per socket; events from older sockets are ignored
    generation: u64,
    session_id: Option<SessionId>,
    listener: Option<Arc<dyn ConnectListener>>,
    ids: CallIdGenerator,
    pending: PendingCalls,
    subscriptions: Subscriptions,
    heartbeat: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    reconnect_attempt: u32,
}

impl SessionActor {
    fn new(
        config: SessionConfig,
        factory: Arc<dyn SocketFactory>,
        receiver: mpsc::UnboundedReceiver<SessionCommand>,
        commands: mpsc::WeakUnboundedSender<SessionCommand>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            config,
            factory,
            receiver,
            commands,
            state: ConnectionState::Idle,
            state_tx,
            socket: None,
            generation: 0,
            session_id: None,
            listener: None,
            ids: CallIdGenerator::new(),
            pending: PendingCalls::new(),
            subscriptions: Subscriptions::new(),
            heartbeat: None,
            reconnect_timer: None,
            reconnect_attempt: 0,
        }
    }

    /// Run the session event loop
    ///
    /// Processes commands until every `Session` handle is dropped.
    async fn run(mut self) {
        info!("Session started for {}", self.config.url);

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        self.abort_reconnect();
        if self.socket.is_some() {
            self.close_connection();
        }
        info!("Session for {} shutting down", self.config.url);
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Connect { listener, reply } => {
                let _ = reply.send(self.handle_connect(listener));
            }
            SessionCommand::Disconnect { reply } => {
                self.handle_disconnect();
                let _ = reply.send(());
            }
            SessionCommand::Call {
                method,
                params,
                reply,
            } => {
                self.handle_call(method, params, reply);
            }
            SessionCommand::Subscribe { subscription } => {
                self.handle_subscribe(subscription);
            }
            SessionCommand::Unsubscribe { id, reply } => {
                let _ = reply.send(self.handle_unsubscribe(id));
            }
            SessionCommand::Transport { generation, event } => {
                self.handle_transport(generation, event);
            }
            SessionCommand::Heartbeat => {
                self.handle_heartbeat();
            }
            SessionCommand::Reconnect => {
                self.handle_reconnect();
            }
        }
    }

    fn handle_connect(&mut self, listener: Arc<dyn ConnectListener>) -> Result<(), SessionError> {
        if self.state.is_live() {
            return Err(SessionError::AlreadyConnected);
        }

        self.listener = Some(listener);
        self.abort_reconnect();
        self.reconnect_attempt = 0;
        self.open_socket()
    }

    fn handle_disconnect(&mut self) {
        self.abort_reconnect();

        if self.socket.is_none() {
            debug!("Disconnect requested with no live connection");
            return;
        }

        match &self.session_id {
            Some(session_id) => info!("Disconnecting session {} from {}", session_id, self.config.url),
            None => info!("Disconnecting from {}", self.config.url),
        }
        self.close_connection();
        if let Some(listener) = &self.listener {
            listener.on_disconnect(false);
        }
    }

    fn handle_call(&mut self, method: String, params: Vec<Value>, reply: Responder) {
        if self.state != ConnectionState::Open {
            let _ = reply.send(Err(SessionError::NotConnected));
            return;
        }

        let id = self.ids.next_id();
        let frame = OutgoingMessage::method(&id, &method, params);
        if self.pending.register(id.clone(), reply).is_err() {
            warn!("Correlation id {} already in use, call '{}' rejected", id, method);
            return;
        }

        match self.send_frame(&frame) {
            Ok(()) => debug!("Call {} '{}' sent ({} pending)", id, method, self.pending.len()),
            Err(e) => {
                warn!("Failed to send call {} '{}': {}", id, method, e);
                self.pending.reject(&id, e);
            }
        }
    }

    fn handle_subscribe(&mut self, subscription: Subscription) {
        info!("Subscribing to '{}' ({})", subscription.name, subscription.id);
        if self.state == ConnectionState::Open {
            if let Err(e) = self.send_frame(&subscription.sub_message()) {
                warn!("Failed to send subscription {}: {}", subscription.id, e);
            }
        }
        self.subscriptions.insert(subscription);
    }

    fn handle_unsubscribe(&mut self, id: SubscriptionId) -> bool {
        if self.subscriptions.remove(&id).is_none() {
            return false;
        }

        info!("Unsubscribed {}", id);
        if self.state == ConnectionState::Open {
            let unsub = OutgoingMessage::Unsub { id: id.to_string() };
            if let Err(e) = self.send_frame(&unsub) {
                warn!("Failed to send unsubscribe {}: {}", id, e);
            }
        }
        true
    }

    fn handle_transport(&mut self, generation: u64, event: TransportEvent) {
        if generation != self.generation || self.socket.is_none() {
            debug!("Ignoring event from stale socket {}: {:?}", generation, event);
            return;
        }

        match event {
            TransportEvent::Open => {
                debug!("Socket open, sending handshake");
                if let Err(e) = self.send_frame(&OutgoingMessage::connect()) {
                    warn!("Failed to send handshake: {}", e);
                }
            }
            TransportEvent::Message(text) => self.handle_frame(&text),
            TransportEvent::Close { closed_by_server } => self.handle_socket_closed(closed_by_server),
            TransportEvent::Error(err) => {
                if self.state == ConnectionState::Connecting {
                    warn!("Connect to {} failed: {}", self.config.url, err);
                    self.fail_connect(SessionError::Transport(err));
                } else {
                    warn!("Transport error on open session: {}", err);
                    self.handle_socket_closed(true);
                }
            }
        }
    }

    /// Dispatch one decoded frame
    fn handle_frame(&mut self, text: &str) {
        match decode(text) {
            DecodedMessage::Connected { session } => self.handle_connected(SessionId(session)),
            DecodedMessage::Failed { version } => {
                warn!("Server rejected protocol version, wants {:?}", version);
                if self.state == ConnectionState::Connecting {
                    let reason = format!(
                        "server does not support protocol version (suggested {})",
                        version.as_deref().unwrap_or("none")
                    );
                    self.close_connection();
                    if let Some(listener) = &self.listener {
                        listener.on_connect_error(&SessionError::Protocol(reason));
                    }
                }
            }
            DecodedMessage::Result { id, outcome } => {
                let found = match outcome {
                    CallOutcome::Success(payload) => self.pending.resolve(&id, payload),
                    CallOutcome::Failure(api_error) => {
                        debug!("Call {} failed: {}", id, api_error);
                        self.pending.reject(&id, SessionError::Api(api_error))
                    }
                    CallOutcome::Malformed(reason) => {
                        warn!("Malformed result for call {}: {}", id, reason);
                        self.pending.reject(&id, SessionError::Protocol(reason))
                    }
                };
                if !found {
                    debug!("Result for unknown call {} dropped", id);
                }
            }
            DecodedMessage::Added {
                collection,
                id,
                fields,
            } => {
                self.subscriptions
                    .dispatch(&collection, StreamEvent::Added { id: &id, fields: &fields });
            }
            DecodedMessage::Changed {
                collection,
                id,
                fields,
                ..
            } => {
                self.subscriptions
                    .dispatch(&collection, StreamEvent::Changed { id: &id, fields: &fields });
            }
            DecodedMessage::Removed { collection, id } => {
                self.subscriptions
                    .dispatch(&collection, StreamEvent::Removed { id: &id });
            }
            DecodedMessage::Ping { id } => {
                if let Err(e) = self.send_frame(&OutgoingMessage::Pong { id }) {
                    warn!("Failed to answer ping: {}", e);
                }
            }
            DecodedMessage::Pong { .. } => debug!("Pong received"),
            DecodedMessage::Ready { subs } => debug!("Subscriptions ready: {:?}", subs),
            DecodedMessage::NoSub { id, error } => {
                if let Some(sub) = self.subscriptions.remove_by_wire_id(&id) {
                    match error {
                        Some(err) => warn!("Subscription '{}' rejected: {}", sub.name, err),
                        None => info!("Subscription '{}' ended by server", sub.name),
                    }
                }
            }
            DecodedMessage::Updated { methods } => debug!("Methods updated: {:?}", methods),
            DecodedMessage::ServerError { reason } => warn!("Server reported error: {}", reason),
            DecodedMessage::Unknown => debug!("Unrecognized frame ignored"),
        }
    }

    fn handle_connected(&mut self, session_id: SessionId) {
        if self.state != ConnectionState::Connecting {
            debug!("Duplicate connected frame ignored");
            return;
        }

        info!("Session {} open on {}", session_id, self.config.url);
        self.set_state(ConnectionState::Open);
        self.session_id = Some(session_id.clone());
        self.reconnect_attempt = 0;
        self.start_heartbeat();

        for sub in self.subscriptions.sub_messages() {
            if let Err(e) = self.send_frame(&sub) {
                warn!("Failed to restore subscription: {}", e);
            }
        }

        if let Some(listener) = &self.listener {
            listener.on_connect(&session_id);
        }
    }

    fn handle_socket_closed(&mut self, closed_by_server: bool) {
        info!(
            "Connection to {} closed (by server: {})",
            self.config.url, closed_by_server
        );
        self.close_connection();
        if let Some(listener) = &self.listener {
            listener.on_disconnect(closed_by_server);
        }
        self.schedule_reconnect();
    }

    fn fail_connect(&mut self, error: SessionError) {
        self.close_connection();
        if let Some(listener) = &self.listener {
            listener.on_connect_error(&error);
        }
        self.schedule_reconnect();
    }

    fn handle_heartbeat(&mut self) {
        if self.state != ConnectionState::Open {
            return;
        }
        if let Err(e) = self.send_frame(&OutgoingMessage::Ping { id: None }) {
            warn!("Failed to send heartbeat: {}", e);
        }
    }

    fn handle_reconnect(&mut self) {
        self.reconnect_timer = None;
        if self.state != ConnectionState::Closed {
            return;
        }

        info!(
            "Reconnecting to {} (attempt {})",
            self.config.url, self.reconnect_attempt
        );
        if let Err(e) = self.open_socket() {
            warn!("Reconnect failed: {}", e);
            if let Some(listener) = &self.listener {
                listener.on_connect_error(&e);
            }
            self.schedule_reconnect();
        }
    }

    /// Create a socket for a new generation and enter `Connecting`
    fn open_socket(&mut self) -> Result<(), SessionError> {
        self.generation += 1;
        let listener = SocketListener::new(self.generation, self.commands.clone());
        self.set_state(ConnectionState::Connecting);

        match self.factory.create(&self.config.url, listener) {
            Ok(socket) => {
                self.socket = Some(socket);
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Closed);
                Err(e.into())
            }
        }
    }

    /// Tear down the current socket and fail every pending call
    fn close_connection(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
        self.stop_heartbeat();
        self.session_id = None;
        self.set_state(ConnectionState::Closed);

        let failed = self.pending.drain_all(SessionError::ConnectionClosed);
        if failed > 0 {
            info!("Failed {} pending calls on close", failed);
        }
    }

    fn schedule_reconnect(&mut self) {
        let Some(strategy) = self.config.reconnection.clone() else {
            return;
        };
        let Some(delay) = strategy.delay_for_attempt(self.reconnect_attempt) else {
            info!(
                "Giving up on {} after {} reconnect attempts",
                self.config.url, self.reconnect_attempt
            );
            return;
        };

        self.reconnect_attempt += 1;
        debug!("Reconnect scheduled in {:?}", delay);

        self.abort_reconnect();
        let commands = self.commands.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(SessionCommand::Reconnect);
            }
        }));
    }

    fn abort_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn start_heartbeat(&mut self) {
        self.stop_heartbeat();
        // tokio intervals reject a zero period
        let Some(period) = self.config.ping_interval.filter(|period| !period.is_zero()) else {
            return;
        };

        let commands = self.commands.clone();
        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(commands) = commands.upgrade() else {
                    break;
                };
                if commands.send(SessionCommand::Heartbeat).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }

    fn send_frame(&self, message: &OutgoingMessage) -> Result<(), SessionError> {
        let Some(socket) = &self.socket else {
            return Err(SessionError::NotConnected);
        };
        socket.send(message.encode()?)?;
        Ok(())
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Session state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }
}
