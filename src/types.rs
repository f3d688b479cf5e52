//! Basic type definitions for the chat client
//!
//! Provides newtype wrappers for type safety:
//! - `CallId`: counter-based correlation id for outgoing method calls
//! - `SubscriptionId`: UUID-based id for stream subscriptions
//! - `SessionId`: server-issued id of an open DDP session

use uuid::Uuid;

/// Correlation id of an outgoing method call (newtype pattern)
///
/// Rendered on the wire as a decimal string. Implements Hash and Eq
/// for use as HashMap keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(pub String);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mints correlation ids for one session
///
/// Monotonically increasing, starting at 1, so an id is never reused
/// while a call carrying it can still be outstanding.
#[derive(Debug)]
pub struct CallIdGenerator {
    next: u64,
}

impl CallIdGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Take the next id
    pub fn next_id(&mut self) -> CallId {
        let id = CallId(self.next.to_string());
        self.next += 1;
        id
    }
}

impl Default for CallIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique subscription identifier
///
/// Wraps a UUID v4; also used as the `id` of `sub`/`unsub` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Create a new random subscription ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session identifier issued by the server in the `connected` frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket has been created yet
    Idle,
    /// Socket requested, waiting for the `connected` frame
    Connecting,
    /// Handshake complete, calls may be issued
    Open,
    /// Socket gone, by either side or after an error
    Closed,
}

impl ConnectionState {
    /// Whether a socket is (or is about to be) live in this state
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}
