//! Chat Client SDK Library
//!
//! Connects to a chat server speaking DDP over a persistent WebSocket,
//! built with tokio-tungstenite using the Actor pattern for session state.
//!
//! # Features
//! - WebSocket connection lifecycle with connect/disconnect callbacks
//! - Method calls correlated to their results by id
//! - Stream subscriptions (added/changed/removed events)
//! - Login by password or by resume token
//! - Heartbeat pings and pluggable reconnection strategies
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - A session actor owns the socket, pending calls and subscriptions
//! - `Session` handles send it commands; sockets report events to it
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use chat_client_v1::{NoopConnectListener, Session, SessionConfig, ConnectionState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chat_client_v1::SessionError> {
//!     let session = Session::with_websocket(SessionConfig::new("wss://open.rocket.chat/websocket"));
//!     session.connect(Arc::new(NoopConnectListener)).await?;
//!     session.wait_for_state(ConnectionState::Open).await?;
//!
//!     let token = session.login_with_password("user", "secret").await?;
//!     println!("logged in as {}", token.user_id);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod message;
pub mod pending;
pub mod reconnect;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use auth::Token;
pub use config::SessionConfig;
pub use error::{ApiError, SessionError, TransportError};
pub use message::{decode, CallOutcome, DecodedMessage, OutgoingMessage};
pub use pending::PendingCalls;
pub use reconnect::{ExponentialBackoff, FixedInterval, ReconnectionStrategy};
pub use session::{ConnectListener, NoopConnectListener, Session};
pub use subscription::StreamListener;
pub use transport::{Socket, SocketFactory, SocketListener, TransportEvent, WsSocketFactory};
pub use types::{CallId, ConnectionState, SessionId, SubscriptionId};
