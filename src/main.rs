//! Chat Client - Demo Entry Point
//!
//! Connects to a chat server, optionally logs in, and prints lifecycle
//! events until interrupted.
//!
//! Usage: chat_client_v1 [URL] [USERNAME PASSWORD]

use std::env;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_client_v1::{
    ConnectListener, ConnectionState, FixedInterval, Session, SessionConfig, SessionError,
    SessionId,
};

/// Default server address
const DEFAULT_URL: &str = "ws://127.0.0.1:3000/websocket";

/// Prints lifecycle events
struct ConsoleListener;

impl ConnectListener for ConsoleListener {
    fn on_connect(&self, session_id: &SessionId) {
        info!("Connected to server (session {})", session_id);
    }

    fn on_disconnect(&self, closed_by_server: bool) {
        info!("Disconnected from server (by server: {})", closed_by_server);
    }

    fn on_connect_error(&self, error: &SessionError) {
        error!("Connection error with server: {}", error);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_client_v1=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_client_v1=info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let url = args.next().unwrap_or_else(|| DEFAULT_URL.to_string());
    let credentials = args.next().zip(args.next());

    let config = SessionConfig::new(url).reconnection(FixedInterval::default());
    let session = Session::with_websocket(config);
    session.connect(Arc::new(ConsoleListener)).await?;

    tokio::select! {
        opened = session.wait_for_state(ConnectionState::Open) => opened?,
        _ = tokio::signal::ctrl_c() => {
            session.disconnect().await;
            return Ok(());
        }
    }

    if let Some((username, password)) = credentials {
        match session.login_with_password(&username, &password).await {
            Ok(token) => info!("Login successful, user {}", token.user_id),
            Err(e) => error!("Login failed: {}", e),
        }
    }

    tokio::signal::ctrl_c().await?;
    session.disconnect().await;

    Ok(())
}
