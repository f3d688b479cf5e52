//! Session configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::reconnect::ReconnectionStrategy;

/// Default heartbeat interval
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for one session
#[derive(Clone)]
pub struct SessionConfig {
    /// The websocket URL (ws:// or wss://)
    pub url: String,
    /// Heartbeat ping interval. `None` disables heartbeats.
    pub ping_interval: Option<Duration>,
    /// Reconnection policy. `None` disables reconnection.
    pub reconnection: Option<Arc<dyn ReconnectionStrategy>>,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            reconnection: None,
        }
    }

    /// Set the heartbeat interval. A zero interval disables heartbeats.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval).filter(|period| !period.is_zero());
        self
    }

    /// Disable heartbeat pings (used by deterministic tests)
    pub fn without_ping(mut self) -> Self {
        self.ping_interval = None;
        self
    }

    pub fn reconnection(mut self, strategy: impl ReconnectionStrategy + 'static) -> Self {
        self.reconnection = Some(Arc::new(strategy));
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("url", &self.url)
            .field("ping_interval", &self.ping_interval)
            .field("reconnection", &self.reconnection.is_some())
            .finish()
    }
}
