//! Reconnection strategies
//!
//! Consulted by the session after the connection drops or a connect
//! attempt fails. No strategy means no reconnection.

use std::time::Duration;

use rand::Rng;

/// Decides whether and when to reconnect
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before reconnect attempt `attempt` (0-indexed), or `None` to give up
    fn delay_for_attempt(&self, attempt: u32) -> Option<Duration>;
}

/// Retry a fixed number of times at a fixed interval
#[derive(Debug, Clone)]
pub struct FixedInterval {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl FixedInterval {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

impl Default for FixedInterval {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(5))
    }
}

impl ReconnectionStrategy for FixedInterval {
    fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.interval)
    }
}

/// Exponential backoff with ±10% jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before jitter is applied
    fn base_delay_ms(&self, attempt: u32) -> u64 {
        let base = self.initial_delay.as_millis() as f64;
        let capped_exp = attempt.min(i32::MAX as u32) as i32;
        let delay = base * self.multiplier.powi(capped_exp);
        delay.min(self.max_delay.as_millis() as f64) as u64
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return None;
        }

        let delay_ms = self.base_delay_ms(attempt);
        let jitter_range = delay_ms / 10;
        let delay_ms = if jitter_range > 0 {
            rand::thread_rng().gen_range(delay_ms - jitter_range..=delay_ms + jitter_range)
        } else {
            delay_ms
        };
        Some(Duration::from_millis(delay_ms))
    }
}
