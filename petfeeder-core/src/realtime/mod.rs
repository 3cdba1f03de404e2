//! Realtime change feed over a websocket.
//!
//! One socket per subscription. The client joins a channel configured for
//! `postgres_changes` on one table and scope, keeps it alive with heartbeats,
//! and re-joins with backoff when the socket drops.

mod client;
pub mod protocol;

pub use client::RealtimeClient;

use std::time::Duration;

use rand::Rng;

use crate::error::ServiceError;

/// Errors that can occur on a realtime connection.
#[derive(Debug)]
pub enum RealtimeError {
    /// No session to authorize the channel with
    NotSignedIn,
    /// Failed to connect to server
    ConnectionError(String),
    /// WebSocket error
    WebSocketError(String),
    /// The server refused the join
    JoinRejected(String),
    /// No join reply in time
    JoinTimeout,
    /// The server went away
    ConnectionClosed,
}

impl std::fmt::Display for RealtimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RealtimeError::NotSignedIn => write!(f, "Not signed in"),
            RealtimeError::ConnectionError(e) => write!(f, "Connection error: {}", e),
            RealtimeError::WebSocketError(e) => write!(f, "WebSocket error: {}", e),
            RealtimeError::JoinRejected(reason) => write!(f, "Subscription rejected: {}", reason),
            RealtimeError::JoinTimeout => write!(f, "Subscription timed out"),
            RealtimeError::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for RealtimeError {}

impl From<RealtimeError> for ServiceError {
    fn from(e: RealtimeError) -> Self {
        ServiceError::new(e.to_string())
    }
}

/// How a dropped feed is re-established.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Give up after this many failed attempts
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Exponential delay before attempt `attempt` (0-based), capped.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// [`base_delay`](Self::base_delay) with 50-100% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::rng().random_range(0.5..=1.0);
        self.base_delay(attempt).mul_f64(jitter)
    }
}
