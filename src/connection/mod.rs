//! Persistent duplex link to the classification backend.
//!
//! [`ConnectionManager`] owns a single logical connection. It drives the
//! [`ConnectionState`] machine, keeps the link alive with heartbeats,
//! reconnects with capped exponential backoff, and routes each inbound
//! response to the caller that issued the matching request.
//!
//! Requests are never resent after a link failure: every request that was
//! in flight when the link dropped fails with
//! [`ConnectionError::ConnectionLost`] and the caller decides whether to
//! try again.

mod backoff;
mod manager;
mod pending;
mod state;

use std::time::Duration;

pub use backoff::{
    BASE_RECONNECT_DELAY, MAX_RECONNECT_ATTEMPTS, MAX_RECONNECT_DELAY, ReconnectPolicy,
};
pub use manager::{ConnectionManager, PushMessage, UNMATCHED_RESPONSE_TOPIC};
pub use state::ConnectionState;

use crate::transport::TransportError;

/// Default time a request waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Default interval between heartbeat pings.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Errors surfaced by the [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// No link is up and none is being established.
    #[error("not connected")]
    NotConnected,

    /// Reconnection gave up; call `connect()` to try again.
    #[error("connection unavailable: {0}")]
    Unavailable(String),

    /// `disconnect()` was called while the request was outstanding.
    #[error("disconnected")]
    Disconnected,

    /// The link failed while the request was outstanding.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// No response arrived within the request timeout.
    #[error("request {id} timed out after {timeout_ms}ms")]
    Timeout { id: String, timeout_ms: u64 },

    /// The backend answered with an `error` frame.
    #[error("remote error {code}: {message}")]
    Remote { code: String, message: String },

    /// A frame could not be encoded or was malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ConnectionError {
    /// Whether a caller may reasonably issue the request again.
    ///
    /// Link failures and timeouts are retryable. Protocol violations and
    /// explicit rejections from the backend are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectionLost(_)
                | Self::Timeout { .. }
                | Self::Transport(_)
        )
    }
}

/// Tunables for a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}
