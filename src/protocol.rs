//! Wire envelopes for the duplex backend channel.
//!
//! Every frame is a JSON object tagged by `type`. Requests carry a
//! correlation `id` which the server echoes on the matching `response` or
//! `error` frame; that is the only link between a reply and the caller
//! waiting for it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Frames sent from the client to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A request awaiting exactly one `response` or `error` with the same id.
    Request {
        id: String,
        payload: serde_json::Value,
    },
    /// Liveness probe sent on the heartbeat interval.
    Ping { timestamp_ms: i64 },
}

/// Frames received from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Successful reply to the request with the same id.
    Response {
        id: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Rejection. With an id it answers that request; without one it is a
    /// connection-level notice.
    Error {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        code: String,
        #[serde(default)]
        message: String,
    },
    /// Reply to a heartbeat ping.
    Pong {
        #[serde(default)]
        timestamp_ms: Option<i64>,
    },
    /// Unsolicited server-initiated message.
    Push {
        #[serde(default)]
        topic: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

impl ClientFrame {
    /// Build a heartbeat ping stamped with the current wall-clock time.
    pub fn ping_now() -> Self {
        Self::Ping {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Serialize to a transport frame.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; only possible for payloads containing
    /// non-string map keys.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

impl ServerFrame {
    /// Parse a transport frame.
    ///
    /// # Errors
    ///
    /// Returns the deserializer error for malformed or unknown frames.
    pub fn decode(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }

    /// Correlation id, if this frame answers a request.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Response { id, .. } => Some(id),
            Self::Error { id, .. } => id.as_deref(),
            Self::Pong { .. } | Self::Push { .. } => None,
        }
    }
}
