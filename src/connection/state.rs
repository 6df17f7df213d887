//! Connection lifecycle states.

/// Lifecycle of the backend link.
///
/// One authoritative value exists per [`ConnectionManager`](super::ConnectionManager);
/// observers read snapshots through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No link and no reconnection scheduled.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Link is up; requests may be sent.
    Connected,
    /// Waiting out the backoff before the next attempt.
    Reconnecting {
        /// Attempt about to be made, starting at 1.
        attempt: u32,
    },
    /// Reconnection gave up. Terminal until `connect()` is called again.
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Connecting or waiting to reconnect.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting { attempt } => write!(f, "Reconnecting (attempt {attempt})"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 3 }.to_string(),
            "Reconnecting (attempt 3)"
        );
        assert_eq!(
            ConnectionState::Failed("refused".into()).to_string(),
            "Failed: refused"
        );
    }

    #[test]
    fn predicates() {
        assert!(ConnectionState::default() == ConnectionState::Disconnected);
        assert!(ConnectionState::Connecting.is_transitioning());
        assert!(ConnectionState::Reconnecting { attempt: 1 }.is_transitioning());
        assert!(!ConnectionState::Connected.is_transitioning());
        assert!(ConnectionState::Failed(String::new()).is_failed());
    }
}
