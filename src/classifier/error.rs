//! Errors surfaced by the classification façade.
//!
//! Every variant carries a stable code so a UI can tell "service
//! unavailable" apart from bad input without parsing messages.

/// Stable error codes. These never change.
pub mod error_codes {
    /// Empty or oversized input text.
    pub const INVALID_INPUT: &str = "INVALID_INPUT";

    /// Remote was disabled, unhealthy or failed, and no local fallback is wired in.
    pub const FALLBACK_UNAVAILABLE: &str = "FALLBACK_UNAVAILABLE";

    /// Every remote attempt failed and no local fallback is wired in.
    pub const RETRIES_EXHAUSTED: &str = "RETRIES_EXHAUSTED";

    /// A remote attempt did not finish in time.
    pub const TIMEOUT: &str = "TIMEOUT";

    /// A remote attempt failed in transit.
    pub const REMOTE_FAILED: &str = "REMOTE_FAILED";

    /// The backend rejected the request.
    pub const REMOTE_REJECTED: &str = "REMOTE_REJECTED";

    /// The backend's answer could not be decoded.
    pub const DECODE_FAILED: &str = "DECODE_FAILED";

    /// The local classifier failed.
    pub const LOCAL_FAILED: &str = "LOCAL_FAILED";
}

use crate::connection::ConnectionError;

/// Errors produced by classification.
///
/// Display formats as `[CODE] message`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifierError {
    #[error("[{}] {}", error_codes::INVALID_INPUT, .0)]
    InvalidInput(String),

    #[error("[{}] {}", error_codes::FALLBACK_UNAVAILABLE, .0)]
    FallbackUnavailable(String),

    #[error("[{}] gave up after {attempts} attempts: {last_error}", error_codes::RETRIES_EXHAUSTED)]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("[{}] {}", error_codes::TIMEOUT, .0)]
    Timeout(String),

    #[error("[{}] {}", error_codes::REMOTE_FAILED, .0)]
    Remote(String),

    #[error("[{}] {}", error_codes::REMOTE_REJECTED, .0)]
    Rejected(String),

    #[error("[{}] {}", error_codes::DECODE_FAILED, .0)]
    Decode(String),

    #[error("[{}] {}", error_codes::LOCAL_FAILED, .0)]
    Local(String),
}

impl ClassifierError {
    /// Stable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => error_codes::INVALID_INPUT,
            Self::FallbackUnavailable(_) => error_codes::FALLBACK_UNAVAILABLE,
            Self::RetriesExhausted { .. } => error_codes::RETRIES_EXHAUSTED,
            Self::Timeout(_) => error_codes::TIMEOUT,
            Self::Remote(_) => error_codes::REMOTE_FAILED,
            Self::Rejected(_) => error_codes::REMOTE_REJECTED,
            Self::Decode(_) => error_codes::DECODE_FAILED,
            Self::Local(_) => error_codes::LOCAL_FAILED,
        }
    }

    /// Whether another remote attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::Timeout(_))
    }

    /// Whether the UI should present this as "service unavailable".
    pub fn is_service_unavailable(&self) -> bool {
        matches!(
            self,
            Self::FallbackUnavailable(_) | Self::RetriesExhausted { .. } | Self::Timeout(_)
        )
    }
}

impl From<ConnectionError> for ClassifierError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::Timeout { .. } => Self::Timeout(e.to_string()),
            ConnectionError::Remote { .. } => Self::Rejected(e.to_string()),
            ConnectionError::Protocol(_) => Self::Decode(e.to_string()),
            other => Self::Remote(other.to_string()),
        }
    }
}

impl From<murmur_intent::IntentError> for ClassifierError {
    fn from(e: murmur_intent::IntentError) -> Self {
        match e {
            murmur_intent::IntentError::EmptyInput | murmur_intent::IntentError::TooLong(_) => {
                Self::InvalidInput(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = ClassifierError::FallbackUnavailable("remote disabled".into());
        assert_eq!(err.to_string(), "[FALLBACK_UNAVAILABLE] remote disabled");
        assert_eq!(err.code(), "FALLBACK_UNAVAILABLE");

        let err = ClassifierError::RetriesExhausted {
            attempts: 3,
            last_error: "reset".into(),
        };
        assert_eq!(err.to_string(), "[RETRIES_EXHAUSTED] gave up after 3 attempts: reset");
    }

    #[test]
    fn connection_errors_map_by_retryability() {
        let lost: ClassifierError = ConnectionError::ConnectionLost("reset".into()).into();
        assert!(lost.is_retryable());

        let timeout: ClassifierError = ConnectionError::Timeout {
            id: "x".into(),
            timeout_ms: 5,
        }
        .into();
        assert_eq!(timeout.code(), error_codes::TIMEOUT);
        assert!(timeout.is_retryable());

        let rejected: ClassifierError = ConnectionError::Remote {
            code: "bad".into(),
            message: "no".into(),
        }
        .into();
        assert!(!rejected.is_retryable());

        let garbled: ClassifierError = ConnectionError::Protocol("junk".into()).into();
        assert_eq!(garbled.code(), error_codes::DECODE_FAILED);
    }

    #[test]
    fn service_unavailable_grouping() {
        assert!(ClassifierError::FallbackUnavailable(String::new()).is_service_unavailable());
        assert!(!ClassifierError::InvalidInput(String::new()).is_service_unavailable());
    }
}
