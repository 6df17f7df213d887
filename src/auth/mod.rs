//! Bearer credentials and transparent refresh.
//!
//! [`RefreshCoordinator`] wraps an [`HttpTransport`](crate::transport::HttpTransport):
//! it attaches the stored access credential to each request and, when the
//! backend answers 401, runs a single refresh shared by every caller that
//! hit the same expiry, then replays each of their requests once.
//!
//! When the refresh fails, stored credentials are cleared and
//! [`AuthEvent::ForcedLogout`] is broadcast so the application can return
//! to its sign-in flow.

mod coordinator;
mod refresher;
mod store;

pub use coordinator::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, RefreshCoordinator};
pub use refresher::{DEFAULT_REFRESH_PATH, HttpTokenRefresher, TokenPair, TokenRefresher};
pub use store::{
    CredentialError, CredentialStore, DEFAULT_KEYRING_SERVICE, KeyringCredentialStore,
    MemoryCredentialStore,
};

use crate::transport::{HttpResponse, TransportError};

/// Errors surfaced by the auth layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The credential was rejected and could not be refreshed. Carries the
    /// caller's original 401 response.
    #[error("unauthorized (HTTP {})", .0.status)]
    Unauthorized(HttpResponse),

    /// No usable refresh credential; the user has to sign in again.
    #[error("re-authentication required: {0}")]
    ReauthenticationRequired(String),

    /// The refresh endpoint answered with a non-success status.
    #[error("refresh rejected with HTTP {0}")]
    RefreshRejected(u16),

    /// The refresh call failed for any other reason.
    #[error("refresh failed: {0}")]
    RefreshFailed(String),

    /// Gave up waiting for an in-flight refresh.
    #[error("timed out waiting for credential refresh")]
    Timeout,

    /// The coordinator was reset while this caller was queued.
    #[error("credential refresh cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl AuthError {
    /// Whether the error means the session is over and the user must sign in.
    pub fn requires_sign_in(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_) | Self::ReauthenticationRequired(_)
        )
    }
}

/// Notifications about the credential lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A refresh succeeded and new credentials were stored.
    Refreshed,
    /// A refresh failed; stored credentials were cleared.
    ForcedLogout { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_message_shows_status() {
        let err = AuthError::Unauthorized(HttpResponse::new(401, "expired"));
        assert_eq!(err.to_string(), "unauthorized (HTTP 401)");
        assert!(err.requires_sign_in());
    }

    #[test]
    fn transient_errors_do_not_require_sign_in() {
        assert!(!AuthError::Timeout.requires_sign_in());
        assert!(!AuthError::Transport(TransportError::Timeout("slow".into())).requires_sign_in());
        assert!(AuthError::ReauthenticationRequired("no refresh token".into()).requires_sign_in());
    }
}
