//! Top-level error type for murmur.

use crate::auth::{AuthError, CredentialError};
use crate::classifier::ClassifierError;
use crate::connection::ConnectionError;
use crate::transport::TransportError;

/// Error type spanning every murmur component.
#[derive(Debug, thiserror::Error)]
pub enum MurmurError {
    /// Configuration could not be read, parsed or validated.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("classification error: {0}")]
    Classifier(#[from] ClassifierError),

    /// Logging could not be initialised.
    #[error("logging error: {0}")]
    Logging(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, MurmurError>;
