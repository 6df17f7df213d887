//! Credential Store boundary and its implementations.
//!
//! - [`KeyringCredentialStore`]: OS credential store via `keyring`
//!   (Keychain, Secret Service, Windows Credential Manager)
//! - [`MemoryCredentialStore`]: process-local map, for tests and ephemeral sessions

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Errors raised by a [`CredentialStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("credential storage error: {0}")]
    Storage(String),

    #[error("credential store access denied: {0}")]
    AccessDenied(String),
}

/// Secret storage keyed by name.
///
/// Implementations are synchronous; platform stores answer quickly and are
/// called outside any async lock.
pub trait CredentialStore: Send + Sync {
    /// Read `key`. A missing entry is `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;

    /// Create or overwrite `key`.
    fn set(&self, key: &str, secret: &str) -> Result<(), CredentialError>;

    /// Remove `key`. Deleting a missing entry succeeds.
    fn delete(&self, key: &str) -> Result<(), CredentialError>;
}

/// Default keyring service name.
pub const DEFAULT_KEYRING_SERVICE: &str = "murmur";

/// Credential store backed by the platform keyring.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, CredentialError> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| CredentialError::Storage(format!("failed to open keyring entry: {e}")))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_KEYRING_SERVICE)
    }
}

fn keyring_error(action: &str, e: keyring::Error) -> CredentialError {
    match e {
        keyring::Error::NoStorageAccess(inner) => {
            CredentialError::AccessDenied(format!("{action}: {inner}"))
        }
        other => CredentialError::Storage(format!("{action}: {other}")),
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(keyring_error("failed to read credential", e)),
        }
    }

    fn set(&self, key: &str, secret: &str) -> Result<(), CredentialError> {
        self.entry(key)?
            .set_password(secret)
            .map_err(|e| keyring_error("failed to store credential", e))
    }

    fn delete(&self, key: &str) -> Result<(), CredentialError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keyring_error("failed to delete credential", e)),
        }
    }
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn secrets(&self) -> MutexGuard<'_, HashMap<String, String>> {
        match self.secrets.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.secrets().len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets().is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        Ok(self.secrets().get(key).cloned())
    }

    fn set(&self, key: &str, secret: &str) -> Result<(), CredentialError> {
        self.secrets().insert(key.to_owned(), secret.to_owned());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CredentialError> {
        self.secrets().remove(key);
        Ok(())
    }
}
