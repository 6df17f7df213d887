//! Pluggable trust strategy for TLS connections.
//!
//! Certificate pinning is a transport concern: the strategy is applied to the
//! HTTP client and to the WebSocket handshake when they are built, and the
//! rest of the crate never sees it.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;

use super::TransportError;

/// Which certificates the client trusts.
#[derive(Debug, Clone, Default)]
pub enum TrustPolicy {
    /// The platform's and bundled web PKI roots.
    #[default]
    SystemRoots,
    /// Only the given PEM-encoded roots. Built-in roots are disabled.
    PinnedRoots(Vec<Vec<u8>>),
}

impl TrustPolicy {
    /// Build a pinned policy from PEM files on disk.
    ///
    /// An empty `paths` list yields [`TrustPolicy::SystemRoots`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] if any file cannot be read.
    pub fn from_pem_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, TransportError> {
        if paths.is_empty() {
            return Ok(Self::SystemRoots);
        }
        let mut roots = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let pem = std::fs::read(path).map_err(|e| {
                TransportError::Tls(format!("cannot read pinned root {}: {e}", path.display()))
            })?;
            roots.push(pem);
        }
        Ok(Self::PinnedRoots(roots))
    }

    #[must_use]
    pub fn is_pinned(&self) -> bool {
        matches!(self, Self::PinnedRoots(_))
    }

    /// Apply this policy to a reqwest client builder.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] if a pinned root is not valid PEM.
    pub fn apply(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, TransportError> {
        match self {
            Self::SystemRoots => Ok(builder),
            Self::PinnedRoots(roots) => {
                let mut builder = builder.tls_built_in_root_certs(false);
                for pem in roots {
                    let cert = reqwest::Certificate::from_pem(pem)
                        .map_err(|e| TransportError::Tls(format!("invalid pinned root: {e}")))?;
                    builder = builder.add_root_certificate(cert);
                }
                Ok(builder)
            }
        }
    }

    /// rustls client configuration for the WebSocket handshake.
    ///
    /// `None` for [`TrustPolicy::SystemRoots`]: the connector's bundled web
    /// PKI roots are used as they are.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] if a pinned root is not valid PEM or
    /// holds no certificate.
    pub fn rustls_config(&self) -> Result<Option<Arc<rustls::ClientConfig>>, TransportError> {
        let Self::PinnedRoots(pems) = self else {
            return Ok(None);
        };
        let mut roots = rustls::RootCertStore::empty();
        for pem in pems {
            let mut found = 0usize;
            for cert in CertificateDer::pem_slice_iter(pem) {
                let cert = cert.map_err(|e| TransportError::Tls(format!("invalid pinned root: {e}")))?;
                roots
                    .add(cert)
                    .map_err(|e| TransportError::Tls(format!("unusable pinned root: {e}")))?;
                found += 1;
            }
            if found == 0 {
                return Err(TransportError::Tls(
                    "pinned root holds no certificate".to_owned(),
                ));
            }
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(format!("unsupported TLS configuration: {e}")))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        tracing::debug!(roots = pems.len(), "pinned roots loaded for websocket");
        Ok(Some(Arc::new(config)))
    }
}
