//! Backend liveness tracking.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::ClassifierError;
use crate::transport::{HttpRequest, HttpTransport};

/// Default liveness endpoint path.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Whether the backend is currently believed reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub network_available: bool,
    pub service_available: bool,
    /// `None` until the first probe has completed.
    pub last_checked: Option<DateTime<Utc>>,
}

impl Default for HealthStatus {
    /// Optimistic until a probe says otherwise.
    fn default() -> Self {
        Self {
            network_available: true,
            service_available: true,
            last_checked: None,
        }
    }
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.network_available && self.service_available
    }
}

/// Probes the backend's liveness endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<(), ClassifierError>;
}

/// [`HealthProbe`] that issues `GET <health_path>` and expects a 2xx.
pub struct HttpHealthProbe {
    transport: Arc<dyn HttpTransport>,
    path: String,
}

impl HttpHealthProbe {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_path(transport, DEFAULT_HEALTH_PATH)
    }

    pub fn with_path(transport: Arc<dyn HttpTransport>, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }
}

impl std::fmt::Debug for HttpHealthProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHealthProbe")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self) -> Result<(), ClassifierError> {
        let response = self
            .transport
            .execute(&HttpRequest::get(self.path.clone()))
            .await
            .map_err(|e| ClassifierError::Remote(e.to_string()))?;
        if response.is_success() {
            Ok(())
        } else {
            Err(ClassifierError::Remote(format!(
                "health endpoint returned {}",
                response.status
            )))
        }
    }
}
