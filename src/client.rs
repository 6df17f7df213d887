//! Wires every component together from a [`MurmurConfig`].

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::{
    CredentialStore, HttpTokenRefresher, KeyringCredentialStore, RefreshCoordinator,
};
use crate::classifier::{
    ClassificationFacade, ConnectionRemoteClassifier, HttpHealthProbe, LocalFallback,
};
use crate::config::MurmurConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::transport::http::ReqwestTransport;
use crate::transport::tls::TrustPolicy;
use crate::transport::websocket::WebSocketConnector;
use crate::transport::{DuplexConnector, HttpTransport};

/// Builder for [`MurmurClient`]. Unset collaborators are built from config.
pub struct MurmurClientBuilder {
    config: MurmurConfig,
    connector: Option<Arc<dyn DuplexConnector>>,
    http: Option<Arc<dyn HttpTransport>>,
    store: Option<Arc<dyn CredentialStore>>,
    fallback: Option<Arc<dyn LocalFallback>>,
    local_fallback: bool,
}

impl MurmurClientBuilder {
    /// Replace the WebSocket connector.
    pub fn connector(mut self, connector: Arc<dyn DuplexConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the reqwest transport used for refresh and health calls.
    pub fn http_transport(mut self, http: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(http);
        self
    }

    /// Replace the keyring credential store.
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the embedded intent classifier.
    pub fn fallback(mut self, fallback: Arc<dyn LocalFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Run without any local fallback.
    pub fn without_local_fallback(mut self) -> Self {
        self.local_fallback = false;
        self
    }

    /// # Errors
    ///
    /// Returns an error if the config is invalid, a pinned root cannot be
    /// read or the HTTP client cannot be built.
    pub fn build(self) -> Result<MurmurClient> {
        let config = self.config;
        config.validate()?;

        let trust = TrustPolicy::from_pem_files(&config.tls.pinned_roots)?;
        let http: Arc<dyn HttpTransport> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestTransport::with_options(
                config.server.http_base_url.clone(),
                config.connection.options().request_timeout,
                &trust,
            )?),
        };
        let connector: Arc<dyn DuplexConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(
                WebSocketConnector::new(config.server.ws_url.clone())
                    .with_connect_timeout(config.connection.connect_timeout())
                    .with_trust_policy(&trust)?,
            ),
        };
        let store: Arc<dyn CredentialStore> = match self.store {
            Some(store) => store,
            None => Arc::new(KeyringCredentialStore::new(config.auth.keyring_service.clone())),
        };

        let connection = ConnectionManager::new(connector, config.connection.options());
        let refresher = Arc::new(HttpTokenRefresher::with_path(
            Arc::clone(&http),
            config.server.refresh_path.clone(),
        ));
        let auth = RefreshCoordinator::with_timeout(
            Arc::clone(&http),
            store,
            refresher,
            config.auth.refresh_timeout(),
        );
        let authorized: Arc<dyn HttpTransport> = Arc::new(auth.clone());

        let mut classifier = ClassificationFacade::builder(config.classifier_settings())
            .remote(Arc::new(ConnectionRemoteClassifier::new(connection.clone())))
            .health_probe(Arc::new(HttpHealthProbe::with_path(
                authorized,
                config.server.health_path.clone(),
            )));
        if let Some(user_id) = &config.server.user_id {
            classifier = classifier.user_id(user_id.clone());
        }
        if self.local_fallback {
            let fallback: Arc<dyn LocalFallback> = match self.fallback {
                Some(fallback) => fallback,
                None => Arc::new(murmur_intent::IntentClassifier::new()),
            };
            classifier = classifier.fallback(fallback);
        }

        Ok(MurmurClient {
            config,
            connection,
            auth,
            classifier: classifier.build(),
        })
    }
}

/// The assembled client: one connection, one refresh coordinator and one
/// classification façade.
#[derive(Debug, Clone)]
pub struct MurmurClient {
    config: MurmurConfig,
    connection: ConnectionManager,
    auth: RefreshCoordinator,
    classifier: ClassificationFacade,
}

impl MurmurClient {
    pub fn builder(config: MurmurConfig) -> MurmurClientBuilder {
        MurmurClientBuilder {
            config,
            connector: None,
            http: None,
            store: None,
            fallback: None,
            local_fallback: true,
        }
    }

    /// Build with every collaborator derived from `config`.
    ///
    /// # Errors
    ///
    /// See [`MurmurClientBuilder::build`].
    pub fn from_config(config: MurmurConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &MurmurConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn auth(&self) -> &RefreshCoordinator {
        &self.auth
    }

    pub fn classifier(&self) -> &ClassificationFacade {
        &self.classifier
    }

    /// Start background maintenance. Stops when `cancel` fires.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.classifier.spawn_maintenance(cancel)
    }

    /// Close the connection, failing anything still in flight.
    pub async fn shutdown(&self) {
        self.auth.reset();
        self.connection.disconnect().await;
        tracing::info!("murmur client shut down");
    }
}
