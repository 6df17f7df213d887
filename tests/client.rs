//! End-to-end wiring: config → client → backend doubles.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use murmur::auth::{ACCESS_TOKEN_KEY, CredentialStore, MemoryCredentialStore};
use murmur::transport::HttpRequest;
use murmur::transport::http::ReqwestTransport;
use murmur::transport::memory::MemoryConnector;
use murmur::{MurmurClient, MurmurConfig};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> MurmurConfig {
    let mut config = MurmurConfig::default();
    config.server.http_base_url = server.uri();
    config.server.user_id = Some("u-1".into());
    config
}

#[tokio::test]
async fn unhealthy_backend_degrades_to_embedded_classifier() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (connector, _acceptor) = MemoryConnector::new();
    let client = MurmurClient::builder(config_for(&server))
        .connector(Arc::new(connector.clone()))
        .http_transport(Arc::new(ReqwestTransport::new(server.uri()).unwrap()))
        .credential_store(Arc::new(MemoryCredentialStore::new()))
        .build()
        .unwrap();

    let result = client.classifier().classify("set a timer for 10 minutes").await.unwrap();
    assert!(result.fallback_used);
    assert_eq!(result.category, "timer");
    assert!(!client.classifier().health().is_healthy());
    // The duplex link was never opened.
    assert_eq!(connector.attempt_count(), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn healthy_backend_classifies_remotely() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (connector, mut acceptor) = MemoryConnector::new();
    let client = MurmurClient::builder(config_for(&server))
        .connector(Arc::new(connector))
        .credential_store(Arc::new(MemoryCredentialStore::new()))
        .without_local_fallback()
        .build()
        .unwrap();

    let backend = tokio::spawn(async move {
        let mut peer = acceptor.accept().await.unwrap();
        let frame = peer.recv_json().await.unwrap();
        assert_eq!(frame["payload"]["data"]["user_id"], "u-1");
        peer.send_json(&json!({
            "type": "response",
            "id": frame["id"],
            "payload": {"category": "navigation", "intent": "get_directions", "confidence": 0.77}
        }));
        peer
    });

    let cancel = CancellationToken::new();
    let maintenance = client.start(cancel.clone());

    let result = client.classifier().classify("directions to the station").await.unwrap();
    assert!(!result.fallback_used);
    assert_eq!(result.intent, "get_directions");
    assert!(client.connection().state().is_connected());

    cancel.cancel();
    maintenance.await.unwrap();
    let _peer = backend.await.unwrap();
    client.shutdown().await;
    assert!(!client.connection().state().is_connected());
}

#[tokio::test]
async fn authorised_calls_carry_the_stored_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .and(header("Authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let (connector, _acceptor) = MemoryConnector::new();
    let client = MurmurClient::builder(config_for(&server))
        .connector(Arc::new(connector))
        .credential_store(store.clone())
        .build()
        .unwrap();

    client.auth().login("a1", "r1").unwrap();
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a1"));
    let response = client.auth().execute(HttpRequest::get("/v1/me")).await.unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn expired_token_on_health_check_is_refreshed_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "fresh", "refresh_token": "r2"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let (connector, _acceptor) = MemoryConnector::new();
    let config = config_for(&server);
    let client = MurmurClient::builder(config.clone())
        .connector(Arc::new(connector))
        .credential_store(store.clone())
        .build()
        .unwrap();
    assert_eq!(client.auth().refresh_timeout(), config.auth.refresh_timeout());

    client.auth().login("stale", "r1").unwrap();
    assert!(client.classifier().health_check().await.is_healthy());
    assert_eq!(client.auth().refresh_count(), 1);
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("fresh"));
}

#[test]
fn pinned_root_without_certificate_fails_build() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root.pem");
    std::fs::write(&root, "not a certificate").unwrap();

    let mut config = MurmurConfig::default();
    config.tls.pinned_roots = vec![root];
    let (connector, _acceptor) = MemoryConnector::new();
    let err = MurmurClient::builder(config)
        .connector(Arc::new(connector))
        .credential_store(Arc::new(MemoryCredentialStore::new()))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("TLS"), "{err}");
}

#[test]
fn invalid_config_is_rejected_at_build() {
    let mut config = MurmurConfig::default();
    config.server.http_base_url = "::nope::".into();
    assert!(MurmurClient::from_config(config).is_err());
}
