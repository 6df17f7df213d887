//! Refresh coordinator contract tests against a mock backend.
//!
//! The protected endpoint accepts only `Bearer fresh`; the refresh endpoint
//! is slow enough that concurrent callers pile up behind one refresh.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use murmur::auth::{
    ACCESS_TOKEN_KEY, AuthError, AuthEvent, CredentialStore, HttpTokenRefresher,
    MemoryCredentialStore, REFRESH_TOKEN_KEY, RefreshCoordinator,
};
use murmur::transport::HttpRequest;
use murmur::transport::http::ReqwestTransport;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CALLERS: usize = 6;

async fn protected_endpoint(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/profile"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "ada"})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/profile"))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(server)
        .await;
}

fn coordinator(server: &MockServer) -> (RefreshCoordinator, Arc<MemoryCredentialStore>) {
    let transport = Arc::new(ReqwestTransport::new(server.uri()).unwrap());
    let store = Arc::new(MemoryCredentialStore::new());
    let refresher = Arc::new(HttpTokenRefresher::new(transport.clone()));
    let coordinator = RefreshCoordinator::new(transport, store.clone(), refresher);
    coordinator.login("stale", "r1").unwrap();
    (coordinator, store)
}

async fn call_concurrently(coordinator: &RefreshCoordinator) -> Vec<Result<u16, AuthError>> {
    let calls = (0..CALLERS).map(|_| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .execute(HttpRequest::get("/v1/profile"))
                .await
                .map(|response| response.status)
        })
    });
    join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.expect("caller panicked"))
        .collect()
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    protected_endpoint(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refresh_token": "r1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "fresh", "refresh_token": "r2"}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (coordinator, store) = coordinator(&server);
    let mut events = coordinator.subscribe_events();

    let outcomes = call_concurrently(&coordinator).await;
    assert_eq!(outcomes.len(), CALLERS);
    for outcome in outcomes {
        assert_eq!(outcome.unwrap(), 200);
    }

    assert_eq!(coordinator.refresh_count(), 1);
    assert!(!coordinator.is_refreshing());
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("fresh"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r2"));
    assert_eq!(events.recv().await.unwrap(), AuthEvent::Refreshed);
}

#[tokio::test]
async fn failed_refresh_fails_every_caller_and_forces_logout() {
    let server = MockServer::start().await;
    protected_endpoint(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;

    let (coordinator, store) = coordinator(&server);
    let mut events = coordinator.subscribe_events();

    for outcome in call_concurrently(&coordinator).await {
        match outcome {
            Err(AuthError::Unauthorized(original)) => assert_eq!(original.status, 401),
            other => panic!("expected the original 401, got {other:?}"),
        }
    }

    assert_eq!(coordinator.refresh_count(), 1);
    assert!(store.is_empty());
    assert!(!coordinator.is_signed_in().unwrap());
    match events.recv().await.unwrap() {
        AuthEvent::ForcedLogout { reason } => assert!(reason.contains("401"), "{reason}"),
        other => panic!("expected forced logout, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_refresh_endpoint_takes_the_failure_path() {
    let server = MockServer::start().await;
    protected_endpoint(&server).await;
    // The refresher points at a closed port; the protected endpoint still answers.
    let store = Arc::new(MemoryCredentialStore::new());
    let transport = Arc::new(ReqwestTransport::new(server.uri()).unwrap());
    let dead = Arc::new(ReqwestTransport::new("http://127.0.0.1:9").unwrap());
    let coordinator =
        RefreshCoordinator::new(transport, store.clone(), Arc::new(HttpTokenRefresher::new(dead)));
    coordinator.login("stale", "r1").unwrap();
    let mut events = coordinator.subscribe_events();

    let err = coordinator
        .execute(HttpRequest::get("/v1/profile"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized(_)));
    assert!(store.is_empty());
    assert!(matches!(events.recv().await.unwrap(), AuthEvent::ForcedLogout { .. }));
}

#[tokio::test]
async fn non_401_responses_are_returned_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/profile"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (coordinator, _store) = coordinator(&server);
    let response = coordinator
        .execute(HttpRequest::get("/v1/profile"))
        .await
        .unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.body.as_ref(), b"maintenance");
    assert_eq!(coordinator.refresh_count(), 0);
}
