//! The refresh call itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::AuthError;
use crate::transport::{HttpRequest, HttpTransport};

/// Default path of the refresh endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Credentials returned by a successful refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    /// Present when the server rotated the refresh credential.
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Exchanges a refresh credential for a new access credential.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// # Errors
    ///
    /// Any error is treated as a failed refresh.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Calls the backend's refresh endpoint over an [`HttpTransport`].
///
/// The call is made directly on the transport, never through the
/// [`RefreshCoordinator`](super::RefreshCoordinator), so a rejected refresh
/// cannot recurse into another refresh.
#[derive(Clone)]
pub struct HttpTokenRefresher {
    transport: Arc<dyn HttpTransport>,
    path: String,
}

impl HttpTokenRefresher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_path(transport, DEFAULT_REFRESH_PATH)
    }

    pub fn with_path(transport: Arc<dyn HttpTransport>, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let request = HttpRequest::post_json(&self.path, &RefreshRequest { refresh_token })
            .map_err(|e| AuthError::RefreshFailed(format!("failed to encode refresh request: {e}")))?;
        let response = self.transport.execute(&request).await?;
        if !response.is_success() {
            return Err(AuthError::RefreshRejected(response.status));
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| AuthError::RefreshFailed(format!("malformed refresh response: {e}")))?;
        if body.access_token.is_empty() {
            return Err(AuthError::RefreshFailed(
                "refresh response carried an empty access token".to_owned(),
            ));
        }
        Ok(TokenPair {
            access_token: body.access_token,
            refresh_token: body.refresh_token.filter(|t| !t.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::transport::http::ReqwestTransport;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn refresher(server: &MockServer) -> HttpTokenRefresher {
        let transport = ReqwestTransport::new(server.uri()).unwrap();
        HttpTokenRefresher::new(Arc::new(transport))
    }

    #[tokio::test]
    async fn posts_refresh_token_and_reads_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({"refresh_token": "r1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "a2", "refresh_token": "r2"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let pair = refresher(&server).await.refresh("r1").await.unwrap();
        assert_eq!(pair.access_token, "a2");
        assert_eq!(pair.refresh_token.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn refresh_token_rotation_is_optional() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "a2"})))
            .mount(&server)
            .await;

        let pair = refresher(&server).await.refresh("r1").await.unwrap();
        assert!(pair.refresh_token.is_none());
    }

    #[tokio::test]
    async fn rejection_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = refresher(&server).await.refresh("r1").await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshRejected(401)));
    }

    #[tokio::test]
    async fn malformed_body_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = refresher(&server).await.refresh("r1").await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(_)));
    }

    #[test]
    fn debug_redacts_tokens() {
        let pair = TokenPair {
            access_token: "secret-access".into(),
            refresh_token: Some("secret-refresh".into()),
        };
        let printed = format!("{pair:?}");
        assert!(!printed.contains("secret"));
    }
}
