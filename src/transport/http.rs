//! reqwest implementation of [`HttpTransport`].

use std::time::Duration;

use async_trait::async_trait;

use super::tls::TrustPolicy;
use super::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Sends [`HttpRequest`]s to paths under a fixed base URL.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Build a transport for `base_url` with the default timeout and system roots.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_options(base_url, DEFAULT_REQUEST_TIMEOUT, &TrustPolicy::SystemRoots)
    }

    /// Build a transport with an explicit timeout and trust policy.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] if the trust policy is invalid or the
    /// HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        timeout: Duration,
        trust: &TrustPolicy,
    ) -> Result<Self, TransportError> {
        let builder = reqwest::Client::builder().timeout(timeout);
        let client = trust
            .apply(builder)?
            .build()
            .map_err(|e| TransportError::Tls(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self.url_for(&request.path);
        let mut builder = self.client.request(to_reqwest_method(request.method), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(format!("{} {url}: {e}", request.method.as_str()))
            } else {
                TransportError::Connect(format!("{} {url}: {e}", request.method.as_str()))
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Receive(format!("reading body of {url}: {e}")))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
