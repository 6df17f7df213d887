//! Transport boundary for the backend link.
//!
//! The rest of the crate depends only on the traits in this module:
//!
//! - [`DuplexConnector`] opens one duplex frame channel, split into a
//!   [`FrameWriter`] and a [`FrameReader`] so the receive loop never contends
//!   with senders.
//! - [`HttpTransport`] performs a single request/response exchange and
//!   reports the status code unchanged.
//!
//! Concrete implementations live in the submodules: [`websocket`]
//! (tokio-tungstenite), [`http`] (reqwest) and [`memory`] (in-process, for
//! tests and offline demos). Trust configuration for TLS lives in [`tls`].

pub mod http;
pub mod memory;
pub mod tls;
pub mod websocket;

use async_trait::async_trait;
use bytes::Bytes;

/// Errors raised by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The remote end could not be reached.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The link was closed, by either side.
    #[error("connection closed: {0}")]
    Closed(String),

    /// Writing a frame or request failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame or response failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The operation did not finish in time.
    #[error("transport timed out: {0}")]
    Timeout(String),

    /// TLS trust material was invalid.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// No valid credential could be attached to the request.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Opens duplex frame channels to the backend.
#[async_trait]
pub trait DuplexConnector: Send + Sync {
    /// Open a new channel, returning its write and read halves.
    async fn open(&self) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), TransportError>;
}

/// Write half of a duplex channel.
#[async_trait]
pub trait FrameWriter: Send {
    /// Transmit one frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Close the channel. Closing an already closed channel is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a duplex channel.
#[async_trait]
pub trait FrameReader: Send {
    /// Wait for the next frame. `None` means the peer closed the channel.
    async fn receive(&mut self) -> Option<Result<Bytes, TransportError>>;
}

/// HTTP method of an [`HttpRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Descriptor of one outbound request/response call.
///
/// The descriptor is cloned when a call is replayed after a credential
/// refresh, so it owns its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path relative to the transport's base URL, e.g. `/v1/actions`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Set once the request has been replayed with a refreshed credential.
    /// A request carrying this flag is never intercepted for refresh again.
    pub retried_after_refresh: bool,
}

impl HttpRequest {
    /// Create a request with no headers and no body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            retried_after_refresh: false,
        }
    }

    /// `GET path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// `POST path` with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `body` cannot be encoded.
    pub fn post_json<T: serde::Serialize>(
        path: impl Into<String>,
        body: &T,
    ) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_vec(body)?;
        Ok(Self::new(Method::Post, path)
            .with_header("Content-Type", "application/json")
            .with_body(encoded))
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Replace any existing header of the same name (case-insensitive).
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Look up a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response to an [`HttpRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 401-class response: the attached credential was rejected.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the deserializer error when the body is not valid JSON for `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Performs request/response calls against the backend.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request` and return the response, whatever its status code.
    ///
    /// Only failures to complete the exchange are errors; a 4xx or 5xx
    /// response is `Ok`.
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}
