//! WebSocket implementation of the duplex transport.
//!
//! Uses `tokio-tungstenite`. Text and binary frames are both surfaced as
//! bytes; protocol-level ping/pong frames are answered by tungstenite and
//! never reach the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};

use super::tls::TrustPolicy;
use super::{DuplexConnector, FrameReader, FrameWriter, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default bound on the opening handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens WebSocket connections to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
    /// `None` uses tungstenite's bundled web PKI roots.
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl WebSocketConnector {
    /// Create a connector for `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tls: None,
        }
    }

    /// Verify `wss://` servers against `trust` instead of the bundled roots.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] if the pinned roots are unusable.
    pub fn with_trust_policy(mut self, trust: &TrustPolicy) -> Result<Self, TransportError> {
        self.tls = trust.rustls_config()?;
        Ok(self)
    }

    /// Whether the handshake verifies against pinned roots.
    pub fn is_pinned(&self) -> bool {
        self.tls.is_some()
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DuplexConnector for WebSocketConnector {
    async fn open(&self) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), TransportError> {
        let connector = self.tls.as_ref().map(|config| Connector::Rustls(Arc::clone(config)));
        let handshake = connect_async_tls_with_config(self.url.as_str(), None, false, connector);
        let (stream, _) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| {
                TransportError::Timeout(format!(
                    "handshake with {} exceeded {:?}",
                    self.url, self.connect_timeout
                ))
            })?
            .map_err(|e| TransportError::Connect(format!("{}: {e}", self.url)))?;

        tracing::debug!(url = %self.url, pinned = self.is_pinned(), "websocket handshake complete");

        let (write, read) = stream.split();
        Ok((
            Box::new(WsWriter { sink: write }),
            Box::new(WsReader { stream: read }),
        ))
    }
}

struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let message = match String::from_utf8(frame.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) => Ok(()),
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Closed(e.to_string())),
        }
    }
}

struct WsReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn receive(&mut self) -> Option<Result<Bytes, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Bytes::from(text))),
                Ok(Message::Binary(data)) => return Some(Ok(Bytes::from(data))),
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_owned());
                    tracing::debug!(%reason, "websocket close frame received");
                    return None;
                }
                // Ping/Pong and raw frames are handled by tungstenite.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }
}
