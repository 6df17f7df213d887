//! In-process duplex transport.
//!
//! [`MemoryConnector`] hands each opened channel to a [`MemoryAcceptor`],
//! which plays the server: it reads the client's frames and writes replies
//! through a [`MemoryPeer`]. Connect failures can be scripted, which makes
//! this the transport of choice for exercising reconnection and request
//! correlation without a network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{DuplexConnector, FrameReader, FrameWriter, TransportError};

#[derive(Debug, Default)]
struct ScriptState {
    refuse: bool,
    fail_next: u32,
    opened: u32,
    attempts: u32,
}

/// Client side of the in-process transport.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    script: Arc<Mutex<ScriptState>>,
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

/// Server side: yields one [`MemoryPeer`] per successful `open`.
#[derive(Debug)]
pub struct MemoryAcceptor {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server end of one open channel.
#[derive(Debug)]
pub struct MemoryPeer {
    from_client: mpsc::UnboundedReceiver<Bytes>,
    to_client: mpsc::UnboundedSender<Result<Bytes, TransportError>>,
    fail_sends: Arc<AtomicBool>,
}

impl MemoryConnector {
    /// Create a connected connector/acceptor pair.
    pub fn new() -> (Self, MemoryAcceptor) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                script: Arc::new(Mutex::new(ScriptState::default())),
                accept_tx,
            },
            MemoryAcceptor { accept_rx },
        )
    }

    fn script(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        match self.script.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        }
    }

    /// Refuse every `open` until called again with `false`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.script().refuse = refuse;
    }

    /// Fail the next `count` opens, then accept again.
    pub fn fail_next(&self, count: u32) {
        self.script().fail_next = count;
    }

    /// Number of channels opened successfully.
    pub fn open_count(&self) -> u32 {
        self.script().opened
    }

    /// Number of `open` calls, successful or not.
    pub fn attempt_count(&self) -> u32 {
        self.script().attempts
    }
}

#[async_trait]
impl DuplexConnector for MemoryConnector {
    async fn open(&self) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), TransportError> {
        {
            let mut script = self.script();
            script.attempts += 1;
            if script.refuse {
                return Err(TransportError::Connect("connection refused".to_owned()));
            }
            if script.fail_next > 0 {
                script.fail_next -= 1;
                return Err(TransportError::Connect("scripted failure".to_owned()));
            }
            script.opened += 1;
        }

        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let fail_sends = Arc::new(AtomicBool::new(false));
        self.accept_tx
            .send(MemoryPeer {
                from_client,
                to_client,
                fail_sends: Arc::clone(&fail_sends),
            })
            .map_err(|_| TransportError::Connect("acceptor dropped".to_owned()))?;

        Ok((
            Box::new(MemoryWriter {
                tx: Some(client_tx),
                fail_sends,
            }),
            Box::new(MemoryReader { rx: client_rx }),
        ))
    }
}

impl MemoryAcceptor {
    /// Wait for the client to open the next channel.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

impl MemoryPeer {
    /// Next frame written by the client. `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.from_client.recv().await
    }

    /// Next client frame decoded as JSON.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let frame = self.recv().await?;
        serde_json::from_slice(&frame).ok()
    }

    /// Deliver a frame to the client.
    pub fn send(&self, frame: impl Into<Bytes>) -> bool {
        self.to_client.send(Ok(frame.into())).is_ok()
    }

    /// Deliver a JSON value to the client.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send(value.to_string())
    }

    /// Make the client's next `receive` fail with `reason`.
    pub fn fail(&self, reason: &str) -> bool {
        self.to_client
            .send(Err(TransportError::Receive(reason.to_owned())))
            .is_ok()
    }

    /// While set, every client `send` on this channel fails with
    /// [`TransportError::Send`]. Receiving is unaffected.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    fail_sends: Arc<AtomicBool>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TransportError::Closed("writer closed".to_owned()))?;
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("broken pipe".to_owned()));
        }
        tx.send(frame)
            .map_err(|_| TransportError::Send("peer dropped".to_owned()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Result<Bytes, TransportError>>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn receive(&mut self) -> Option<Result<Bytes, TransportError>> {
        self.rx.recv().await
    }
}
