//! Connection state machine, receive loop and heartbeat.
//!
//! All state transitions happen while holding the session lock, which also
//! carries the cancellation token and the link epoch. A background task
//! only acts on the link it was spawned for: once the epoch moves on, a
//! stale receive loop or heartbeat can no longer trigger reconnection.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::pending::PendingTable;
use super::{ConnectionError, ConnectionOptions, ConnectionState};
use crate::protocol::{ClientFrame, ServerFrame};
use crate::transport::{DuplexConnector, FrameReader, FrameWriter, TransportError};

/// Buffered push messages per subscriber before the slowest one lags.
const PUSH_CHANNEL_CAPACITY: usize = 64;

/// Topic used for responses whose request is no longer pending.
pub const UNMATCHED_RESPONSE_TOPIC: &str = "unmatched_response";

/// Inbound message that does not answer an outstanding request.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub topic: String,
    pub payload: serde_json::Value,
    /// Set when a response arrived after its caller stopped waiting.
    pub correlation_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Shared state between the manager handle and its background tasks
// ---------------------------------------------------------------------------

struct Session {
    /// Cancelled by `disconnect()`. Parent of every link token.
    cancel: CancellationToken,
    /// Token of the live link, cancelled when the link is torn down.
    link: Option<CancellationToken>,
    /// Bumped whenever a link is established, lost or torn down.
    epoch: u64,
}

struct Inner {
    connector: Arc<dyn DuplexConnector>,
    options: ConnectionOptions,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Session>,
    pending: PendingTable,
    writer: tokio::sync::Mutex<Option<Box<dyn FrameWriter>>>,
    push_tx: broadcast::Sender<PushMessage>,
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        match self.session.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        }
    }

    /// Publish `next`. Callers hold the session lock.
    fn publish(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                tracing::debug!(from = %state, to = %next, "connection state");
                *state = next;
                true
            }
        });
    }

    /// Publish `next` unless `cancel` has fired. Returns whether it was published.
    fn transition(&self, cancel: &CancellationToken, next: ConnectionState) -> bool {
        let _session = self.session();
        if cancel.is_cancelled() {
            return false;
        }
        self.publish(next);
        true
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

/// Owner of the single logical backend connection.
///
/// Cheap to clone; clones share the same link. Background tasks keep the
/// link alive until [`disconnect`](Self::disconnect) is called.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn DuplexConnector>, options: ConnectionOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (push_tx, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                connector,
                options,
                state_tx,
                session: Mutex::new(Session {
                    cancel: CancellationToken::new(),
                    link: None,
                    epoch: 0,
                }),
                pending: PendingTable::default(),
                writer: tokio::sync::Mutex::new(None),
                push_tx,
            }),
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Watch every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Receive push frames and late responses.
    ///
    /// Delivery never blocks the receive loop; a subscriber that falls more
    /// than a small buffer behind loses the oldest messages.
    pub fn subscribe_push(&self) -> broadcast::Receiver<PushMessage> {
        self.inner.push_tx.subscribe()
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Whether a request with correlation id `id` is still outstanding.
    pub fn is_pending(&self, id: &str) -> bool {
        self.inner.pending.contains(id)
    }

    /// Open the link.
    ///
    /// Returns immediately when already connected. When a connect or
    /// reconnect is already under way, waits for its outcome instead of
    /// opening a second link. On failure the reconnection cycle is started
    /// in the background and the error is returned.
    ///
    /// # Errors
    ///
    /// The transport error of the failed attempt,
    /// [`ConnectionError::Unavailable`] if a concurrent reconnection gave up,
    /// or [`ConnectionError::Disconnected`] if `disconnect()` intervened.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let claimed = {
            let session = self.inner.session();
            let claimed = self.inner.state_tx.send_if_modified(|state| {
                if matches!(
                    state,
                    ConnectionState::Disconnected | ConnectionState::Failed(_)
                ) {
                    *state = ConnectionState::Connecting;
                    true
                } else {
                    false
                }
            });
            claimed.then(|| session.cancel.clone())
        };
        let Some(cancel) = claimed else {
            return self.wait_until_settled().await;
        };

        tracing::info!("connecting to backend");
        match establish(&self.inner, &cancel).await {
            Ok(()) => Ok(()),
            Err(ConnectionError::Disconnected) => Err(ConnectionError::Disconnected),
            Err(e) => {
                tracing::warn!(error = %e, "connect failed");
                schedule_reconnect(&self.inner, &cancel, e.to_string());
                Err(e)
            }
        }
    }

    async fn wait_until_settled(&self) -> Result<(), ConnectionError> {
        let mut rx = self.inner.state_tx.subscribe();
        let settled = match rx.wait_for(|s| !s.is_transitioning()).await {
            Ok(state) => state.clone(),
            Err(_) => ConnectionState::Disconnected,
        };
        match settled {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Failed(reason) => Err(ConnectionError::Unavailable(reason)),
            _ => Err(ConnectionError::Disconnected),
        }
    }

    /// Send `payload` as a request and wait for the matching response.
    ///
    /// Every call resolves exactly once: with the response payload, the
    /// backend's error, a link failure, or a timeout. A timed out request is
    /// removed from the pending table; its response, should it still arrive,
    /// is delivered to push subscribers.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotConnected`] when no link is up,
    /// [`ConnectionError::Unavailable`] after reconnection gave up,
    /// [`ConnectionError::Timeout`], [`ConnectionError::Remote`],
    /// [`ConnectionError::ConnectionLost`] or [`ConnectionError::Disconnected`].
    pub async fn send_request(
        &self,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ConnectionError> {
        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Failed(reason) => return Err(ConnectionError::Unavailable(reason)),
            _ => return Err(ConnectionError::NotConnected),
        }

        let id = uuid::Uuid::new_v4().to_string();
        let frame = ClientFrame::Request {
            id: id.clone(),
            payload,
        }
        .encode()
        .map_err(|e| ConnectionError::Protocol(format!("failed to encode request: {e}")))?;

        let rx = self
            .inner
            .pending
            .register(&id)
            .ok_or_else(|| ConnectionError::Protocol(format!("duplicate correlation id {id}")))?;
        let epoch = self.inner.session().epoch;

        if let Err(e) = write_frame(&self.inner, frame).await {
            self.inner.pending.remove(&id);
            if let ConnectionError::Transport(cause) = e {
                link_lost(&self.inner, epoch, format!("send failed: {cause}")).await;
                return Err(ConnectionError::ConnectionLost(cause.to_string()));
            }
            return Err(e);
        }

        let timeout = self.inner.options.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ConnectionError::Disconnected),
            Err(_) => {
                self.inner.pending.remove(&id);
                tracing::debug!(id = %id, "request timed out");
                Err(ConnectionError::Timeout {
                    id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Close the link and stop heartbeat and reconnection.
    ///
    /// Every outstanding request fails with [`ConnectionError::Disconnected`]
    /// before this method first yields.
    pub async fn disconnect(&self) {
        {
            let mut session = self.inner.session();
            session.cancel.cancel();
            session.cancel = CancellationToken::new();
            session.link = None;
            session.epoch += 1;
            self.inner.publish(ConnectionState::Disconnected);
        }
        let failed = self.inner.pending.fail_all(|| ConnectionError::Disconnected);

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                tracing::debug!(error = %e, "error closing link");
            }
        }
        tracing::info!(failed, "disconnected");
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Open a link and start its receive loop and heartbeat.
async fn establish(inner: &Arc<Inner>, cancel: &CancellationToken) -> Result<(), ConnectionError> {
    let (writer, reader) = tokio::select! {
        () = cancel.cancelled() => return Err(ConnectionError::Disconnected),
        opened = inner.connector.open() => opened?,
    };
    *inner.writer.lock().await = Some(writer);

    let claimed = {
        let mut session = inner.session();
        if cancel.is_cancelled() {
            None
        } else {
            session.epoch += 1;
            let link = cancel.child_token();
            session.link = Some(link.clone());
            inner.publish(ConnectionState::Connected);
            Some((session.epoch, link))
        }
    };
    let Some((epoch, link)) = claimed else {
        let writer = inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.close().await;
        }
        return Err(ConnectionError::Disconnected);
    };

    tokio::spawn(receive_loop(Arc::clone(inner), epoch, link.clone(), reader));
    tokio::spawn(heartbeat_loop(Arc::clone(inner), epoch, link));
    tracing::info!(epoch, "connected");
    Ok(())
}

/// Move to `Reconnecting` and start the backoff cycle, or to `Failed` when
/// reconnection is disabled.
fn schedule_reconnect(inner: &Arc<Inner>, cancel: &CancellationToken, reason: String) {
    let _session = inner.session();
    if cancel.is_cancelled() {
        return;
    }
    if inner.options.reconnect.max_attempts == 0 {
        inner.publish(ConnectionState::Failed(reason));
        return;
    }
    inner.publish(ConnectionState::Reconnecting { attempt: 1 });
    tokio::spawn(reconnect_loop(Arc::clone(inner), cancel.clone()));
}

fn reconnect_loop(inner: Arc<Inner>, cancel: CancellationToken) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let policy = inner.options.reconnect;
        let mut last_error = String::new();

        for attempt in 1..=policy.max_attempts {
            if !inner.transition(&cancel, ConnectionState::Reconnecting { attempt }) {
                return;
            }
            let delay = policy.delay_for(attempt);
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnecting after backoff"
            );
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            if !inner.transition(&cancel, ConnectionState::Connecting) {
                return;
            }
            match establish(&inner, &cancel).await {
                Ok(()) => {
                    tracing::info!(attempt, "reconnected");
                    return;
                }
                Err(ConnectionError::Disconnected) => return,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        let reason = format!(
            "gave up after {} reconnect attempts: {last_error}",
            policy.max_attempts
        );
        if inner.transition(&cancel, ConnectionState::Failed(reason.clone())) {
            tracing::error!(reason = %reason, "connection failed");
        }
    })
}

/// Tear down link `epoch` and schedule reconnection.
///
/// Only the first report for the live link has any effect.
async fn link_lost(inner: &Arc<Inner>, epoch: u64, reason: String) {
    let cancel = {
        let mut session = inner.session();
        if session.epoch != epoch || session.cancel.is_cancelled() {
            return;
        }
        session.epoch += 1;
        if let Some(link) = session.link.take() {
            link.cancel();
        }
        if inner.options.reconnect.max_attempts > 0 {
            inner.publish(ConnectionState::Reconnecting { attempt: 1 });
        }
        session.cancel.clone()
    };

    tracing::warn!(reason = %reason, "connection lost");
    let failed = inner
        .pending
        .fail_all(|| ConnectionError::ConnectionLost(reason.clone()));
    if failed > 0 {
        tracing::warn!(failed, "failed in-flight requests");
    }

    let writer = inner.writer.lock().await.take();
    if let Some(mut writer) = writer {
        let _ = writer.close().await;
    }
    schedule_reconnect(inner, &cancel, reason);
}

async fn receive_loop(
    inner: Arc<Inner>,
    epoch: u64,
    link: CancellationToken,
    mut reader: Box<dyn FrameReader>,
) {
    loop {
        let next = tokio::select! {
            () = link.cancelled() => return,
            next = reader.receive() => next,
        };
        match next {
            Some(Ok(frame)) => dispatch(&inner, &frame),
            Some(Err(e)) => {
                link_lost(&inner, epoch, format!("receive failed: {e}")).await;
                return;
            }
            None => {
                link_lost(&inner, epoch, "closed by peer".to_owned()).await;
                return;
            }
        }
    }
}

async fn heartbeat_loop(inner: Arc<Inner>, epoch: u64, link: CancellationToken) {
    let period = inner.options.heartbeat_interval;
    if period.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = link.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let frame = match ClientFrame::ping_now().encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode heartbeat");
                continue;
            }
        };
        if let Err(e) = write_frame(&inner, frame).await {
            link_lost(&inner, epoch, format!("heartbeat failed: {e}")).await;
            return;
        }
        tracing::trace!(epoch, "heartbeat sent");
    }
}

async fn write_frame(inner: &Inner, frame: Bytes) -> Result<(), ConnectionError> {
    let mut guard = inner.writer.lock().await;
    let Some(writer) = guard.as_mut() else {
        return Err(ConnectionError::NotConnected);
    };
    let limit = inner.options.request_timeout;
    match tokio::time::timeout(limit, writer.send(frame)).await {
        Ok(result) => result.map_err(ConnectionError::from),
        Err(_) => Err(ConnectionError::Transport(TransportError::Timeout(format!(
            "write blocked for {}ms",
            limit.as_millis()
        )))),
    }
}

/// Route one inbound frame. Never blocks.
fn dispatch(inner: &Inner, frame: &[u8]) {
    let message = match ServerFrame::decode(frame) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, len = frame.len(), "dropping unparseable frame");
            return;
        }
    };

    match message {
        ServerFrame::Response { id, payload } => {
            if let Err(Ok(payload)) = inner.pending.resolve(&id, Ok(payload)) {
                tracing::debug!(id = %id, "response for unknown request");
                publish_push(
                    inner,
                    PushMessage {
                        topic: UNMATCHED_RESPONSE_TOPIC.to_owned(),
                        payload,
                        correlation_id: Some(id),
                    },
                );
            }
        }
        ServerFrame::Error {
            id: Some(id),
            code,
            message,
        } => {
            let error = ConnectionError::Remote { code, message };
            if let Err(Err(error)) = inner.pending.resolve(&id, Err(error)) {
                tracing::warn!(id = %id, error = %error, "error for unknown request");
            }
        }
        ServerFrame::Error {
            id: None,
            code,
            message,
        } => {
            tracing::warn!(code = %code, message = %message, "backend error notice");
        }
        ServerFrame::Pong { .. } => tracing::trace!("pong"),
        ServerFrame::Push { topic, payload } => {
            tracing::debug!(topic = %topic, "push message");
            publish_push(
                inner,
                PushMessage {
                    topic,
                    payload,
                    correlation_id: None,
                },
            );
        }
    }
}

fn publish_push(inner: &Inner, message: PushMessage) {
    // No subscribers is fine.
    let _ = inner.push_tx.send(message);
}
