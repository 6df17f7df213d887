//! Single-flight credential refresh.
//!
//! Every 401 that arrives while no refresh is running starts one; every
//! 401 that arrives while one is running joins its queue. The refresh runs
//! on its own task and resolves the whole queue at once, so a caller that
//! gives up or is cancelled never strands the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};

use super::{AuthError, AuthEvent, CredentialStore, TokenPair, TokenRefresher};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

/// Credential store key of the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Credential store key of the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Default bound on how long a caller waits for a refresh.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

const EVENT_CHANNEL_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Refresh state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum RefreshFailure {
    /// The refresh call failed or was rejected.
    Rejected(String),
    /// No refresh credential was available.
    MissingCredential(String),
}

impl RefreshFailure {
    fn reason(&self) -> &str {
        match self {
            Self::Rejected(reason) | Self::MissingCredential(reason) => reason,
        }
    }

    fn into_error(self, original: &HttpResponse) -> AuthError {
        match self {
            Self::Rejected(_) => AuthError::Unauthorized(original.clone()),
            Self::MissingCredential(reason) => AuthError::ReauthenticationRequired(reason),
        }
    }
}

/// New access token, or why there is none.
type RefreshOutcome = Result<String, RefreshFailure>;

struct QueuedRequest {
    ticket: u64,
    request: HttpRequest,
    done: oneshot::Sender<RefreshOutcome>,
}

enum RefreshState {
    Idle,
    InProgress { waiters: Vec<QueuedRequest> },
}

enum Admission {
    /// The stored credential changed while the request was in flight.
    Replay(String),
    Queued {
        ticket: u64,
        receiver: oneshot::Receiver<RefreshOutcome>,
        start_refresh: bool,
    },
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<AuthEvent>,
    refresh_timeout: Duration,
    refresh_count: AtomicU64,
    next_ticket: AtomicU64,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, RefreshState> {
        match self.state.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        }
    }

    fn store_pair(&self, pair: &TokenPair) -> Result<(), AuthError> {
        self.store.set(ACCESS_TOKEN_KEY, &pair.access_token)?;
        if let Some(refresh) = &pair.refresh_token {
            self.store.set(REFRESH_TOKEN_KEY, refresh)?;
        }
        Ok(())
    }

    fn clear_credentials(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.store.delete(key) {
                tracing::warn!(key, error = %e, "failed to clear credential");
            }
        }
    }

    fn remove_waiter(&self, ticket: u64) {
        if let RefreshState::InProgress { waiters } = &mut *self.state() {
            waiters.retain(|w| w.ticket != ticket);
        }
    }

    fn force_logout(&self, reason: String) {
        tracing::warn!(reason = %reason, "credential refresh failed, forcing logout");
        self.clear_credentials();
        let _ = self.events.send(AuthEvent::ForcedLogout { reason });
    }
}

// ---------------------------------------------------------------------------
// RefreshCoordinator
// ---------------------------------------------------------------------------

/// Authorising wrapper around an [`HttpTransport`].
///
/// Cheap to clone; clones share credentials and refresh state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .field("refresh_count", &self.refresh_count())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self::with_timeout(transport, store, refresher, DEFAULT_REFRESH_TIMEOUT)
    }

    /// Like [`RefreshCoordinator::new`], bounding how long a queued caller
    /// waits for the refresh.
    ///
    /// The refresh call itself is abandoned after twice `refresh_timeout`.
    pub fn with_timeout(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        refresh_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                refresher,
                state: Mutex::new(RefreshState::Idle),
                events,
                refresh_timeout,
                refresh_count: AtomicU64::new(0),
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    pub fn refresh_timeout(&self) -> Duration {
        self.inner.refresh_timeout
    }

    /// Store a freshly issued credential pair.
    ///
    /// # Errors
    ///
    /// Returns the credential store's error.
    pub fn login(&self, access_token: &str, refresh_token: &str) -> Result<(), AuthError> {
        self.inner.store_pair(&TokenPair {
            access_token: access_token.to_owned(),
            refresh_token: Some(refresh_token.to_owned()),
        })?;
        tracing::info!("credentials stored");
        Ok(())
    }

    /// Clear stored credentials.
    pub fn logout(&self) {
        self.inner.clear_credentials();
        tracing::info!("credentials cleared");
    }

    /// Whether an access credential is stored.
    ///
    /// # Errors
    ///
    /// Returns the credential store's error.
    pub fn is_signed_in(&self) -> Result<bool, AuthError> {
        Ok(self.inner.store.get(ACCESS_TOKEN_KEY)?.is_some())
    }

    /// Receive [`AuthEvent`]s.
    pub fn subscribe_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Number of refresh calls performed so far.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refresh_count.load(Ordering::Relaxed)
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.state(), RefreshState::InProgress { .. })
    }

    /// Callers currently waiting on the in-flight refresh.
    pub fn queued_count(&self) -> usize {
        match &*self.inner.state() {
            RefreshState::Idle => 0,
            RefreshState::InProgress { waiters } => waiters.len(),
        }
    }

    /// Resolve every queued caller with [`AuthError::Cancelled`].
    ///
    /// An in-flight refresh call keeps running and still stores its result;
    /// a new refresh cannot start until it finishes.
    pub fn reset(&self) {
        let drained = match &mut *self.inner.state() {
            RefreshState::Idle => Vec::new(),
            RefreshState::InProgress { waiters } => std::mem::take(waiters),
        };
        if !drained.is_empty() {
            tracing::info!(cancelled = drained.len(), "refresh queue reset");
        }
        // Dropping each completion slot resolves its caller with `Cancelled`.
        drop(drained);
    }

    /// Send `request` with the stored access credential attached.
    ///
    /// Non-401 responses are returned unchanged. A 401 is answered by
    /// refreshing the credential and replaying the request once; a request
    /// already marked `retried_after_refresh` is never intercepted again.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Unauthorized`] with the original 401 when the refresh failed
    /// - [`AuthError::ReauthenticationRequired`] when no refresh credential is stored
    /// - [`AuthError::Timeout`] or [`AuthError::Cancelled`] while queued
    /// - [`AuthError::Transport`] when the request itself could not be sent
    pub async fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse, AuthError> {
        let attached = self.inner.store.get(ACCESS_TOKEN_KEY)?;
        if let Some(token) = &attached {
            request.set_header("Authorization", bearer(token));
        }

        let response = self.inner.transport.execute(&request).await?;
        if !response.is_unauthorized() || request.retried_after_refresh {
            return Ok(response);
        }
        tracing::debug!(path = %request.path, "request unauthorized");

        let token = match self.admit(&request, attached.as_deref())? {
            Admission::Replay(token) => {
                tracing::debug!("credential changed while in flight, replaying");
                token
            }
            Admission::Queued {
                ticket,
                receiver,
                start_refresh,
            } => {
                if start_refresh {
                    tokio::spawn(run_refresh(Arc::clone(&self.inner)));
                }
                self.wait_for_refresh(ticket, receiver, &response).await?
            }
        };
        self.replay(request, &token).await
    }

    /// Decide, under the state lock, whether to replay straight away or to
    /// wait for a refresh.
    fn admit(&self, request: &HttpRequest, attached: Option<&str>) -> Result<Admission, AuthError> {
        let mut state = self.inner.state();
        if let Some(current) = self.inner.store.get(ACCESS_TOKEN_KEY)? {
            if attached != Some(current.as_str()) {
                return Ok(Admission::Replay(current));
            }
        }

        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (done, receiver) = oneshot::channel();
        let queued = QueuedRequest {
            ticket,
            request: request.clone(),
            done,
        };
        let start_refresh = if let RefreshState::InProgress { waiters } = &mut *state {
            waiters.push(queued);
            false
        } else {
            *state = RefreshState::InProgress {
                waiters: vec![queued],
            };
            true
        };
        Ok(Admission::Queued {
            ticket,
            receiver,
            start_refresh,
        })
    }

    async fn wait_for_refresh(
        &self,
        ticket: u64,
        receiver: oneshot::Receiver<RefreshOutcome>,
        original: &HttpResponse,
    ) -> Result<String, AuthError> {
        match tokio::time::timeout(self.inner.refresh_timeout, receiver).await {
            Ok(Ok(Ok(token))) => Ok(token),
            Ok(Ok(Err(failure))) => Err(failure.into_error(original)),
            Ok(Err(_)) => Err(AuthError::Cancelled),
            Err(_) => {
                self.inner.remove_waiter(ticket);
                tracing::warn!(ticket, "gave up waiting for credential refresh");
                Err(AuthError::Timeout)
            }
        }
    }

    async fn replay(&self, mut request: HttpRequest, token: &str) -> Result<HttpResponse, AuthError> {
        request.retried_after_refresh = true;
        request.set_header("Authorization", bearer(token));
        Ok(self.inner.transport.execute(&request).await?)
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

// ---------------------------------------------------------------------------
// Refresh task
// ---------------------------------------------------------------------------

async fn run_refresh(inner: Arc<Inner>) {
    let outcome = perform_refresh(&inner).await;
    let waiters = {
        let mut state = inner.state();
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::InProgress { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        }
    };

    match &outcome {
        Ok(_) => tracing::debug!(waiters = waiters.len(), "resuming queued requests"),
        Err(failure) => tracing::debug!(
            waiters = waiters.len(),
            reason = failure.reason(),
            "failing queued requests"
        ),
    }
    for waiter in waiters {
        tracing::trace!(ticket = waiter.ticket, path = %waiter.request.path, "queued request resolved");
        let _ = waiter.done.send(outcome.clone());
    }
}

async fn perform_refresh(inner: &Inner) -> RefreshOutcome {
    let refresh_token = match inner.store.get(REFRESH_TOKEN_KEY) {
        Ok(Some(token)) => token,
        Ok(None) => return Err(missing_credential(inner, "no refresh credential stored".to_owned())),
        Err(e) => {
            return Err(missing_credential(
                inner,
                format!("refresh credential unreadable: {e}"),
            ));
        }
    };

    inner.refresh_count.fetch_add(1, Ordering::Relaxed);
    let limit = inner.refresh_timeout.saturating_mul(2);
    let reason = match tokio::time::timeout(limit, inner.refresher.refresh(&refresh_token)).await {
        Ok(Ok(pair)) => match inner.store_pair(&pair) {
            Ok(()) => {
                tracing::info!(rotated = pair.refresh_token.is_some(), "credential refreshed");
                let _ = inner.events.send(AuthEvent::Refreshed);
                return Ok(pair.access_token);
            }
            Err(e) => format!("failed to store refreshed credential: {e}"),
        },
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("refresh call exceeded {}ms", limit.as_millis()),
    };
    inner.force_logout(reason.clone());
    Err(RefreshFailure::Rejected(reason))
}

/// Without a refresh credential the session cannot continue. Forced logout
/// is only announced if there was a session to end.
fn missing_credential(inner: &Inner, reason: String) -> RefreshFailure {
    if matches!(inner.store.get(ACCESS_TOKEN_KEY), Ok(Some(_))) {
        inner.force_logout(reason.clone());
    } else {
        inner.clear_credentials();
    }
    RefreshFailure::MissingCredential(reason)
}

// ---------------------------------------------------------------------------
// Transport adapter
// ---------------------------------------------------------------------------

/// Lets anything written against [`HttpTransport`] go through the
/// coordinator. A 401 that survives the refresh comes back as the response
/// it was; other auth failures become [`TransportError::Unauthorized`].
#[async_trait]
impl HttpTransport for RefreshCoordinator {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        match RefreshCoordinator::execute(self, request.clone()).await {
            Ok(response) | Err(AuthError::Unauthorized(response)) => Ok(response),
            Err(AuthError::Transport(e)) => Err(e),
            Err(AuthError::Timeout) => Err(TransportError::Timeout(AuthError::Timeout.to_string())),
            Err(e) => Err(TransportError::Unauthorized(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::auth::MemoryCredentialStore;
    use crate::transport::TransportError;

    /// Accepts exactly one bearer token, answers 401 to anything else.
    struct TokenGate {
        valid: String,
        calls: AtomicUsize,
    }

    impl TokenGate {
        fn new(valid: &str) -> Arc<Self> {
            Arc::new(Self {
                valid: format!("Bearer {valid}"),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for TokenGate {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.header("authorization") == Some(self.valid.as_str()) {
                Ok(HttpResponse::new(200, "ok"))
            } else {
                Ok(HttpResponse::new(401, "expired"))
            }
        }
    }

    /// Rotates the stored token to `a2` while rejecting `a1`, as if another
    /// refresh completed while the request was in flight.
    struct RotatingGate {
        store: Arc<MemoryCredentialStore>,
    }

    #[async_trait]
    impl HttpTransport for RotatingGate {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            if request.header("authorization") == Some("Bearer a2") {
                return Ok(HttpResponse::new(200, "ok"));
            }
            self.store.set(ACCESS_TOKEN_KEY, "a2").unwrap();
            Ok(HttpResponse::new(401, "expired"))
        }
    }

    struct HangingRefresher;

    #[async_trait]
    impl TokenRefresher for HangingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, AuthError> {
            std::future::pending().await
        }
    }

    struct FixedRefresher(TokenPair);

    #[async_trait]
    impl TokenRefresher for FixedRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, AuthError> {
            Ok(self.0.clone())
        }
    }

    fn signed_in_store() -> Arc<MemoryCredentialStore> {
        let store = Arc::new(MemoryCredentialStore::new());
        store.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        store.set(REFRESH_TOKEN_KEY, "r1").unwrap();
        store
    }

    fn fixed(access: &str) -> Arc<FixedRefresher> {
        Arc::new(FixedRefresher(TokenPair {
            access_token: access.to_owned(),
            refresh_token: None,
        }))
    }

    #[tokio::test]
    async fn non_401_passes_through_with_bearer() {
        let gate = TokenGate::new("a1");
        let coordinator = RefreshCoordinator::new(gate.clone(), signed_in_store(), fixed("a2"));

        let response = coordinator.execute(HttpRequest::get("/v1/me")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.refresh_count(), 0);
    }

    #[tokio::test]
    async fn refresh_then_replay_once() {
        let gate = TokenGate::new("a2");
        let store = signed_in_store();
        let coordinator = RefreshCoordinator::new(gate.clone(), store.clone(), fixed("a2"));
        let mut events = coordinator.subscribe_events();

        let response = coordinator.execute(HttpRequest::get("/v1/me")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(coordinator.refresh_count(), 1);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a2"));
        // Refresh credential was not rotated.
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));
        assert_eq!(events.recv().await.unwrap(), AuthEvent::Refreshed);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn replayed_401_is_returned_without_second_refresh() {
        let gate = TokenGate::new("nobody");
        let coordinator = RefreshCoordinator::new(gate.clone(), signed_in_store(), fixed("a2"));

        let response = coordinator.execute(HttpRequest::get("/v1/me")).await.unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(coordinator.refresh_count(), 1);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn already_retried_request_is_not_intercepted() {
        let gate = TokenGate::new("nobody");
        let coordinator = RefreshCoordinator::new(gate.clone(), signed_in_store(), fixed("a2"));

        let mut request = HttpRequest::get("/v1/me");
        request.retried_after_refresh = true;
        let response = coordinator.execute(request).await.unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(coordinator.refresh_count(), 0);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_token_replays_without_refreshing() {
        let store = signed_in_store();
        let gate = Arc::new(RotatingGate {
            store: store.clone(),
        });
        let coordinator = RefreshCoordinator::new(gate, store, fixed("unused"));

        let response = coordinator.execute(HttpRequest::get("/v1/me")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(coordinator.refresh_count(), 0);
    }

    #[tokio::test]
    async fn as_http_transport_refreshes_and_maps_auth_failures() {
        let gate = TokenGate::new("a2");
        let coordinator = RefreshCoordinator::new(gate.clone(), signed_in_store(), fixed("a2"));
        let transport: Arc<dyn HttpTransport> = Arc::new(coordinator.clone());

        let response = transport.execute(&HttpRequest::get("/v1/me")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(coordinator.refresh_count(), 1);

        // Signed out: no refresh credential to try.
        let signed_out = RefreshCoordinator::new(gate, Arc::new(MemoryCredentialStore::new()), fixed("a2"));
        let transport: Arc<dyn HttpTransport> = Arc::new(signed_out);
        let err = transport.execute(&HttpRequest::get("/v1/me")).await.unwrap_err();
        assert!(matches!(err, TransportError::Unauthorized(_)), "{err:?}");
    }

    #[tokio::test]
    async fn missing_refresh_token_requires_sign_in() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.set(ACCESS_TOKEN_KEY, "a1").unwrap();
        let coordinator = RefreshCoordinator::new(TokenGate::new("a2"), store.clone(), fixed("a2"));
        let mut events = coordinator.subscribe_events();

        let err = coordinator.execute(HttpRequest::get("/v1/me")).await.unwrap_err();
        assert!(matches!(err, AuthError::ReauthenticationRequired(_)));
        assert_eq!(coordinator.refresh_count(), 0);
        assert!(store.is_empty());
        assert!(matches!(events.recv().await.unwrap(), AuthEvent::ForcedLogout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn queued_caller_times_out_and_leaves_queue() {
        let store = signed_in_store();
        let coordinator = RefreshCoordinator::with_timeout(
            TokenGate::new("a2"),
            store.clone(),
            Arc::new(HangingRefresher),
            Duration::from_secs(1),
        );
        let mut events = coordinator.subscribe_events();

        let err = coordinator.execute(HttpRequest::get("/v1/me")).await.unwrap_err();
        assert!(matches!(err, AuthError::Timeout));
        assert_eq!(coordinator.queued_count(), 0);
        assert!(coordinator.is_refreshing());

        // The refresh call itself is abandoned at twice the queue bound.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!coordinator.is_refreshing());
        assert!(matches!(events.try_recv().unwrap(), AuthEvent::ForcedLogout { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn refresh_timeout_is_fixed_at_construction_and_shared_by_clones() {
        let coordinator = RefreshCoordinator::with_timeout(
            TokenGate::new("a2"),
            signed_in_store(),
            fixed("a2"),
            Duration::from_millis(750),
        );
        let clone = coordinator.clone();
        assert_eq!(coordinator.refresh_timeout(), Duration::from_millis(750));
        assert_eq!(clone.refresh_timeout(), Duration::from_millis(750));

        let default = RefreshCoordinator::new(TokenGate::new("a2"), signed_in_store(), fixed("a2"));
        assert_eq!(default.refresh_timeout(), DEFAULT_REFRESH_TIMEOUT);
    }

    #[tokio::test]
    async fn reset_cancels_queued_callers() {
        let coordinator =
            RefreshCoordinator::new(TokenGate::new("a2"), signed_in_store(), Arc::new(HangingRefresher));

        let caller = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.execute(HttpRequest::get("/v1/me")).await })
        };
        while coordinator.queued_count() == 0 {
            tokio::task::yield_now().await;
        }

        coordinator.reset();
        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, AuthError::Cancelled));
        assert_eq!(coordinator.queued_count(), 0);
        // The hung refresh still holds the single-flight slot.
        assert!(coordinator.is_refreshing());
    }
}
