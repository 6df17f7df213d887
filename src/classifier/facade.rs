//! The classification façade: remote first, local fallback, cached.
//!
//! [`ClassificationFacade::classify_with`] runs, in order:
//!
//! 1. validate and normalise the text into a cache key;
//! 2. return a live cache entry immediately, tagged `cached`;
//! 3. append the raw text to the conversation history;
//! 4. when remote-first is enabled and the backend is believed healthy, try
//!    the remote classifier up to `max_retries` times with exponential
//!    backoff between attempts, falling through to the local classifier once
//!    attempts are exhausted;
//! 5. otherwise classify locally;
//! 6. cache, record metrics and publish the result.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::{ClassificationCache, DEFAULT_CACHE_TTL, DEFAULT_MAX_ENTRIES, normalize_key};
use super::error::ClassifierError;
use super::fallback::LocalFallback;
use super::health::{HealthProbe, HealthStatus};
use super::history::{ConversationHistory, DEFAULT_HISTORY_LIMIT};
use super::metrics::{DEFAULT_SAMPLE_WINDOW, MetricsSnapshot, PerformanceMetrics};
use super::remote::RemoteClassifier;
use super::types::{
    ClassificationResult, ClassifyOptions, DEFAULT_CONFIRMATION_THRESHOLD, ProcessingMode,
    RemoteRequest, Timing,
};

/// Fewest remote attempts per call.
pub const MIN_RETRIES: u32 = 1;
/// Most remote attempts per call.
pub const MAX_RETRIES: u32 = 5;
/// Shortest per-attempt timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest per-attempt timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30);

// Maintenance timers never tick faster than this.
const MIN_MAINTENANCE_PERIOD: Duration = Duration::from_secs(1);

/// Façade policy. Build with [`Default`] or from config, then [`clamped`].
///
/// [`clamped`]: ClassifierSettings::clamped
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    pub prefer_remote: bool,
    pub enable_caching: bool,
    /// Remote attempts per call, including the first.
    pub max_retries: u32,
    /// Per remote attempt.
    pub timeout: Duration,
    pub include_suggestions: bool,
    /// Send recent history upstream as context.
    pub use_context: bool,
    pub retry_base_delay: Duration,
    pub history_limit: usize,
    pub health_check_interval: Duration,
    pub confirmation_threshold: f64,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub cache_sweep_interval: Duration,
    pub metrics_window: usize,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            prefer_remote: true,
            enable_caching: true,
            max_retries: 3,
            timeout: Duration::from_secs(10),
            include_suggestions: true,
            use_context: true,
            retry_base_delay: Duration::from_millis(500),
            history_limit: DEFAULT_HISTORY_LIMIT,
            health_check_interval: Duration::from_secs(60),
            confirmation_threshold: DEFAULT_CONFIRMATION_THRESHOLD,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_max_entries: DEFAULT_MAX_ENTRIES,
            cache_sweep_interval: Duration::from_secs(60),
            metrics_window: DEFAULT_SAMPLE_WINDOW,
        }
    }
}

impl ClassifierSettings {
    /// Force retries and timeout into their safe ranges.
    pub fn clamped(mut self) -> Self {
        self.max_retries = self.max_retries.clamp(MIN_RETRIES, MAX_RETRIES);
        self.timeout = self.timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT);
        self.confirmation_threshold = self.confirmation_threshold.clamp(0.0, 1.0);
        self
    }

    /// Delay before attempt `attempt + 1`, after `attempt` failed.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.retry_base_delay.saturating_mul(factor)
    }
}

/// Builder for [`ClassificationFacade`].
pub struct FacadeBuilder {
    settings: ClassifierSettings,
    remote: Option<Arc<dyn RemoteClassifier>>,
    fallback: Option<Arc<dyn LocalFallback>>,
    health_probe: Option<Arc<dyn HealthProbe>>,
    user_id: Option<String>,
    session_id: Option<String>,
}

impl FacadeBuilder {
    pub fn remote(mut self, remote: Arc<dyn RemoteClassifier>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn fallback(mut self, fallback: Arc<dyn LocalFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health_probe = Some(probe);
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Defaults to a random UUID.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn build(self) -> ClassificationFacade {
        let settings = self.settings.clamped();
        let (health_tx, _) = watch::channel(HealthStatus::default());
        let (results_tx, _) = watch::channel(None);
        ClassificationFacade {
            inner: Arc::new(Inner {
                cache: Mutex::new(ClassificationCache::new(
                    settings.cache_ttl,
                    settings.cache_max_entries,
                )),
                metrics: Mutex::new(PerformanceMetrics::new(settings.metrics_window)),
                history: Mutex::new(ConversationHistory::new(settings.history_limit)),
                settings,
                remote: self.remote,
                fallback: self.fallback,
                health_probe: self.health_probe,
                user_id: self.user_id,
                session_id: self
                    .session_id
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                health_tx,
                results_tx,
            }),
        }
    }
}

struct Inner {
    settings: ClassifierSettings,
    remote: Option<Arc<dyn RemoteClassifier>>,
    fallback: Option<Arc<dyn LocalFallback>>,
    health_probe: Option<Arc<dyn HealthProbe>>,
    user_id: Option<String>,
    session_id: String,
    cache: Mutex<ClassificationCache>,
    metrics: Mutex<PerformanceMetrics>,
    history: Mutex<ConversationHistory>,
    health_tx: watch::Sender<HealthStatus>,
    results_tx: watch::Sender<Option<ClassificationResult>>,
}

impl Inner {
    fn cache(&self) -> MutexGuard<'_, ClassificationCache> {
        match self.cache.lock() {
            Ok(c) => c,
            Err(p) => p.into_inner(),
        }
    }

    fn metrics(&self) -> MutexGuard<'_, PerformanceMetrics> {
        match self.metrics.lock() {
            Ok(m) => m,
            Err(p) => p.into_inner(),
        }
    }

    fn history(&self) -> MutexGuard<'_, ConversationHistory> {
        match self.history.lock() {
            Ok(h) => h,
            Err(p) => p.into_inner(),
        }
    }
}

/// Why the remote path gave up.
struct RemoteFailure {
    error: ClassifierError,
    exhausted: bool,
}

/// Classifies utterances, preferring the backend and degrading to a local
/// classifier. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ClassificationFacade {
    inner: Arc<Inner>,
}

impl fmt::Debug for ClassificationFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationFacade")
            .field("session_id", &self.inner.session_id)
            .field("has_remote", &self.inner.remote.is_some())
            .field("has_fallback", &self.inner.fallback.is_some())
            .field("cached_entries", &self.inner.cache().len())
            .field("health", &*self.inner.health_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl ClassificationFacade {
    pub fn builder(settings: ClassifierSettings) -> FacadeBuilder {
        FacadeBuilder {
            settings,
            remote: None,
            fallback: None,
            health_probe: None,
            user_id: None,
            session_id: None,
        }
    }

    /// Effective (clamped) settings.
    pub fn settings(&self) -> &ClassifierSettings {
        &self.inner.settings
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Classify with the configured defaults.
    pub async fn classify(&self, text: &str) -> Result<ClassificationResult, ClassifierError> {
        self.classify_with(text, &ClassifyOptions::default()).await
    }

    /// Classify with per-call overrides.
    pub async fn classify_with(
        &self,
        text: &str,
        options: &ClassifyOptions,
    ) -> Result<ClassificationResult, ClassifierError> {
        let started = Instant::now();
        validate(text)?;
        let key = normalize_key(text);
        let preprocessing = started.elapsed();
        let settings = &self.inner.settings;

        if settings.enable_caching {
            let hit = self.inner.cache().get(&key, Instant::now());
            if let Some(mut result) = hit {
                self.inner.metrics().record_cache_hit();
                debug!(key = %key, "classification cache hit");
                result.cached = true;
                return Ok(result);
            }
        }

        self.inner.history().push(text);

        let prefer_remote = options.prefer_remote.unwrap_or(settings.prefer_remote);
        let remote = self.inner.remote.as_ref().filter(|_| prefer_remote);
        if remote.is_some()
            && self.inner.health_probe.is_some()
            && self.health().last_checked.is_none()
        {
            self.health_check().await;
        }

        let result = match remote {
            Some(remote) if self.health().is_healthy() => {
                let remote_started = Instant::now();
                match self.classify_remote(remote.as_ref(), text, options, preprocessing, started).await {
                    Ok(result) => {
                        self.inner.metrics().record_remote_success(remote_started.elapsed());
                        result
                    }
                    Err(failure) => {
                        self.inner.metrics().record_remote_failure();
                        if failure.exhausted {
                            self.mark_service_unavailable(&failure.error);
                        }
                        if self.inner.fallback.is_none() {
                            return Err(surface(failure, settings.max_retries));
                        }
                        warn!(error = %failure.error, "remote classification failed, using local fallback");
                        self.classify_local(text, true, preprocessing, started)?
                    }
                }
            }
            Some(_) => {
                if self.inner.fallback.is_none() {
                    return Err(ClassifierError::FallbackUnavailable(
                        "classification service is unhealthy and no local fallback is available".into(),
                    ));
                }
                debug!("classification service unhealthy, classifying locally");
                self.classify_local(text, true, preprocessing, started)?
            }
            None => {
                if self.inner.fallback.is_none() {
                    return Err(ClassifierError::FallbackUnavailable(
                        "remote classification is disabled and no local fallback is available".into(),
                    ));
                }
                self.classify_local(text, false, preprocessing, started)?
            }
        };

        if settings.enable_caching {
            let evicted = self.inner.cache().insert(key, result.clone(), Instant::now());
            if evicted > 0 {
                debug!(evicted, "classification cache over capacity");
            }
        }
        self.inner.results_tx.send_replace(Some(result.clone()));
        Ok(result)
    }

    async fn classify_remote(
        &self,
        remote: &dyn RemoteClassifier,
        text: &str,
        options: &ClassifyOptions,
        preprocessing: Duration,
        started: Instant,
    ) -> Result<ClassificationResult, RemoteFailure> {
        let settings = &self.inner.settings;
        let use_context = options.use_context.unwrap_or(settings.use_context);
        let include_suggestions = options
            .include_suggestions
            .unwrap_or(settings.include_suggestions);
        let request = RemoteRequest {
            text: text.to_owned(),
            user_id: self.inner.user_id.clone(),
            session_id: self.inner.session_id.clone(),
            use_context,
            include_suggestions,
            conversation_history: use_context.then(|| self.history()),
            processing_mode: ProcessingMode::Remote,
        };

        let attempts = settings.max_retries;
        let mut last_error = None;
        for attempt in 1..=attempts {
            let attempt_started = Instant::now();
            let outcome = match tokio::time::timeout(settings.timeout, remote.classify(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ClassifierError::Timeout(format!(
                    "remote attempt {attempt} exceeded {}ms",
                    settings.timeout.as_millis()
                ))),
            };
            match outcome {
                Ok(response) => {
                    let timing = Timing {
                        preprocessing,
                        classification: attempt_started.elapsed(),
                        total: started.elapsed(),
                        ..Timing::default()
                    };
                    let mut result = ClassificationResult::from_remote(
                        response,
                        text,
                        settings.confirmation_threshold,
                        timing,
                    );
                    if !include_suggestions {
                        result.suggestions.clear();
                    }
                    debug!(attempt, category = %result.category, "remote classification succeeded");
                    return Ok(result);
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, attempts, error = %e, "remote classification attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(settings.retry_delay(attempt)).await;
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "remote classification rejected");
                    return Err(RemoteFailure {
                        error: e,
                        exhausted: false,
                    });
                }
            }
        }
        Err(RemoteFailure {
            error: last_error
                .unwrap_or_else(|| ClassifierError::Remote("no remote attempt was made".into())),
            exhausted: true,
        })
    }

    fn classify_local(
        &self,
        text: &str,
        fallback_used: bool,
        preprocessing: Duration,
        started: Instant,
    ) -> Result<ClassificationResult, ClassifierError> {
        let Some(fallback) = self.inner.fallback.as_ref() else {
            return Err(ClassifierError::FallbackUnavailable(
                "no local fallback is available".into(),
            ));
        };
        let local = fallback.classify(text)?;
        let timing = Timing {
            preprocessing,
            classification: local.elapsed,
            total: started.elapsed(),
            ..Timing::default()
        };
        let result = ClassificationResult::from_local(
            local,
            self.inner.settings.confirmation_threshold,
            fallback_used,
            timing,
        );
        self.inner.metrics().record_fallback(started.elapsed());
        Ok(result)
    }

    /// Probe the backend now and publish the outcome.
    ///
    /// Without a probe the current status is returned unchanged.
    pub async fn health_check(&self) -> HealthStatus {
        let Some(probe) = self.inner.health_probe.as_ref() else {
            return self.health();
        };
        let outcome = match tokio::time::timeout(self.inner.settings.timeout, probe.check()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClassifierError::Timeout("health check timed out".into())),
        };
        let healthy = outcome.is_ok();
        let was_healthy = self.health().is_healthy();
        self.inner.health_tx.send_replace(HealthStatus {
            network_available: healthy,
            service_available: healthy,
            last_checked: Some(Utc::now()),
        });
        match outcome {
            Ok(()) if !was_healthy => info!("classification service is healthy again"),
            Err(e) if was_healthy => info!(error = %e, "classification service is unhealthy"),
            Err(e) => debug!(error = %e, "classification service still unhealthy"),
            Ok(()) => {}
        }
        self.health()
    }

    fn mark_service_unavailable(&self, cause: &ClassifierError) {
        let flipped = self.inner.health_tx.send_if_modified(|status| {
            let changed = status.service_available;
            status.service_available = false;
            changed
        });
        if flipped {
            info!(error = %cause, "classification service marked unhealthy");
        }
    }

    pub fn health(&self) -> HealthStatus {
        self.inner.health_tx.borrow().clone()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<HealthStatus> {
        self.inner.health_tx.subscribe()
    }

    /// Run the periodic health check and cache sweep until `cancel` fires.
    pub fn spawn_maintenance(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let facade = self.clone();
        tokio::spawn(async move { facade.run_maintenance(cancel).await })
    }

    async fn run_maintenance(&self, cancel: CancellationToken) {
        let settings = &self.inner.settings;
        let mut health = tokio::time::interval(settings.health_check_interval.max(MIN_MAINTENANCE_PERIOD));
        let mut sweep = tokio::time::interval(settings.cache_sweep_interval.max(MIN_MAINTENANCE_PERIOD));
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Both first ticks complete immediately.
        health.tick().await;
        sweep.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = health.tick() => {
                    self.health_check().await;
                }
                _ = sweep.tick() => {
                    let removed = self.inner.cache().sweep(Instant::now());
                    if removed > 0 {
                        debug!(removed, "swept expired classifications");
                    }
                }
            }
        }
        debug!("classification maintenance stopped");
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics().snapshot()
    }

    /// Clear cached results and reset metrics.
    pub fn clear_cache(&self) {
        self.inner.cache().clear();
        self.inner.metrics().reset();
    }

    pub fn cache_len(&self) -> usize {
        self.inner.cache().len()
    }

    pub fn last_classification(&self) -> Option<ClassificationResult> {
        self.inner.results_tx.borrow().clone()
    }

    pub fn subscribe_results(&self) -> watch::Receiver<Option<ClassificationResult>> {
        self.inner.results_tx.subscribe()
    }

    /// Recent utterances, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.inner.history().snapshot()
    }

    pub fn clear_history(&self) {
        self.inner.history().clear();
    }
}

fn validate(text: &str) -> Result<(), ClassifierError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ClassifierError::InvalidInput("text is empty".into()));
    }
    let chars = trimmed.chars().count();
    if chars > murmur_intent::classifier::MAX_INPUT_CHARS {
        return Err(ClassifierError::InvalidInput(format!(
            "text is {chars} characters, limit is {}",
            murmur_intent::classifier::MAX_INPUT_CHARS
        )));
    }
    Ok(())
}

fn surface(failure: RemoteFailure, attempts: u32) -> ClassifierError {
    let exhausted = failure.exhausted;
    match failure.error {
        e @ ClassifierError::Timeout(_) if exhausted => e,
        e if exhausted => ClassifierError::RetriesExhausted {
            attempts,
            last_error: e.to_string(),
        },
        e => e,
    }
}
