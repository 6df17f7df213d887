//! Classification façade.
//!
//! Turns an utterance into a [`ClassificationResult`] using the fastest
//! trustworthy source: the backend over the persistent connection when it is
//! healthy, the on-device [`LocalFallback`] otherwise. Results are cached by
//! normalised text, and every call feeds rolling [`PerformanceMetrics`].

pub mod cache;
pub mod error;
pub mod facade;
pub mod fallback;
pub mod health;
pub mod history;
pub mod metrics;
pub mod remote;
pub mod types;

pub use cache::{ClassificationCache, normalize_key};
pub use error::{ClassifierError, error_codes};
pub use facade::{ClassificationFacade, ClassifierSettings, FacadeBuilder};
pub use fallback::LocalFallback;
pub use health::{HealthProbe, HealthStatus, HttpHealthProbe};
pub use history::ConversationHistory;
pub use metrics::{MetricsSnapshot, PerformanceMetrics};
pub use remote::{ConnectionRemoteClassifier, RemoteClassifier};
pub use types::{
    ClassificationResult, ClassifyOptions, ConfidenceLevel, LocalClassification, ProcessingMode,
    RemoteClassification, RemoteRequest, Timing,
};
