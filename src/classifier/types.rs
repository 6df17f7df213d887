//! Classification results and the wire shapes exchanged with the backend.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Confidence at or above which a result is banded [`ConfidenceLevel::High`].
pub const HIGH_CONFIDENCE: f64 = 0.8;
/// Confidence at or above which a result is banded [`ConfidenceLevel::Medium`].
pub const MEDIUM_CONFIDENCE: f64 = 0.5;
/// Default confidence below which a result asks the user to confirm.
pub const DEFAULT_CONFIRMATION_THRESHOLD: f64 = 0.7;

/// Textual band derived from a numeric confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= HIGH_CONFIDENCE {
            Self::High
        } else if confidence >= MEDIUM_CONFIDENCE {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        f.write_str(label)
    }
}

/// Where a result was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    #[default]
    Remote,
    Local,
    /// The backend combined its own model with on-device hints.
    Hybrid,
}

/// Time spent in each stage of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Timing {
    /// Validation and normalisation.
    pub preprocessing: Duration,
    /// The remote or local classifier itself.
    pub classification: Duration,
    /// Wall time of the whole `classify` call.
    pub total: Duration,
    /// Preprocessing time reported by the backend, when it sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_preprocessing: Option<Duration>,
    /// Classification time reported by the backend, when it sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_classification: Option<Duration>,
}

/// A classified utterance. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: String,
    pub intent: String,
    /// Between 0 and 1.
    pub confidence: f64,
    pub parameters: BTreeMap<String, Value>,
    pub suggestions: Vec<String>,
    pub raw_text: String,
    pub normalized_text: String,
    pub confidence_level: ConfidenceLevel,
    pub requires_confirmation: bool,
    pub context_used: bool,
    /// A local fallback substituted for the preferred remote classifier.
    pub fallback_used: bool,
    /// Served from the result cache.
    pub cached: bool,
    pub processing_mode: ProcessingMode,
    pub timing: Timing,
}

impl ClassificationResult {
    /// Build from a backend response.
    ///
    /// Band and confirmation flag are taken from the backend when it sends
    /// them and derived from the confidence otherwise. A remote answer is
    /// never a fallback, whatever the backend claims, and its mode is
    /// `Hybrid` only when the backend says so.
    pub fn from_remote(
        remote: RemoteClassification,
        raw_text: &str,
        confirmation_threshold: f64,
        mut timing: Timing,
    ) -> Self {
        let confidence = remote.confidence.clamp(0.0, 1.0);
        timing.server_preprocessing = remote.server_preprocessing_time();
        timing.server_classification = remote.server_classification_time();
        let processing_mode = match remote.processing_mode {
            Some(ProcessingMode::Hybrid) => ProcessingMode::Hybrid,
            _ => ProcessingMode::Remote,
        };
        Self {
            category: remote.category,
            intent: remote.intent,
            confidence,
            parameters: remote.parameters,
            suggestions: remote.suggestions,
            raw_text: remote.raw_text.unwrap_or_else(|| raw_text.to_owned()),
            normalized_text: remote
                .normalized_text
                .unwrap_or_else(|| super::cache::normalize_key(raw_text)),
            confidence_level: remote
                .confidence_level
                .unwrap_or_else(|| ConfidenceLevel::from_confidence(confidence)),
            requires_confirmation: remote
                .requires_confirmation
                .unwrap_or(confidence < confirmation_threshold),
            context_used: remote.context_used,
            fallback_used: false,
            cached: false,
            processing_mode,
            timing,
        }
    }

    /// Build from an on-device classification.
    pub fn from_local(
        local: LocalClassification,
        confirmation_threshold: f64,
        fallback_used: bool,
        timing: Timing,
    ) -> Self {
        let confidence = local.confidence.clamp(0.0, 1.0);
        let normalized_text = super::cache::normalize_key(&local.original_text);
        Self {
            category: local.category,
            intent: local.intent,
            confidence,
            parameters: local
                .parameters
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
            suggestions: Vec::new(),
            raw_text: local.original_text,
            normalized_text,
            confidence_level: ConfidenceLevel::from_confidence(confidence),
            requires_confirmation: confidence < confirmation_threshold,
            context_used: false,
            fallback_used,
            cached: false,
            processing_mode: ProcessingMode::Local,
            timing,
        }
    }

    /// The backend-shaped view of this result.
    pub fn to_remote(&self) -> RemoteClassification {
        RemoteClassification {
            category: self.category.clone(),
            intent: self.intent.clone(),
            confidence: self.confidence,
            parameters: self.parameters.clone(),
            suggestions: self.suggestions.clone(),
            raw_text: Some(self.raw_text.clone()),
            normalized_text: Some(self.normalized_text.clone()),
            confidence_level: Some(self.confidence_level),
            context_used: self.context_used,
            preprocessing_time: Some(self.timing.preprocessing.as_secs_f64()),
            classification_time: Some(self.timing.classification.as_secs_f64()),
            requires_confirmation: Some(self.requires_confirmation),
            fallback_used: Some(self.fallback_used),
            processing_mode: Some(self.processing_mode),
        }
    }
}

/// Per-call overrides of the façade settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifyOptions {
    pub prefer_remote: Option<bool>,
    pub use_context: Option<bool>,
    pub include_suggestions: Option<bool>,
}

/// Outbound classification request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub session_id: String,
    pub use_context: bool,
    pub include_suggestions: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_history: Option<Vec<String>>,
    pub processing_mode: ProcessingMode,
}

/// Inbound classification response payload.
///
/// Stage times are seconds. Optional fields fall back to values derived on
/// this side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteClassification {
    pub category: String,
    pub intent: String,
    pub confidence: f64,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub normalized_text: Option<String>,
    #[serde(default)]
    pub confidence_level: Option<ConfidenceLevel>,
    #[serde(default)]
    pub context_used: bool,
    #[serde(default)]
    pub preprocessing_time: Option<f64>,
    #[serde(default)]
    pub classification_time: Option<f64>,
    #[serde(default)]
    pub requires_confirmation: Option<bool>,
    #[serde(default)]
    pub fallback_used: Option<bool>,
    #[serde(default)]
    pub processing_mode: Option<ProcessingMode>,
}

impl RemoteClassification {
    /// Server-reported classification time, if present and sane.
    pub fn server_classification_time(&self) -> Option<Duration> {
        self.classification_time
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn server_preprocessing_time(&self) -> Option<Duration> {
        self.preprocessing_time
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

/// Native result shape of a local fallback classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalClassification {
    pub category: String,
    pub intent: String,
    pub confidence: f64,
    pub parameters: BTreeMap<String, String>,
    pub original_text: String,
    pub elapsed: Duration,
}
