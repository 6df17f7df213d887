//! On-device classification used when the backend is unavailable.

use murmur_intent::IntentClassifier;

use super::error::ClassifierError;
use super::types::LocalClassification;

/// A synchronous, local classifier.
pub trait LocalFallback: Send + Sync {
    fn classify(&self, text: &str) -> Result<LocalClassification, ClassifierError>;
}

impl LocalFallback for IntentClassifier {
    fn classify(&self, text: &str) -> Result<LocalClassification, ClassifierError> {
        let matched = IntentClassifier::classify(self, text)?;
        Ok(LocalClassification {
            category: matched.category.as_str().to_owned(),
            intent: matched.category.default_intent().to_owned(),
            confidence: matched.confidence,
            parameters: matched.parameters,
            original_text: matched.original_text,
            elapsed: matched.elapsed,
        })
    }
}
