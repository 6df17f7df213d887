//! # murmur-intent
//!
//! Deterministic on-device intent classification for murmur.
//!
//! When the classification backend is unreachable, murmur falls back to this
//! crate. It scores an utterance against a fixed table of keywords and
//! phrases, picks the strongest category, and pulls out a handful of simple
//! parameters (durations, contacts, destinations). No models, no network,
//! no allocation beyond the result itself.
//!
//! ## Design
//!
//! - Pure functions over `&str`; the [`IntentClassifier`] holds only its rule table
//! - Confidence grows with match strength and shrinks when two categories tie
//! - Utterances are logged only at trace level
//!
//! ```
//! let classifier = murmur_intent::IntentClassifier::new();
//! let found = classifier.classify("set a timer for 5 minutes").unwrap();
//! assert_eq!(found.category, murmur_intent::IntentCategory::Timer);
//! assert_eq!(found.parameters.get("duration_seconds").map(String::as_str), Some("300"));
//! ```

pub mod classifier;
pub mod error;
pub mod params;
pub mod rules;
pub mod types;

pub use classifier::IntentClassifier;
pub use error::{IntentError, Result};
pub use types::{IntentCategory, IntentMatch};

/// Classify `text` with the built-in rule table.
///
/// Convenience wrapper around [`IntentClassifier::classify`].
///
/// # Errors
///
/// Returns [`IntentError::EmptyInput`] when `text` is blank.
pub fn classify(text: &str) -> Result<IntentMatch> {
    IntentClassifier::new().classify(text)
}
