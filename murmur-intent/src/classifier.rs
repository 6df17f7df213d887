//! Rule-based intent classifier.

use std::time::Instant;

use crate::error::{IntentError, Result};
use crate::params;
use crate::rules::{QUESTION_OPENERS, RULES, Rule};
use crate::types::{IntentCategory, IntentMatch};

/// Longest utterance accepted, in characters.
pub const MAX_INPUT_CHARS: usize = 2000;

/// Confidence reported when nothing matched.
const UNKNOWN_CONFIDENCE: f64 = 0.2;
/// Confidence reported for a bare question.
const QUESTION_CONFIDENCE: f64 = 0.5;
/// Confidence floor for any rule match.
const BASE_CONFIDENCE: f64 = 0.4;
/// Confidence added per point of rule score.
const CONFIDENCE_PER_POINT: f64 = 0.15;
/// Confidence ceiling; local answers are never fully certain.
const MAX_CONFIDENCE: f64 = 0.95;
/// Penalty applied when the runner-up scored the same as the winner.
const TIE_PENALTY: f64 = 0.15;

/// Scores utterances against a static rule table.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    rules: &'static [Rule],
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    /// Create a classifier using the built-in [`RULES`].
    pub fn new() -> Self {
        Self { rules: RULES }
    }

    /// Create a classifier with a custom rule table.
    pub fn with_rules(rules: &'static [Rule]) -> Self {
        Self { rules }
    }

    /// Classify a single utterance.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::EmptyInput`] for blank input and
    /// [`IntentError::TooLong`] past [`MAX_INPUT_CHARS`].
    pub fn classify(&self, text: &str) -> Result<IntentMatch> {
        let started = Instant::now();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(IntentError::EmptyInput);
        }
        let chars = trimmed.chars().count();
        if chars > MAX_INPUT_CHARS {
            return Err(IntentError::TooLong(chars));
        }

        let words: Vec<String> = trimmed
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation() && c != '\'').to_owned())
            .filter(|w| !w.is_empty())
            .collect();
        let normalized = words.join(" ").to_lowercase();
        let tokens: Vec<&str> = normalized.split(' ').collect();

        let mut scored: Vec<(IntentCategory, f64)> = self
            .rules
            .iter()
            .map(|rule| (rule.category, rule.score(&normalized, &tokens)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        // Stable sort keeps table order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (category, confidence) = match scored.as_slice() {
            [] if looks_like_question(trimmed, &tokens) => {
                (IntentCategory::Question, QUESTION_CONFIDENCE)
            }
            [] => (IntentCategory::Unknown, UNKNOWN_CONFIDENCE),
            [(category, best), rest @ ..] => {
                let mut confidence = (BASE_CONFIDENCE + best * CONFIDENCE_PER_POINT).min(MAX_CONFIDENCE);
                if rest.first().is_some_and(|(_, second)| (second - best).abs() < f64::EPSILON) {
                    confidence -= TIE_PENALTY;
                }
                (*category, confidence)
            }
        };

        let parameters = params::extract(category, &words);
        tracing::trace!(category = %category, confidence, "local intent classified");

        Ok(IntentMatch {
            category,
            confidence,
            parameters,
            original_text: text.to_owned(),
            elapsed: started.elapsed(),
        })
    }
}

fn looks_like_question(trimmed: &str, tokens: &[&str]) -> bool {
    trimmed.ends_with('?')
        || tokens
            .first()
            .is_some_and(|first| QUESTION_OPENERS.contains(first))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> IntentMatch {
        IntentClassifier::new()
            .classify(text)
            .unwrap_or_else(|e| panic!("classify failed: {e}"))
    }

    #[test]
    fn timer_with_duration() {
        let found = classify("Set a timer for 10 minutes");
        assert_eq!(found.category, IntentCategory::Timer);
        assert_eq!(
            found.parameters.get("duration_seconds").map(String::as_str),
            Some("600")
        );
        assert!(found.confidence > 0.8);
    }

    #[test]
    fn weather_question_beats_generic_question() {
        let found = classify("What's the weather like in Lisbon?");
        assert_eq!(found.category, IntentCategory::Weather);
        assert_eq!(found.parameters.get("location").map(String::as_str), Some("Lisbon"));
    }

    #[test]
    fn bare_question_falls_back_to_question() {
        let found = classify("who wrote middlemarch?");
        assert_eq!(found.category, IntentCategory::Question);
        assert!((found.confidence - QUESTION_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn gibberish_is_unknown_with_low_confidence() {
        let found = classify("blorp zindle");
        assert_eq!(found.category, IntentCategory::Unknown);
        assert!(found.confidence < 0.5);
    }

    #[test]
    fn original_text_is_preserved() {
        let found = classify("  Call Mum  ");
        assert_eq!(found.original_text, "  Call Mum  ");
        assert_eq!(found.category, IntentCategory::Call);
        assert_eq!(found.parameters.get("contact").map(String::as_str), Some("Mum"));
    }

    #[test]
    fn empty_input_rejected() {
        let err = IntentClassifier::new().classify("   ");
        assert_eq!(err, Err(IntentError::EmptyInput));
    }

    #[test]
    fn overlong_input_rejected() {
        let text = "a".repeat(MAX_INPUT_CHARS + 1);
        let err = IntentClassifier::new().classify(&text);
        assert_eq!(err, Err(IntentError::TooLong(MAX_INPUT_CHARS + 1)));
    }

    #[test]
    fn tie_lowers_confidence() {
        // "message" (Message) and "call" (Call) each score one keyword.
        let tied = classify("call message");
        let clear = classify("call");
        assert!(tied.confidence < clear.confidence);
    }

    #[test]
    fn confidence_is_bounded() {
        let found = classify("set a timer start a timer timer for countdown for timer countdown stopwatch");
        assert!(found.confidence <= MAX_CONFIDENCE);
    }
}
