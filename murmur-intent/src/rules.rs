//! Keyword and phrase table used to score utterances.
//!
//! Phrases are matched as substrings of the normalised utterance and weigh
//! [`PHRASE_WEIGHT`]; keywords are matched against whole tokens and weigh
//! [`KEYWORD_WEIGHT`].

use crate::types::IntentCategory;

/// Score contributed by each matching multi-word phrase.
pub const PHRASE_WEIGHT: f64 = 2.0;
/// Score contributed by each matching single-word keyword.
pub const KEYWORD_WEIGHT: f64 = 1.0;

/// Matching rule for one category.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Category this rule votes for.
    pub category: IntentCategory,
    /// Multi-word phrases, lowercase.
    pub phrases: &'static [&'static str],
    /// Whole-token keywords, lowercase.
    pub keywords: &'static [&'static str],
}

impl Rule {
    /// Score `normalized` (lowercase, single-spaced) with pre-split `tokens`.
    pub fn score(&self, normalized: &str, tokens: &[&str]) -> f64 {
        let phrase_hits = self
            .phrases
            .iter()
            .filter(|phrase| contains_phrase(normalized, phrase))
            .count();
        let keyword_hits = self
            .keywords
            .iter()
            .filter(|keyword| tokens.contains(keyword))
            .count();
        phrase_hits as f64 * PHRASE_WEIGHT + keyword_hits as f64 * KEYWORD_WEIGHT
    }
}

/// Word-boundary aware substring match.
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let padded = format!(" {haystack} ");
    padded.contains(&format!(" {phrase} "))
}

/// Built-in rule table. `Question` and `Unknown` have no rules; they are
/// assigned by the classifier when nothing scores.
pub const RULES: &[Rule] = &[
    Rule {
        category: IntentCategory::Timer,
        phrases: &["set a timer", "start a timer", "countdown for", "timer for"],
        keywords: &["timer", "countdown", "stopwatch"],
    },
    Rule {
        category: IntentCategory::Reminder,
        phrases: &["remind me", "set a reminder", "don't let me forget"],
        keywords: &["reminder", "remind"],
    },
    Rule {
        category: IntentCategory::Weather,
        phrases: &["what's the weather", "weather like", "going to rain", "weather forecast"],
        keywords: &["weather", "forecast", "temperature", "rain", "sunny", "umbrella"],
    },
    Rule {
        category: IntentCategory::Music,
        phrases: &["play some", "next song", "skip this", "pause the music", "turn up the music"],
        keywords: &["play", "song", "music", "playlist", "album", "artist"],
    },
    Rule {
        category: IntentCategory::Call,
        phrases: &["give a call", "phone call", "ring up"],
        keywords: &["call", "dial", "phone"],
    },
    Rule {
        category: IntentCategory::Message,
        phrases: &["send a message", "send a text", "text message", "tell him", "tell her"],
        keywords: &["text", "message", "sms", "whatsapp"],
    },
    Rule {
        category: IntentCategory::Navigation,
        phrases: &["navigate to", "directions to", "take me to", "how do i get to", "route to"],
        keywords: &["navigate", "directions", "route", "traffic"],
    },
    Rule {
        category: IntentCategory::SmartHome,
        phrases: &["turn on", "turn off", "switch on", "switch off", "set the thermostat"],
        keywords: &["lights", "light", "thermostat", "lock", "unlock", "dim", "heating"],
    },
];

/// Words that open a question when no other rule matches.
pub const QUESTION_OPENERS: &[&str] = &[
    "what", "who", "where", "when", "why", "how", "which", "is", "are", "can", "could", "does",
    "do", "will",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phrase_match_respects_word_boundaries() {
        assert!(contains_phrase("please turn on the lights", "turn on"));
        assert!(!contains_phrase("return online", "turn on"));
    }

    #[test]
    fn phrase_outweighs_keyword() {
        let timer = RULES
            .iter()
            .find(|r| r.category == IntentCategory::Timer)
            .copied();
        let Some(timer) = timer else {
            unreachable!("timer rule missing");
        };
        let text = "set a timer";
        let tokens: Vec<&str> = text.split(' ').collect();
        // phrase "set a timer" + keyword "timer"
        assert!((timer.score(text, &tokens) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn every_rule_has_keywords() {
        for rule in RULES {
            assert!(!rule.keywords.is_empty(), "{} has no keywords", rule.category);
        }
    }
}
