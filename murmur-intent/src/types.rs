//! Core types for local intent classification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Intent categories the local classifier can recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    /// Start, stop or query a countdown timer.
    Timer,
    /// Create a reminder for later.
    Reminder,
    /// Weather conditions or forecast.
    Weather,
    /// Music playback control.
    Music,
    /// Place a phone call.
    Call,
    /// Send a text message.
    Message,
    /// Directions or navigation.
    Navigation,
    /// Lights, thermostat and other connected devices.
    SmartHome,
    /// A general question with no more specific category.
    Question,
    /// Nothing matched.
    Unknown,
}

impl IntentCategory {
    /// Stable wire name (matches the backend's category strings).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Reminder => "reminder",
            Self::Weather => "weather",
            Self::Music => "music",
            Self::Call => "call",
            Self::Message => "message",
            Self::Navigation => "navigation",
            Self::SmartHome => "smart_home",
            Self::Question => "question",
            Self::Unknown => "unknown",
        }
    }

    /// Default intent name reported for this category.
    ///
    /// The backend reports a finer-grained intent; locally the best we can
    /// do is one canonical action per category.
    pub fn default_intent(&self) -> &'static str {
        match self {
            Self::Timer => "set_timer",
            Self::Reminder => "create_reminder",
            Self::Weather => "get_weather",
            Self::Music => "play_music",
            Self::Call => "place_call",
            Self::Message => "send_message",
            Self::Navigation => "get_directions",
            Self::SmartHome => "control_device",
            Self::Question => "answer_question",
            Self::Unknown => "unknown",
        }
    }

    /// Returns every category in declaration order.
    pub fn all() -> &'static [IntentCategory] {
        &[
            Self::Timer,
            Self::Reminder,
            Self::Weather,
            Self::Music,
            Self::Call,
            Self::Message,
            Self::Navigation,
            Self::SmartHome,
            Self::Question,
            Self::Unknown,
        ]
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one utterance locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentMatch {
    /// Winning category.
    pub category: IntentCategory,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Extracted slot values, keyed by slot name.
    pub parameters: BTreeMap<String, String>,
    /// The utterance exactly as it was passed in.
    pub original_text: String,
    /// Wall-clock time spent classifying.
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names_are_unique() {
        let mut names: Vec<&str> = IntentCategory::all().iter().map(|c| c.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), IntentCategory::all().len());
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&IntentCategory::SmartHome).unwrap_or_default();
        assert_eq!(json, "\"smart_home\"");
    }

    #[test]
    fn display_matches_as_str() {
        for category in IntentCategory::all() {
            assert_eq!(category.to_string(), category.as_str());
        }
    }
}
