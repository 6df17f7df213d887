//! Slot extraction for locally classified utterances.
//!
//! Each extractor works on the whitespace-split words of the original
//! utterance (punctuation trimmed) so extracted values keep the speaker's
//! casing, e.g. "call Mum" yields `contact = "Mum"`.

use std::collections::BTreeMap;

use crate::types::IntentCategory;

/// Words that end a free-text slot such as a contact name.
const SLOT_TERMINATORS: &[&str] = &["and", "about", "that", "saying", "to", "at", "on", "please"];

/// Extract the parameters relevant to `category` from `words`.
pub fn extract(category: IntentCategory, words: &[String]) -> BTreeMap<String, String> {
    let lower: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
    let mut params = BTreeMap::new();

    match category {
        IntentCategory::Timer | IntentCategory::Reminder => {
            if let Some(seconds) = duration_seconds(&lower) {
                params.insert("duration_seconds".to_owned(), seconds.to_string());
            }
            if category == IntentCategory::Reminder {
                if let Some(task) = tail_after(words, &lower, &["remind", "me", "to"]) {
                    params.insert("task".to_owned(), task);
                }
            }
        }
        IntentCategory::Call => {
            if let Some(contact) = slot_after(words, &lower, &["call", "dial", "ring"]) {
                params.insert("contact".to_owned(), contact);
            }
        }
        IntentCategory::Message => {
            if let Some(contact) = slot_after(words, &lower, &["text", "message", "tell"]) {
                params.insert("contact".to_owned(), contact);
            }
        }
        IntentCategory::Navigation => {
            let destination = tail_after(words, &lower, &["navigate", "to"])
                .or_else(|| tail_after(words, &lower, &["directions", "to"]))
                .or_else(|| tail_after(words, &lower, &["take", "me", "to"]))
                .or_else(|| tail_after(words, &lower, &["route", "to"]));
            if let Some(destination) = destination {
                params.insert("destination".to_owned(), destination);
            }
        }
        IntentCategory::Music => {
            if let Some(query) = tail_after(words, &lower, &["play"]) {
                params.insert("query".to_owned(), query);
            }
        }
        IntentCategory::SmartHome => {
            if lower.iter().any(|w| w == "on") {
                params.insert("state".to_owned(), "on".to_owned());
            } else if lower.iter().any(|w| w == "off") {
                params.insert("state".to_owned(), "off".to_owned());
            }
            let device = tail_after(words, &lower, &["on", "the"])
                .or_else(|| tail_after(words, &lower, &["off", "the"]));
            if let Some(device) = device {
                params.insert("device".to_owned(), device);
            }
        }
        IntentCategory::Weather => {
            if let Some(location) = tail_after(words, &lower, &["in"]) {
                params.insert("location".to_owned(), location);
            }
        }
        IntentCategory::Question | IntentCategory::Unknown => {}
    }

    params
}

/// Parse "<number> <unit>" pairs and sum them into seconds.
///
/// Accepts digits or the words one..ten, and second/minute/hour units in
/// singular, plural and abbreviated forms. "5 minutes and 30 seconds" → 330.
pub fn duration_seconds(lower: &[String]) -> Option<u64> {
    let mut total: u64 = 0;
    let mut found = false;

    for pair in lower.windows(2) {
        let Some(amount) = parse_number(&pair[0]) else {
            continue;
        };
        let unit = match pair[1].as_str() {
            "second" | "seconds" | "sec" | "secs" => 1,
            "minute" | "minutes" | "min" | "mins" => 60,
            "hour" | "hours" | "hr" | "hrs" => 3600,
            _ => continue,
        };
        total = total.saturating_add(amount.saturating_mul(unit));
        found = true;
    }

    found.then_some(total)
}

fn parse_number(word: &str) -> Option<u64> {
    if let Ok(n) = word.parse::<u64>() {
        return Some(n);
    }
    let n = match word {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "fifteen" => 15,
        "twenty" => 20,
        "thirty" => 30,
        _ => return None,
    };
    Some(n)
}

/// Everything after the first occurrence of the `marker` word sequence.
fn tail_after(words: &[String], lower: &[String], marker: &[&str]) -> Option<String> {
    let start = find_sequence(lower, marker)? + marker.len();
    let tail = words.get(start..)?;
    if tail.is_empty() {
        return None;
    }
    Some(tail.join(" "))
}

/// The words after any of `triggers`, up to the first slot terminator.
fn slot_after(words: &[String], lower: &[String], triggers: &[&str]) -> Option<String> {
    let trigger_at = lower.iter().position(|w| triggers.contains(&w.as_str()))?;
    let mut slot = Vec::new();
    for (word, low) in words.iter().zip(lower).skip(trigger_at + 1) {
        if SLOT_TERMINATORS.contains(&low.as_str()) {
            break;
        }
        slot.push(word.as_str());
    }
    (!slot.is_empty()).then(|| slot.join(" "))
}

fn find_sequence(lower: &[String], marker: &[&str]) -> Option<usize> {
    if marker.is_empty() || lower.len() < marker.len() {
        return None;
    }
    lower
        .windows(marker.len())
        .position(|window| window.iter().zip(marker).all(|(w, m)| w == m))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_owned).collect()
    }

    fn lower(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split_whitespace()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn duration_sums_units() {
        assert_eq!(duration_seconds(&lower("5 minutes and 30 seconds")), Some(330));
        assert_eq!(duration_seconds(&lower("an hour")), Some(3600));
        assert_eq!(duration_seconds(&lower("set a timer")), None);
    }

    #[test]
    fn call_extracts_contact_with_casing() {
        let params = extract(IntentCategory::Call, &words("please call Aunt Mary about dinner"));
        assert_eq!(params.get("contact").map(String::as_str), Some("Aunt Mary"));
    }

    #[test]
    fn navigation_extracts_destination() {
        let params = extract(
            IntentCategory::Navigation,
            &words("give me directions to Central Station"),
        );
        assert_eq!(
            params.get("destination").map(String::as_str),
            Some("Central Station")
        );
    }

    #[test]
    fn smart_home_extracts_state_and_device() {
        let params = extract(IntentCategory::SmartHome, &words("turn off the kitchen lights"));
        assert_eq!(params.get("state").map(String::as_str), Some("off"));
        assert_eq!(params.get("device").map(String::as_str), Some("kitchen lights"));
    }

    #[test]
    fn reminder_extracts_task() {
        let params = extract(
            IntentCategory::Reminder,
            &words("remind me to water the plants"),
        );
        assert_eq!(params.get("task").map(String::as_str), Some("water the plants"));
    }

    #[test]
    fn unknown_has_no_parameters() {
        assert!(extract(IntentCategory::Unknown, &words("blah blah")).is_empty());
    }
}
