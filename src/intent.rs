//! # Intent Extraction
//!
//! Turns a short spoken phrase (already stripped of the trigger word) into a
//! structured weather query: is it about the weather, which place, and which
//! time span.
//!
//! ## Matching Rules:
//! - Everything is lower-cased first, so matching is case-insensitive
//! - Vocabulary checks are plain substring tests, not word-boundary matches
//! - The location is whatever is left after deleting every time word
//!
//! Substring deletion means a time word hidden inside a place name is cut out
//! as well (`"tage"` inside a city name, for example). Downstream validation
//! of the city is left to the weather provider.

use serde::{Deserialize, Serialize};

/// Words that mark a phrase as weather related.
const WEATHER_WORDS: &[&str] = &[
    "wetter",
    "temperatur",
    "regen",
    "schnee",
    "sonne",
    "wind",
    "kalt",
    "warm",
    "gewitter",
    "niederschlag",
    "bewölkt",
    "wolken",
    "grad",
    "celsius",
    "vorhersage",
];

const TODAY_WORDS: &[&str] = &["heute", "jetzt", "aktuell"];
const TOMORROW_WORDS: &[&str] = &["morgen"];
const WEEK_WORDS: &[&str] = &["woche", "tage", "übermorgen"];

/// Time span a query refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePeriod {
    #[default]
    Today,
    Tomorrow,
    Week,
}

impl TimePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimePeriod::Today => "today",
            TimePeriod::Tomorrow => "tomorrow",
            TimePeriod::Week => "week",
        }
    }
}

impl std::fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured reading of one utterance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Intent {
    pub is_weather_query: bool,
    /// `None` only when nothing but time words (or whitespace) was said.
    pub location: Option<String>,
    pub time_period: TimePeriod,
}

/// Stateless keyword-based extractor.
///
/// Holds no data of its own; it exists so the session layer has a named
/// collaborator to call, mirroring how the other services are wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentExtractor;

impl IntentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Interpret `text`. Total and deterministic: every input yields an intent.
    pub fn extract(&self, text: &str) -> Intent {
        if text.is_empty() {
            return Intent::default();
        }

        let text = text.to_lowercase();

        let mut is_weather_query = contains_any(&text, WEATHER_WORDS);

        let location = potential_location(&text);
        if location.is_some() {
            is_weather_query = true;
        }

        Intent {
            is_weather_query,
            location,
            time_period: time_period(&text),
        }
    }
}

/// Delete every time word and keep what remains as the place candidate.
fn potential_location(text: &str) -> Option<String> {
    let mut remainder = text.to_string();
    for words in [TODAY_WORDS, TOMORROW_WORDS, WEEK_WORDS] {
        for word in words {
            remainder = remainder.replace(word, "").trim().to_string();
        }
    }

    if remainder.is_empty() {
        None
    } else {
        Some(remainder)
    }
}

// Order matters: week words are checked last and win over tomorrow words.
fn time_period(text: &str) -> TimePeriod {
    let mut period = TimePeriod::Today;
    if contains_any(text, TOMORROW_WORDS) {
        period = TimePeriod::Tomorrow;
    }
    if contains_any(text, WEEK_WORDS) {
        period = TimePeriod::Week;
    }
    period
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|word| text.contains(word))
}
