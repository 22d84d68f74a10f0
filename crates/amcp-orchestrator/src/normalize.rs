//! Parameter normalization (spec §4.10 step 2): locations to `"City,CC"`
//! form with IATA codes resolved, dates to ISO 8601, language names to
//! ISO 639-1. Applied in place to a task's parameter map before dispatch.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;

/// Known IATA airport/city codes resolved to `"City,CC"`. Not exhaustive —
/// codes absent from this table are passed through unchanged rather than
/// guessed at.
const IATA_CODES: &[(&str, &str)] = &[
    ("NYC", "New York,US"),
    ("JFK", "New York,US"),
    ("LON", "London,GB"),
    ("LHR", "London,GB"),
    ("PAR", "Paris,FR"),
    ("CDG", "Paris,FR"),
    ("TYO", "Tokyo,JP"),
    ("NRT", "Tokyo,JP"),
    ("BER", "Berlin,DE"),
    ("MAD", "Madrid,ES"),
    ("ROM", "Rome,IT"),
    ("SYD", "Sydney,AU"),
];

const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("english", "en"),
    ("french", "fr"),
    ("spanish", "es"),
    ("german", "de"),
    ("italian", "it"),
    ("japanese", "ja"),
    ("chinese", "zh"),
    ("portuguese", "pt"),
];

const DATE_INPUT_FORMATS: &[&str] = &["%m/%d/%Y", "%d-%m-%Y", "%B %d, %Y", "%d %B %Y"];

/// Normalize the `location`, `date`, and `language` fields of a task's
/// parameter map in place; every other field is left untouched.
pub fn normalize_parameters(parameters: &mut BTreeMap<String, Value>) {
    if let Some(Value::String(location)) = parameters.get("location") {
        let normalized = normalize_location(location);
        parameters.insert("location".to_string(), Value::String(normalized));
    }
    if let Some(Value::String(date)) = parameters.get("date") {
        if let Some(normalized) = normalize_date(date) {
            parameters.insert("date".to_string(), Value::String(normalized));
        }
    }
    if let Some(Value::String(language)) = parameters.get("language") {
        let normalized = normalize_language(language);
        parameters.insert("language".to_string(), Value::String(normalized));
    }
}

fn normalize_location(raw: &str) -> String {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();
    if let Some((_, resolved)) = IATA_CODES.iter().find(|(code, _)| *code == upper) {
        return resolved.to_string();
    }
    trimmed.to_string()
}

fn normalize_date(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok() {
        return Some(trimmed.to_string());
    }
    DATE_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
}

fn normalize_language(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    if lowered.len() == 2 && lowered.chars().all(|c| c.is_ascii_alphabetic()) {
        return lowered;
    }
    LANGUAGE_NAMES
        .iter()
        .find(|(name, _)| *name == lowered)
        .map(|(_, code)| code.to_string())
        .unwrap_or(lowered)
}
