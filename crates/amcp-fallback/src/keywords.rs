//! Keyword extraction and the domain-category hint table.
//!
//! Kept deliberately small: a fixed stopword list and a lowercase/alnum
//! tokenizer, the same "good enough" shape as the teacher's keyword-based
//! routing rather than a full NLP pipeline.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "to", "of", "in", "on",
    "at", "for", "with", "about", "as", "by", "and", "or", "but", "if", "so", "than", "then",
    "that", "this", "these", "those", "it", "its", "i", "you", "he", "she", "we", "they", "my",
    "your", "me", "do", "does", "did", "can", "could", "will", "would", "should", "what", "whats",
    "how", "when", "where", "who", "why", "please", "hi", "hello",
];

/// Lowercase, alphanumeric-only tokens with stopwords removed, deduplicated.
pub fn extract_keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|tok| tok.to_lowercase())
        .filter(|tok| !tok.is_empty() && !STOPWORDS.contains(&tok.as_str()))
        .collect()
}

/// Domain categories induced at runtime from the content of a successful
/// prompt/response pair, beyond the seeded minimum category set.
const DOMAIN_HINTS: &[(&str, &[&str])] = &[
    ("weather", &["weather", "forecast", "temperature", "rain", "sunny", "humidity", "climate"]),
    ("stock", &["stock", "quote", "share", "price", "market", "ticker", "nasdaq", "equity"]),
    ("travel", &["travel", "flight", "hotel", "itinerary", "trip", "airport", "booking", "visa"]),
];

/// Infer a category from a keyword set: the first domain hint set with any
/// overlap wins, otherwise `fallback` is returned unchanged (the caller
/// passes one of the seeded categories as the fallback).
pub fn infer_domain_category<'a>(keywords: &BTreeSet<String>, fallback: &'a str) -> &'a str {
    for (category, hints) in DOMAIN_HINTS {
        if hints.iter().any(|hint| keywords.contains(*hint)) {
            return category;
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_stopwords_and_lowercases() {
        let kws = extract_keywords("What is the Weather in Nice?");
        assert!(kws.contains("weather"));
        assert!(kws.contains("nice"));
        assert!(!kws.contains("what"));
        assert!(!kws.contains("is"));
    }

    #[test]
    fn infers_weather_domain() {
        let kws = extract_keywords("Give me the forecast for tomorrow");
        assert_eq!(infer_domain_category(&kws, "general"), "weather");
    }

    #[test]
    fn falls_back_when_no_domain_hint_matches() {
        let kws = extract_keywords("Explain recursion in plain terms");
        assert_eq!(infer_domain_category(&kws, "explanation"), "explanation");
    }
}
