//! Topic and topic-pattern grammar.
//!
//! A topic is a dotted hierarchical string whose segments match
//! `[A-Za-z0-9_-]+`; event topics may never contain wildcards. A topic
//! pattern extends that grammar with `*` (exactly one segment) and `**`
//! (zero or more segments, terminal only). Parsing happens here; matching
//! a topic against a pattern is the Topic Matcher's job (`amcp-broker`),
//! since it is a routing concern rather than a data-model one.

use crate::error::AmcpError;
use serde::{Deserialize, Serialize};
use std::fmt;

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A validated, wildcard-free hierarchical topic, e.g. `task.request.weather`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Parse and validate a topic string.
    ///
    /// Rejects empty segments and any segment that is exactly `*` or `**`
    /// (wildcards are only meaningful in subscription patterns).
    pub fn parse(raw: &str) -> Result<Self, AmcpError> {
        if raw.is_empty() {
            return Err(AmcpError::InvalidTopic(
                "topic must not be empty".to_string(),
            ));
        }
        for segment in raw.split('.') {
            if segment == "*" || segment == "**" {
                return Err(AmcpError::InvalidTopic(format!(
                    "topic '{raw}' must not contain wildcard segments"
                )));
            }
            if !is_valid_segment(segment) {
                return Err(AmcpError::InvalidTopic(format!(
                    "topic '{raw}' has an invalid segment '{segment}'"
                )));
            }
        }
        Ok(Self(raw.to_string()))
    }

    /// Segments of this topic, in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// The raw dotted string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Topic {
    type Error = AmcpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Topic> for String {
    fn from(value: Topic) -> Self {
        value.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One segment of a parsed topic pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSegment {
    /// A literal segment that must match exactly.
    Literal(String),
    /// `*` — matches exactly one segment.
    Single,
    /// `**` — matches zero or more segments; only valid as the last segment.
    MultiLevel,
}

/// A validated topic pattern usable in a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicPattern {
    raw: String,
    #[serde(skip)]
    segments: Vec<PatternSegment>,
}

impl TopicPattern {
    /// Parse and validate a topic pattern.
    ///
    /// `**` is permitted only as the terminal segment; an intermediate
    /// `**` is rejected. A bare `**` matches every well-formed topic.
    pub fn parse(raw: &str) -> Result<Self, AmcpError> {
        if raw.is_empty() {
            return Err(AmcpError::InvalidTopic(
                "pattern must not be empty".to_string(),
            ));
        }
        let parts: Vec<&str> = raw.split('.').collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (idx, part) in parts.iter().enumerate() {
            let is_last = idx == parts.len() - 1;
            match *part {
                "**" => {
                    if !is_last {
                        return Err(AmcpError::InvalidTopic(format!(
                            "pattern '{raw}' has a non-terminal '**'"
                        )));
                    }
                    segments.push(PatternSegment::MultiLevel);
                }
                "*" => segments.push(PatternSegment::Single),
                literal => {
                    if !is_valid_segment(literal) {
                        return Err(AmcpError::InvalidTopic(format!(
                            "pattern '{raw}' has an invalid segment '{literal}'"
                        )));
                    }
                    segments.push(PatternSegment::Literal(literal.to_string()));
                }
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The parsed segments, in order.
    pub fn segments(&self) -> &[PatternSegment] {
        &self.segments
    }

    /// The raw dotted pattern string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl TryFrom<String> for TopicPattern {
    type Error = AmcpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TopicPattern> for String {
    fn from(value: TopicPattern) -> Self {
        value.raw
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_rejects_empty_segment() {
        assert!(Topic::parse("a..b").is_err());
    }

    #[test]
    fn topic_rejects_wildcards() {
        assert!(Topic::parse("a.*.b").is_err());
        assert!(Topic::parse("a.**").is_err());
    }

    #[test]
    fn topic_accepts_well_formed() {
        assert!(Topic::parse("task.request.weather-current_v2").is_ok());
    }

    #[test]
    fn pattern_allows_terminal_multilevel() {
        assert!(TopicPattern::parse("amcp.deadletter.**").is_ok());
        assert!(TopicPattern::parse("**").is_ok());
    }

    #[test]
    fn pattern_rejects_intermediate_multilevel() {
        assert!(TopicPattern::parse("a.**.b").is_err());
    }

    #[test]
    fn pattern_parses_single_wildcard_segments() {
        let pattern = TopicPattern::parse("x.*").unwrap();
        assert_eq!(
            pattern.segments(),
            &[
                PatternSegment::Literal("x".to_string()),
                PatternSegment::Single
            ]
        );
    }
}
