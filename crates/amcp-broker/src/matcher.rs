//! Hierarchical topic matching (spec §4.1).
//!
//! `*` matches exactly one segment; `**` matches zero or more segments and
//! is only legal as a pattern's terminal segment (already enforced by
//! `TopicPattern::parse`). Matching itself is a total function over
//! well-formed `Topic`/`TopicPattern` values — the only way to observe
//! `InvalidTopic` is by feeding it raw, unparsed strings via `matches_str`.

use amcp_types::{AmcpError, AmcpResult, Topic, TopicPattern};
use amcp_types::topic::PatternSegment;

/// Match a parsed topic against a parsed pattern.
///
/// `matches(t, "**")` is true for every well-formed topic, since a bare
/// `**` parses to a single `MultiLevel` segment that consumes the rest.
pub fn matches(topic: &Topic, pattern: &TopicPattern) -> bool {
    match_segments(topic.segments().collect::<Vec<_>>().as_slice(), pattern.segments())
}

fn match_segments(topic_segments: &[&str], pattern_segments: &[PatternSegment]) -> bool {
    match pattern_segments.first() {
        None => topic_segments.is_empty(),
        Some(PatternSegment::MultiLevel) => true, // terminal by construction
        Some(PatternSegment::Single) => {
            !topic_segments.is_empty() && match_segments(&topic_segments[1..], &pattern_segments[1..])
        }
        Some(PatternSegment::Literal(literal)) => {
            !topic_segments.is_empty()
                && topic_segments[0] == literal
                && match_segments(&topic_segments[1..], &pattern_segments[1..])
        }
    }
}

/// Parse both sides and match, surfacing `InvalidTopic` for malformed input
/// rather than panicking — the contract required of the core matcher.
pub fn matches_str(topic: &str, pattern: &str) -> AmcpResult<bool> {
    let topic = Topic::parse(topic)?;
    let pattern = TopicPattern::parse(pattern)?;
    Ok(matches(&topic, &pattern))
}

/// Validate a raw pattern string without needing a topic to match against —
/// used by `subscribe` to reject malformed patterns up front.
pub fn validate_pattern(pattern: &str) -> Result<TopicPattern, AmcpError> {
    TopicPattern::parse(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(s: &str) -> Topic {
        Topic::parse(s).unwrap()
    }
    fn pattern(s: &str) -> TopicPattern {
        TopicPattern::parse(s).unwrap()
    }

    #[test]
    fn bare_multilevel_matches_every_topic() {
        assert!(matches(&topic("a.b.c"), &pattern("**")));
        assert!(matches(&topic("a"), &pattern("**")));
    }

    #[test]
    fn single_wildcard_matches_exactly_one_segment() {
        assert!(matches(&topic("x.y"), &pattern("x.*")));
        assert!(!matches(&topic("x.y.z"), &pattern("x.*")));
        assert!(!matches(&topic("x"), &pattern("x.*")));
    }

    #[test]
    fn terminal_multilevel_matches_suffix_of_any_length() {
        assert!(matches(&topic("amcp.deadletter.task.request.weather"), &pattern("amcp.deadletter.**")));
        assert!(matches(&topic("amcp.deadletter"), &pattern("amcp.deadletter.**")));
        assert!(!matches(&topic("amcp.other"), &pattern("amcp.deadletter.**")));
    }

    #[test]
    fn literal_mismatch_fails() {
        assert!(!matches(&topic("task.request.stock"), &pattern("task.request.weather")));
    }

    #[test]
    fn malformed_input_is_invalid_topic_not_panic() {
        assert!(matches_str("a..b", "**").is_err());
        assert!(matches_str("a.b", "a.**.b").is_err());
    }

    #[test]
    fn totality_over_well_formed_pairs() {
        for t in ["a", "a.b", "a.b.c", "task.request.weather-current"] {
            for p in ["**", "*", "a.*", "a.**", "task.*.weather-current"] {
                // Must terminate and return a bool; never panics.
                let _: bool = matches_str(t, p).unwrap_or(false);
            }
        }
    }
}
