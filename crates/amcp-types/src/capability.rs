//! Advertised agent capabilities.
//!
//! Distinct from a security permission grant: a capability here is a
//! published service name (`"weather.current"`) that the capability
//! registry indexes so the orchestrator can discover which agents can
//! handle a task. Matching a capability name against a query pattern still
//! follows the same glob shape as the rest of the corpus, so a registry
//! can be queried with `*`-style wildcards even though capability names
//! themselves never contain one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A capability an agent advertises to the registry, e.g. `weather.current`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    /// Wrap a capability name. Capability names are not validated against
    /// the topic grammar — they are registry keys, not routable topics.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The capability name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Capability {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Capability {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Matches a capability query pattern against an advertised capability
/// name. `*` matches any single run of characters within a segment-free
/// string; a bare `*` matches everything.
pub fn capability_matches(pattern: &str, capability: &Capability) -> bool {
    glob_matches(pattern, capability.as_str())
}

fn glob_matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" || pattern == value {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return value.ends_with(suffix);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return value.starts_with(prefix);
    }
    if let Some(star_pos) = pattern.find('*') {
        let prefix = &pattern[..star_pos];
        let suffix = &pattern[star_pos + 1..];
        return value.starts_with(prefix)
            && value.ends_with(suffix)
            && value.len() >= prefix.len() + suffix.len();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(capability_matches(
            "weather.current",
            &Capability::new("weather.current")
        ));
    }

    #[test]
    fn star_matches_everything() {
        assert!(capability_matches("*", &Capability::new("stock.quote")));
    }

    #[test]
    fn prefix_wildcard() {
        assert!(capability_matches("weather.*", &Capability::new("weather.current")));
        assert!(!capability_matches("weather.*", &Capability::new("stock.quote")));
    }

    #[test]
    fn non_matching_pattern_rejected() {
        assert!(!capability_matches("weather.current", &Capability::new("weather.forecast")));
    }
}
