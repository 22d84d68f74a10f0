//! The rule model and per-rule confidence scoring (spec §4.9).

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single deterministic response rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub category: String,
    pub keywords: BTreeSet<String>,
    /// Regex patterns; a match against the raw prompt boosts confidence
    /// beyond plain keyword overlap.
    pub patterns: Vec<String>,
    pub templates: Vec<String>,
    pub min_confidence: u8,
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Rule {
    /// A hand-authored seed rule for one of the minimum categories, always
    /// present regardless of learning, with no keyword requirement — it
    /// matches any prompt at low confidence so a category is always
    /// selectable even before anything has been learned.
    pub fn seed(category: &str, templates: &[&str]) -> Self {
        Self {
            id: format!("seed.{category}"),
            category: category.to_string(),
            keywords: BTreeSet::new(),
            patterns: Vec::new(),
            templates: templates.iter().map(|s| s.to_string()).collect(),
            min_confidence: 0,
            usage_count: 0,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    pub fn is_seed(&self) -> bool {
        self.id.starts_with("seed.")
    }

    /// Keyword-overlap score (0-100) against `prompt_keywords`, boosted if
    /// any of this rule's regex patterns match `prompt`.
    pub fn confidence(&self, prompt: &str, prompt_keywords: &BTreeSet<String>) -> f64 {
        let overlap_score = if self.keywords.is_empty() {
            0.0
        } else {
            let overlap = self.keywords.intersection(prompt_keywords).count();
            (overlap as f64 / self.keywords.len() as f64) * 100.0
        };

        let pattern_boost = if self.patterns.iter().any(|p| pattern_matches(p, prompt)) {
            20.0
        } else {
            0.0
        };

        (overlap_score + pattern_boost).min(100.0)
    }

    pub fn template_for(&self, seed_index: usize) -> &str {
        if self.templates.is_empty() {
            return "";
        }
        &self.templates[seed_index % self.templates.len()]
    }
}

fn pattern_matches(pattern: &str, prompt: &str) -> bool {
    Regex::new(pattern)
        .map(|re| re.is_match(prompt))
        .unwrap_or(false)
}
