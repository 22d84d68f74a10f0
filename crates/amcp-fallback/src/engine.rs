//! The rule-based fallback engine itself (spec §4.9).

use crate::error::FallbackResult;
use crate::keywords::{extract_keywords, infer_domain_category};
use crate::rule::Rule;
use crate::store;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

/// The minimum category set the engine recognizes even with no learning.
pub const SEED_CATEGORIES: &[(&str, &[&str])] = &[
    (
        "coding",
        &["I can help with that, but I don't have enough context to write the code confidently yet."],
    ),
    (
        "explanation",
        &["Here's a general explanation, though I'd need more detail to be precise."],
    ),
    (
        "assistance",
        &["I'm here to help — could you give me a bit more detail on what you need?"],
    ),
    (
        "question",
        &["That's a good question; I don't have a definitive answer without more context."],
    ),
    (
        "general",
        &["I'm not sure how to respond to that specifically, but I'm happy to help however I can."],
    ),
];

/// Configuration for a fallback engine instance.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub rules_dir: PathBuf,
    pub min_confidence: u8,
    pub max_rules: usize,
    /// Learned rules unused for longer than this are eligible for cleanup.
    pub stale_after: ChronoDuration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            rules_dir: PathBuf::from(".amcp/fallback-rules"),
            min_confidence: 70,
            max_rules: 500,
            stale_after: ChronoDuration::days(90),
        }
    }
}

/// What the engine produced for a given prompt.
#[derive(Debug, Clone)]
pub enum FallbackOutcome {
    /// A specific learned (or seed) rule cleared the confidence threshold.
    RuleMatch { rule_id: String, category: String, confidence: f64, response: String },
    /// No rule cleared the threshold, but a category could still be
    /// inferred; a generic category-appropriate response is returned.
    GenericCategory { category: String, response: String },
    /// Nothing matched at all — should only occur for inputs that defeat
    /// keyword extraction entirely (e.g. empty or all-stopword prompts).
    NoMatch,
}

#[derive(Debug, Default)]
struct Stats {
    attempts: AtomicU64,
    successes: AtomicU64,
    learning_events: AtomicU64,
}

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct FallbackStats {
    pub attempts: u64,
    pub successes: u64,
    pub rule_count: usize,
    pub learning_events: u64,
}

/// Deterministic response generator used when the LLM is unavailable.
///
/// Thread-safe: rule storage is a `DashMap` (concurrent reads, serialized
/// per-key writes, per spec §5's "writes serialized; reads concurrent"
/// requirement for the rule store).
pub struct FallbackEngine {
    rules: DashMap<String, Rule>,
    config: FallbackConfig,
    stats: Stats,
}

impl FallbackEngine {
    /// Construct an engine, seeding the minimum category set and loading
    /// any previously learned rules from `config.rules_dir`.
    pub fn new(config: FallbackConfig) -> FallbackResult<Self> {
        let rules = DashMap::new();
        for (category, templates) in SEED_CATEGORIES {
            let rule = Rule::seed(category, templates);
            rules.insert(rule.id.clone(), rule);
        }
        for rule in store::load_all(&config.rules_dir)? {
            rules.insert(rule.id.clone(), rule);
        }
        info!(rules = rules.len(), dir = %config.rules_dir.display(), "fallback engine initialized");
        Ok(Self { rules, config, stats: Stats::default() })
    }

    /// Match `prompt` against every known rule, returning the best outcome.
    pub fn match_prompt(&self, prompt: &str) -> FallbackOutcome {
        self.stats.attempts.fetch_add(1, Ordering::SeqCst);
        let trimmed = prompt.trim();
        if trimmed.is_empty() {
            return FallbackOutcome::NoMatch;
        }

        let prompt_keywords = extract_keywords(trimmed);
        let mut best: Option<(String, f64)> = None;
        for entry in self.rules.iter() {
            let confidence = entry.value().confidence(trimmed, &prompt_keywords);
            if best.as_ref().map(|(_, c)| confidence > *c).unwrap_or(true) {
                best = Some((entry.key().clone(), confidence));
            }
        }

        let Some((rule_id, confidence)) = best else {
            return FallbackOutcome::NoMatch;
        };

        let Some(mut rule) = self.rules.get_mut(&rule_id) else {
            return FallbackOutcome::NoMatch;
        };

        if confidence >= self.config.min_confidence as f64 {
            rule.usage_count += 1;
            rule.last_used_at = Some(Utc::now());
            let response = rule.template_for(rule.usage_count as usize).to_string();
            let category = rule.category.clone();
            let persisted = rule.clone();
            drop(rule);
            self.stats.successes.fetch_add(1, Ordering::SeqCst);
            if !persisted.is_seed() {
                let _ = store::save(&self.config.rules_dir, &persisted);
            }
            debug!(rule_id, category, confidence, "fallback rule matched");
            FallbackOutcome::RuleMatch { rule_id, category, confidence, response }
        } else {
            let category = rule.category.clone();
            let response = rule.template_for(0).to_string();
            drop(rule);
            self.stats.successes.fetch_add(1, Ordering::SeqCst);
            FallbackOutcome::GenericCategory { category, response }
        }
    }

    /// Learning hook: called with every successful LLM prompt/response
    /// pair so the engine can grow a rule from it.
    pub fn learn(&self, prompt: &str, response: &str) {
        let trimmed_prompt = prompt.trim();
        let trimmed_response = response.trim();
        if trimmed_prompt.is_empty() || trimmed_response.is_empty() {
            return;
        }
        let keywords = extract_keywords(trimmed_prompt);
        if keywords.is_empty() {
            return;
        }
        let category = infer_domain_category(&keywords, "general").to_string();
        // Keywords are alphanumeric-only tokens (see `extract_keywords`), so
        // no regex-special characters can appear and no escaping is needed.
        let pattern = keywords.iter().take(3).cloned().collect::<Vec<_>>().join("|");

        let rule = Rule {
            id: Uuid::new_v4().to_string(),
            category,
            keywords,
            patterns: if pattern.is_empty() { Vec::new() } else { vec![pattern] },
            templates: vec![trimmed_response.to_string()],
            min_confidence: 60,
            usage_count: 0,
            created_at: Utc::now(),
            last_used_at: None,
        };

        self.stats.learning_events.fetch_add(1, Ordering::SeqCst);
        let _ = store::save(&self.config.rules_dir, &rule);
        self.rules.insert(rule.id.clone(), rule);

        if self.rules.len() > self.config.max_rules {
            self.cleanup();
        }
    }

    /// Remove unused, stale learned rules (never removes seeds). Returns
    /// the number of rules removed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let stale_after = self.config.stale_after;
        let is_stale = |rule: &Rule| -> bool {
            if rule.is_seed() {
                return false;
            }
            let reference: DateTime<Utc> = rule.last_used_at.unwrap_or(rule.created_at);
            rule.usage_count == 0 && now.signed_duration_since(reference) > stale_after
        };

        let mut to_remove: Vec<String> = self
            .rules
            .iter()
            .filter(|entry| is_stale(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        // If still over budget after removing stale rules, evict the
        // least-recently-used learned rules until back under the cap.
        if self.rules.len() - to_remove.len() > self.config.max_rules {
            let mut candidates: Vec<(String, DateTime<Utc>)> = self
                .rules
                .iter()
                .filter(|entry| !entry.value().is_seed() && !to_remove.contains(entry.key()))
                .map(|entry| {
                    let reference = entry.value().last_used_at.unwrap_or(entry.value().created_at);
                    (entry.key().clone(), reference)
                })
                .collect();
            candidates.sort_by_key(|(_, reference)| *reference);
            let overflow = (self.rules.len() - to_remove.len()).saturating_sub(self.config.max_rules);
            to_remove.extend(candidates.into_iter().take(overflow).map(|(id, _)| id));
        }

        for rule_id in &to_remove {
            self.rules.remove(rule_id);
            let _ = store::delete(&self.config.rules_dir, rule_id);
        }
        to_remove.len()
    }

    pub fn stats(&self) -> FallbackStats {
        FallbackStats {
            attempts: self.stats.attempts.load(Ordering::SeqCst),
            successes: self.stats.successes.load(Ordering::SeqCst),
            rule_count: self.rules.len(),
            learning_events: self.stats.learning_events.load(Ordering::SeqCst),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (FallbackEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = FallbackConfig { rules_dir: dir.path().to_path_buf(), ..FallbackConfig::default() };
        (FallbackEngine::new(config).unwrap(), dir)
    }

    #[test]
    fn seeds_the_minimum_category_set() {
        let (engine, _dir) = engine();
        assert_eq!(engine.rule_count(), SEED_CATEGORIES.len());
    }

    #[test]
    fn unlearned_prompt_gets_a_generic_category_response() {
        let (engine, _dir) = engine();
        match engine.match_prompt("How does a binary search tree work?") {
            FallbackOutcome::GenericCategory { response, .. } => assert!(!response.is_empty()),
            other => panic!("expected GenericCategory, got {other:?}"),
        }
    }

    #[test]
    fn empty_prompt_is_no_match() {
        let (engine, _dir) = engine();
        assert!(matches!(engine.match_prompt("   "), FallbackOutcome::NoMatch));
    }

    #[test]
    fn learning_then_matching_clears_threshold() {
        let (engine, _dir) = engine();
        engine.learn(
            "What's the weather forecast for Nice today?",
            "It's sunny and 22 degrees in Nice today.",
        );
        match engine.match_prompt("weather forecast Nice") {
            FallbackOutcome::RuleMatch { category, confidence, .. } => {
                assert_eq!(category, "weather");
                assert!(confidence >= 60.0);
            }
            other => panic!("expected RuleMatch, got {other:?}"),
        }
        assert_eq!(engine.stats().learning_events, 1);
    }

    #[test]
    fn cleanup_never_removes_seed_rules() {
        let (engine, _dir) = engine();
        engine.cleanup();
        assert_eq!(engine.rule_count(), SEED_CATEGORIES.len());
    }
}
