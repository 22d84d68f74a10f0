//! Rule persistence: one self-describing JSON record per rule id in a
//! configurable directory (spec §6.4 — deliberately plain files rather
//! than a database, since rule records are meant to be individually
//! inspectable and editable).

use crate::error::{FallbackError, FallbackResult};
use crate::rule::Rule;
use amcp_types::AmcpError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

fn io_err(e: std::io::Error) -> FallbackError {
    FallbackError::Core(AmcpError::Io(e))
}

fn record_path(dir: &Path, rule_id: &str) -> PathBuf {
    // Rule ids are either UUIDs or `seed.<category>`; neither contains path
    // separators, but guard against a malformed id reaching the filesystem.
    let safe = rule_id.replace(['/', '\\'], "_");
    dir.join(format!("{safe}.json"))
}

/// Write `rule` to its record file, creating the directory if needed.
pub fn save(dir: &Path, rule: &Rule) -> FallbackResult<()> {
    std::fs::create_dir_all(dir).map_err(io_err)?;
    let path = record_path(dir, &rule.id);
    let json = serde_json::to_string_pretty(rule)
        .map_err(|e| FallbackError::MalformedRecord(rule.id.clone(), e.to_string()))?;
    std::fs::write(&path, json).map_err(io_err)?;
    Ok(())
}

/// Remove a rule's record file, if present.
pub fn delete(dir: &Path, rule_id: &str) -> FallbackResult<()> {
    let path = record_path(dir, rule_id);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(e)),
    }
}

/// Load every well-formed rule record from `dir`. Malformed records are
/// logged and skipped rather than aborting the whole load.
pub fn load_all(dir: &Path) -> FallbackResult<Vec<Rule>> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "rule store directory does not exist yet");
        return Ok(Vec::new());
    }
    let mut rules = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = std::fs::read_to_string(&path).map_err(io_err)?;
        match serde_json::from_str::<Rule>(&contents) {
            Ok(rule) => rules.push(rule),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed rule record"),
        }
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_rule_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut rule = Rule::seed("general", &["hi"]);
        rule.id = "r-1".to_string();
        save(dir.path(), &rule).unwrap();

        let loaded = load_all(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "r-1");
    }

    #[test]
    fn missing_directory_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(load_all(&missing).unwrap().is_empty());
    }

    #[test]
    fn malformed_record_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        assert!(load_all(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        delete(dir.path(), "nonexistent").unwrap();
    }
}
