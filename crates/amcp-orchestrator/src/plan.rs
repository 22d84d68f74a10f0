//! The structured task plan produced by intent analysis (spec §4.10 step 1),
//! either from the LLM's JSON response or the keyword-router fallback.

use crate::error::{OrchestratorError, OrchestratorResult};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Task {
    pub index: usize,
    pub capability: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub depends_on: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn single(capability: impl Into<String>, parameters: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            tasks: vec![Task { index: 0, capability: capability.into(), parameters, depends_on: Vec::new() }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    capability: String,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default, rename = "dependsOn")]
    depends_on: Vec<usize>,
}

/// Parse an LLM plan response, tolerating a response wrapped in a fenced
/// code block (a common model habit even when told to respond with only
/// JSON).
pub fn parse_llm_plan(text: &str) -> OrchestratorResult<Plan> {
    let json_slice = extract_json_object(text)
        .ok_or_else(|| OrchestratorError::MalformedPlan("no JSON object found in response".to_string()))?;
    let raw: RawPlan = serde_json::from_str(json_slice)
        .map_err(|e| OrchestratorError::MalformedPlan(format!("invalid plan JSON: {e}")))?;
    if raw.tasks.is_empty() {
        return Err(OrchestratorError::MalformedPlan("plan has no tasks".to_string()));
    }
    let tasks = raw
        .tasks
        .into_iter()
        .enumerate()
        .map(|(index, raw_task)| Task {
            index,
            capability: raw_task.capability,
            parameters: raw_task.parameters,
            depends_on: raw_task.depends_on,
        })
        .collect();
    Ok(Plan { tasks })
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_plan() {
        let text = r#"{"tasks": [{"capability": "weather.lookup", "parameters": {"location": "Nice"}, "dependsOn": []}]}"#;
        let plan = parse_llm_plan(text).unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].capability, "weather.lookup");
    }

    #[test]
    fn parses_a_plan_wrapped_in_a_code_fence() {
        let text = "Sure, here's the plan:\n```json\n{\"tasks\": [{\"capability\": \"stock.lookup\"}]}\n```";
        let plan = parse_llm_plan(text).unwrap();
        assert_eq!(plan.tasks[0].capability, "stock.lookup");
    }

    #[test]
    fn rejects_a_plan_with_no_tasks() {
        let text = r#"{"tasks": []}"#;
        assert!(parse_llm_plan(text).is_err());
    }

    #[test]
    fn rejects_non_json_text() {
        assert!(parse_llm_plan("I cannot help with that").is_err());
    }

    #[test]
    fn multi_task_plan_preserves_dependency_indices() {
        let text = r#"{"tasks": [
            {"capability": "travel.search", "parameters": {}},
            {"capability": "weather.lookup", "parameters": {}, "dependsOn": [0]}
        ]}"#;
        let plan = parse_llm_plan(text).unwrap();
        assert_eq!(plan.tasks[1].depends_on, vec![0]);
        assert_eq!(plan.tasks[1].index, 1);
    }
}
