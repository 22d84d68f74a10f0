//! Prompt templates for the two LLM calls the orchestrator makes.
//!
//! Templates use `{{var_name}}` placeholders, expanded the same way the
//! workflow engine expands step templates: a plain string replace per
//! variable, no templating engine dependency.

use std::collections::BTreeMap;

const TASK_PLANNING_TEMPLATE: &str = r#"You are a task planner for an agent mesh. Given a user request, produce a JSON plan.

User request: {{query}}
User context: {{user_context}}

Respond with ONLY a JSON object of the form:
{"tasks": [{"capability": "<capability-name>", "parameters": {}, "dependsOn": [<task indices this depends on>]}]}

Order tasks so that any task's dependencies appear earlier in the list."#;

const RESPONSE_SYNTHESIS_TEMPLATE: &str = r#"You are summarizing results from specialist agents for the user.

Original request: {{query}}
Collected results: {{results}}

Write a single, concise, well-formatted natural-language response that directly answers the original request using the collected results."#;

/// Replace `{{var_name}}` references in `template` with values from `vars`.
pub fn expand_variables(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{{{key}}}}}"), value);
    }
    result
}

pub fn task_planning(query: &str, user_context: &str) -> String {
    let mut vars = BTreeMap::new();
    vars.insert("query".to_string(), query.to_string());
    vars.insert("user_context".to_string(), user_context.to_string());
    expand_variables(TASK_PLANNING_TEMPLATE, &vars)
}

pub fn response_synthesis(query: &str, results: &str) -> String {
    let mut vars = BTreeMap::new();
    vars.insert("query".to_string(), query.to_string());
    vars.insert("results".to_string(), results.to_string());
    expand_variables(RESPONSE_SYNTHESIS_TEMPLATE, &vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_planning_embeds_query_and_context() {
        let prompt = task_planning("what's the weather in Nice?", r#"{"locale":"fr-FR"}"#);
        assert!(prompt.contains("what's the weather in Nice?"));
        assert!(prompt.contains(r#"{"locale":"fr-FR"}"#));
        assert!(!prompt.contains("{{query}}"));
    }

    #[test]
    fn response_synthesis_embeds_results() {
        let prompt = response_synthesis("weather?", r#"[{"temp":18}]"#);
        assert!(prompt.contains(r#"[{"temp":18}]"#));
        assert!(!prompt.contains("{{results}}"));
    }
}
