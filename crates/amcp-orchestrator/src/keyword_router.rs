//! Keyword-based planning fallback, used when intent analysis cannot
//! reach the LLM (spec §4.10 step 1): maps a handful of domain keywords
//! straight to a single-task plan instead of a structured decomposition.

use crate::plan::Plan;
use amcp_fallback::keywords::extract_keywords;
use serde_json::json;

const CAPABILITY_HINTS: &[(&str, &[&str])] = &[
    ("weather.lookup", &["weather", "forecast", "temperature", "rain", "climate"]),
    ("stock.lookup", &["stock", "share", "ticker", "market", "price"]),
    ("travel.search", &["flight", "travel", "trip", "hotel", "itinerary"]),
    ("quote.lookup", &["quote", "quotation", "saying"]),
];

const DEFAULT_CAPABILITY: &str = "chat.respond";

/// Produce a trivial single-task plan by matching `query` against a small
/// keyword table, falling back to a generic chat capability.
pub fn route(query: &str) -> Plan {
    let keywords = extract_keywords(query);
    let capability = CAPABILITY_HINTS
        .iter()
        .find(|(_, hints)| hints.iter().any(|hint| keywords.contains(*hint)))
        .map(|(capability, _)| *capability)
        .unwrap_or(DEFAULT_CAPABILITY);

    let mut parameters = std::collections::BTreeMap::new();
    parameters.insert("query".to_string(), json!(query));
    Plan::single(capability, parameters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_weather_queries() {
        let plan = route("what's the weather like in Nice tomorrow?");
        assert_eq!(plan.tasks[0].capability, "weather.lookup");
    }

    #[test]
    fn routes_stock_queries() {
        let plan = route("what's the current stock price for ACME?");
        assert_eq!(plan.tasks[0].capability, "stock.lookup");
    }

    #[test]
    fn falls_back_to_chat_for_unmatched_queries() {
        let plan = route("tell me something interesting");
        assert_eq!(plan.tasks[0].capability, "chat.respond");
    }
}
