//! The orchestrator agent: a distinguished agent that turns a
//! natural-language request into coordinated work across
//! capability-registered agents (spec §4.10).
//!
//! Holds a weak back-reference to its hosting [`Context`] rather than a
//! strong one, per the cyclic-ownership design note: the context
//! exclusively owns the agent, and the agent's reference is a lookup
//! handle that simply stops resolving once the context is gone.

use crate::error::OrchestratorError;
use crate::plan::{self, Plan, Task};
use crate::state::{classify_total_failure, OrchestrationRecord, OrchestrationStatus, TaskAudit, TaskStatus};
use crate::{keyword_router, normalize, prompt};
use amcp_fallback::{FallbackEngine, FallbackOutcome};
use amcp_kernel::{Agent, AgentFactory, Context, CorrelationOutcome, CorrelationTracker};
use amcp_llm::{LlmEngine, LlmParameters, ResponseSource};
use amcp_types::{AgentId, AmcpResult, Capability, CorrelationId, DeliveryOptions, Event, Payload, Topic};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub task_timeout: Duration,
    pub max_tasks: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { task_timeout: Duration::from_secs(30), max_tasks: 16 }
    }
}

struct OrchestratorInner {
    context: Weak<Context>,
    correlations: CorrelationTracker,
    llm: Arc<LlmEngine>,
    fallback: Arc<FallbackEngine>,
    config: OrchestratorConfig,
    records: DashMap<String, OrchestrationRecord>,
}

/// Builds [`OrchestratorAgent`] instances sharing one correlation tracker,
/// LLM engine, and fallback engine per context.
pub struct OrchestratorFactory {
    context: Weak<Context>,
    llm: Arc<LlmEngine>,
    fallback: Arc<FallbackEngine>,
    config: OrchestratorConfig,
}

impl OrchestratorFactory {
    pub fn new(context: Weak<Context>, llm: Arc<LlmEngine>, fallback: Arc<FallbackEngine>, config: OrchestratorConfig) -> Self {
        Self { context, llm, fallback, config }
    }
}

#[async_trait]
impl AgentFactory for OrchestratorFactory {
    async fn create(&self, _init_data: Payload) -> AmcpResult<Arc<dyn Agent>> {
        Ok(Arc::new(OrchestratorAgent {
            inner: Arc::new(OrchestratorInner {
                context: self.context.clone(),
                correlations: CorrelationTracker::new(),
                llm: self.llm.clone(),
                fallback: self.fallback.clone(),
                config: self.config.clone(),
                records: DashMap::new(),
            }),
        }))
    }
}

pub struct OrchestratorAgent {
    inner: Arc<OrchestratorInner>,
}

impl OrchestratorAgent {
    /// Snapshot of a past or in-flight orchestration's audit trail, for
    /// introspection and tests.
    pub fn record(&self, correlation_id: &str) -> Option<OrchestrationRecord> {
        self.inner.records.get(correlation_id).map(|r| r.clone())
    }
}

#[async_trait]
impl Agent for OrchestratorAgent {
    async fn on_activate(&self) -> AmcpResult<Vec<String>> {
        Ok(vec!["orchestration.request.**".to_string(), "task.response.**".to_string()])
    }

    async fn handle_event(&self, event: Event) -> Result<(), String> {
        let topic = event.topic.as_str();
        if topic.starts_with("task.response") {
            if let Some(correlation_id) = event.correlation_id.clone() {
                self.inner.correlations.resolve(&correlation_id, event);
            }
            return Ok(());
        }

        if topic.starts_with("orchestration.request") {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                if let Err(e) = run_orchestration(inner, event).await {
                    warn!(error = %e, "orchestration failed");
                }
            });
            return Ok(());
        }

        Ok(())
    }

    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    /// Request handling only ever spawns and returns; response handling
    /// is a lock-free resolve against the correlation tracker. Neither
    /// needs the context's default one-at-a-time invocation discipline.
    fn concurrent_safe(&self) -> bool {
        true
    }
}

enum TaskOutcome {
    Success { payload: Payload, agent_id: AgentId, latency_ms: u64 },
    Failed(String),
    TimedOut,
}

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

async fn run_orchestration(inner: Arc<OrchestratorInner>, request: Event) -> Result<(), OrchestratorError> {
    let query = request
        .payload
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or_else(|| OrchestratorError::MalformedPlan("orchestration request missing 'query'".to_string()))?
        .to_string();
    let user_context = request.payload.get("userContext").cloned().unwrap_or(serde_json::Value::Null);
    let correlation_id = request.correlation_id.clone().unwrap_or_else(CorrelationId::new);
    let trace_id = new_trace_id();

    let Some(context) = inner.context.upgrade() else {
        return Ok(()); // context torn down mid-flight; nothing left to reply to
    };

    let mut record = OrchestrationRecord {
        correlation_id: correlation_id.to_string(),
        trace_id: trace_id.clone(),
        status: OrchestrationStatus::Planning,
        tasks: Vec::new(),
        started_at: chrono::Utc::now(),
    };
    inner.records.insert(correlation_id.to_string(), record.clone());

    let mut plan = analyze_intent(&inner, &query, &user_context).await;
    if plan.tasks.len() > inner.config.max_tasks {
        warn!(dropped = plan.tasks.len() - inner.config.max_tasks, "plan exceeded max task count, truncating");
        plan.tasks.truncate(inner.config.max_tasks);
    }
    for task in &mut plan.tasks {
        normalize::normalize_parameters(&mut task.parameters);
    }

    record.status = OrchestrationStatus::Dispatching;
    record.tasks = plan.tasks.iter().map(|t| TaskAudit::pending(t.index, t.capability.clone())).collect();
    inner.records.insert(correlation_id.to_string(), record.clone());

    let mut completed: BTreeMap<usize, Payload> = BTreeMap::new();
    let mut dispatched: std::collections::HashSet<usize> = std::collections::HashSet::new();

    loop {
        let ready: Vec<Task> = plan
            .tasks
            .iter()
            .filter(|t| !dispatched.contains(&t.index) && t.depends_on.iter().all(|d| completed.contains_key(d)))
            .cloned()
            .collect();
        if ready.is_empty() {
            break;
        }

        let dispatch_futures = ready.iter().map(|task| {
            dispatch_one(inner.clone(), context.clone(), correlation_id.clone(), trace_id.clone(), task.clone(), user_context.clone())
        });
        let outcomes = futures::future::join_all(dispatch_futures).await;

        for (task, outcome) in ready.iter().zip(outcomes) {
            dispatched.insert(task.index);
            match outcome {
                TaskOutcome::Success { payload, agent_id, latency_ms } => {
                    completed.insert(task.index, payload);
                    record.tasks[task.index].status = TaskStatus::Succeeded;
                    record.tasks[task.index].agent_id = Some(agent_id);
                    record.tasks[task.index].latency_ms = Some(latency_ms);
                }
                TaskOutcome::Failed(reason) => {
                    record.tasks[task.index].status = TaskStatus::Failed(reason);
                }
                TaskOutcome::TimedOut => {
                    record.tasks[task.index].status = TaskStatus::TimedOut;
                }
            }
        }
        record.status = OrchestrationStatus::Collecting;
        inner.records.insert(correlation_id.to_string(), record.clone());
    }

    for task in &plan.tasks {
        if !dispatched.contains(&task.index) {
            record.tasks[task.index].status = TaskStatus::Cancelled;
        }
    }

    record.status = OrchestrationStatus::Synthesizing;
    inner.records.insert(correlation_id.to_string(), record.clone());

    if completed.is_empty() {
        let category = classify_total_failure(&record.tasks);
        let message = inner.fallback.match_prompt(&query);
        let user_message = match message {
            FallbackOutcome::RuleMatch { response, .. } | FallbackOutcome::GenericCategory { response, .. } => response,
            FallbackOutcome::NoMatch => "unable to complete the request".to_string(),
        };
        record.status = OrchestrationStatus::Failed;
        inner.records.insert(correlation_id.to_string(), record.clone());
        publish_error_reply(&context, &correlation_id, &trace_id, category.as_str(), &user_message).await;
        return Ok(());
    }

    let (synthesized, synthesis_source) = synthesize(&inner, &query, &completed).await;
    let partial = completed.len() < plan.tasks.len();
    record.status = if partial { OrchestrationStatus::Partial } else { OrchestrationStatus::Done };
    inner.records.insert(correlation_id.to_string(), record.clone());

    let from_fallback = synthesis_source == ResponseSource::Fallback;
    publish_success_reply(&context, &correlation_id, &trace_id, &synthesized, &record.tasks, partial, from_fallback).await;
    Ok(())
}

async fn analyze_intent(inner: &Arc<OrchestratorInner>, query: &str, user_context: &serde_json::Value) -> Plan {
    let prompt_text = prompt::task_planning(query, &user_context.to_string());
    let params = LlmParameters::new();
    match inner.llm.generate(&prompt_text, &params).await {
        Ok(response) => match plan::parse_llm_plan(&response.text) {
            Ok(parsed) => parsed,
            Err(e) => {
                info!(error = %e, "plan response malformed, falling back to keyword router");
                keyword_router::route(query)
            }
        },
        Err(e) => {
            info!(error = %e, "intent analysis unavailable, falling back to keyword router");
            keyword_router::route(query)
        }
    }
}

async fn dispatch_one(
    inner: Arc<OrchestratorInner>,
    context: Arc<Context>,
    orchestration_correlation_id: CorrelationId,
    trace_id: String,
    task: Task,
    user_context: serde_json::Value,
) -> TaskOutcome {
    let capability = Capability::new(&task.capability);
    let candidates = context.registry().find_agents_by_capability(&capability);
    let Some(agent_id) = candidates.into_iter().next() else {
        return TaskOutcome::Failed(format!("no agent advertising capability '{}'", task.capability));
    };

    let child_correlation_id = orchestration_correlation_id.derive(&format!("task-{}", task.index));
    let span_id = new_span_id();
    let topic = match Topic::parse(&format!("task.request.{}", task.capability)) {
        Ok(topic) => topic,
        Err(e) => return TaskOutcome::Failed(format!("invalid capability topic: {e}")),
    };

    let mut payload = task.parameters.clone();
    payload.insert("userContext".to_string(), user_context);
    let wait = inner.correlations.register(child_correlation_id.clone(), inner.config.task_timeout);

    let event = Event::new(topic, Payload::Map(payload), None)
        .with_correlation(child_correlation_id)
        .with_delivery_options(DeliveryOptions::reliable())
        .with_metadata("amcptraceid", trace_id)
        .with_metadata("amcpspanid", span_id);

    let start = Instant::now();
    if let Err(e) = context.publish(event, None).await {
        return TaskOutcome::Failed(format!("dispatch failed: {e}"));
    }

    match wait.await {
        CorrelationOutcome::Response(response) => {
            let succeeded = response.payload.get("success").and_then(|v| v.as_bool()).unwrap_or(true);
            if succeeded {
                TaskOutcome::Success {
                    payload: response.payload,
                    agent_id,
                    latency_ms: start.elapsed().as_millis() as u64,
                }
            } else {
                let reason = response
                    .payload
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("agent reported failure")
                    .to_string();
                TaskOutcome::Failed(reason)
            }
        }
        CorrelationOutcome::Timeout => TaskOutcome::TimedOut,
        CorrelationOutcome::Cancelled => TaskOutcome::Failed("cancelled".to_string()),
    }
}

/// Call the `response_synthesis` template over the accumulated structured
/// data; on LLM failure (or a genuinely empty response), fall back to
/// joining each task's own `formattedResponse` field. Returns the synthesis
/// text alongside where it actually came from, so the caller can stamp the
/// reply's `source` metadata per spec E2E scenario 2.
async fn synthesize(inner: &Arc<OrchestratorInner>, query: &str, completed: &BTreeMap<usize, Payload>) -> (String, ResponseSource) {
    let results_json: Vec<serde_json::Value> = completed
        .values()
        .map(|payload| serde_json::to_value(payload).unwrap_or(serde_json::Value::Null))
        .collect();
    let results_text = serde_json::to_string(&results_json).unwrap_or_default();
    let prompt_text = prompt::response_synthesis(query, &results_text);
    let params = LlmParameters::new();

    match inner.llm.generate(&prompt_text, &params).await {
        Ok(response) if !response.text.trim().is_empty() => (response.text, response.source),
        _ => {
            let joined = completed
                .values()
                .filter_map(|payload| payload.get("formattedResponse").and_then(|v| v.as_str()))
                .collect::<Vec<_>>()
                .join(" ");
            (joined, ResponseSource::Fallback)
        }
    }
}

async fn publish_success_reply(
    context: &Arc<Context>,
    correlation_id: &CorrelationId,
    trace_id: &str,
    answer: &str,
    tasks: &[TaskAudit],
    partial: bool,
    from_fallback: bool,
) {
    let audit: Vec<serde_json::Value> = tasks
        .iter()
        .map(|t| {
            serde_json::json!({
                "capability": t.capability,
                "agentId": t.agent_id.as_ref().map(|a| a.to_string()),
                "status": format!("{:?}", t.status),
                "latencyMs": t.latency_ms,
            })
        })
        .collect();
    let payload = Payload::map([
        ("answer".to_string(), serde_json::json!(answer)),
        ("status".to_string(), serde_json::json!(if partial { "partial" } else { "success" })),
        ("audit".to_string(), serde_json::Value::Array(audit)),
    ]);
    let topic = match Topic::parse(&format!("orchestration.response.{correlation_id}")) {
        Ok(topic) => topic,
        Err(e) => {
            warn!(error = %e, "could not build reply topic");
            return;
        }
    };
    let mut event = Event::new(topic, payload, None)
        .with_correlation(correlation_id.clone())
        .with_metadata("amcptraceid", trace_id.to_string());
    if from_fallback {
        event = event.with_metadata("source", "fallback");
    }
    if let Err(e) = context.publish(event, None).await {
        warn!(error = %e, "failed to publish orchestration reply");
    }
}

async fn publish_error_reply(context: &Arc<Context>, correlation_id: &CorrelationId, trace_id: &str, category: &str, message: &str) {
    let payload = Payload::map([
        ("status".to_string(), serde_json::json!("failed")),
        ("category".to_string(), serde_json::json!(category)),
        ("message".to_string(), serde_json::json!(message)),
    ]);
    let topic = match Topic::parse(&format!("orchestration.response.{correlation_id}")) {
        Ok(topic) => topic,
        Err(e) => {
            warn!(error = %e, "could not build error reply topic");
            return;
        }
    };
    let event = Event::new(topic, payload, None)
        .with_correlation(correlation_id.clone())
        .with_metadata("amcptraceid", trace_id.to_string());
    if let Err(e) = context.publish(event, None).await {
        warn!(error = %e, "failed to publish orchestration error reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amcp_broker::{BrokerConfig, EventBroker, EventHandler};
    use amcp_fallback::FallbackConfig;
    use amcp_kernel::CapabilityRegistry;
    use amcp_llm::{LlmEngineConfig, ModelTimeouts, ResponseCache, RetryConfig};
    use tokio::sync::Mutex as AsyncMutex;

    struct AlwaysFailsConnector;

    #[async_trait]
    impl amcp_llm::LlmConnector for AlwaysFailsConnector {
        async fn generate(&self, _prompt: &str, _model_id: &str, _parameters: &LlmParameters) -> AmcpResult<String> {
            Err(amcp_types::AmcpError::LLMUnavailable("backend unreachable in test".to_string()))
        }

        async fn is_healthy(&self) -> bool {
            false
        }
    }

    /// Stands in for a downstream specialist agent without going through
    /// full activation: it only needs to answer a `task.request.*` with a
    /// `task.response.<correlationId>` event.
    struct EchoResponder {
        context: Weak<Context>,
    }

    #[async_trait]
    impl EventHandler for EchoResponder {
        async fn handle(&self, event: Event) -> Result<(), String> {
            let Some(context) = self.context.upgrade() else { return Ok(()) };
            let correlation_id = event.correlation_id.clone().expect("dispatch always sets a correlation id");
            let reply_topic = Topic::parse(&format!("task.response.{correlation_id}")).map_err(|e| e.to_string())?;
            let payload = Payload::map([
                ("success".to_string(), serde_json::json!(true)),
                ("formattedResponse".to_string(), serde_json::json!("42 degrees and sunny")),
            ]);
            let reply = Event::new(reply_topic, payload, None).with_correlation(correlation_id);
            context.publish(reply, None).await.map_err(|e| e.to_string())
        }
    }

    struct Capture(Arc<AsyncMutex<Option<Event>>>);

    #[async_trait]
    impl EventHandler for Capture {
        async fn handle(&self, event: Event) -> Result<(), String> {
            *self.0.lock().await = Some(event);
            Ok(())
        }
    }

    fn test_llm_engine(connector: Arc<dyn amcp_llm::LlmConnector>) -> Arc<LlmEngine> {
        Arc::new(LlmEngine::new(
            connector,
            ResponseCache::in_memory(10, Duration::from_secs(60)),
            None,
            LlmEngineConfig {
                model_id: "test-model".to_string(),
                timeouts: Arc::new(ModelTimeouts::new(Duration::from_millis(100))),
                retry: RetryConfig { max_attempts: 1, min_delay_ms: 1, max_delay_ms: 1, jitter: 0.0 },
                circuit_breaker: amcp_broker::CircuitBreakerConfig::default(),
            },
        ))
    }

    #[tokio::test]
    async fn full_orchestration_round_trip_with_keyword_routed_single_task() {
        let broker = Arc::new(EventBroker::new(BrokerConfig::default()));
        let registry = Arc::new(CapabilityRegistry::new(Duration::from_secs(90)));
        let context = Arc::new(Context::new("ctx-test", broker, registry.clone()));

        registry.register(
            AgentId::new("echo-agent"),
            "echo-agent".to_string(),
            vec![Capability::new("chat.respond")],
            "ctx-test".to_string(),
            Default::default(),
        );

        let responder = Arc::new(EchoResponder { context: Arc::downgrade(&context) });
        context
            .broker()
            .subscribe("task.request.chat.respond", AgentId::new("echo-agent"), responder, DeliveryOptions::reliable())
            .unwrap();

        let captured = Arc::new(AsyncMutex::new(None));
        context
            .broker()
            .subscribe(
                "orchestration.response.**",
                AgentId::new("test-observer"),
                Arc::new(Capture(captured.clone())),
                DeliveryOptions::default(),
            )
            .unwrap();

        let llm = test_llm_engine(Arc::new(AlwaysFailsConnector));
        let rules_dir = tempfile::tempdir().unwrap();
        let fallback = Arc::new(
            amcp_fallback::FallbackEngine::new(FallbackConfig { rules_dir: rules_dir.path().to_path_buf(), ..Default::default() })
                .unwrap(),
        );

        let factory = OrchestratorFactory::new(
            Arc::downgrade(&context),
            llm,
            fallback,
            OrchestratorConfig { task_timeout: Duration::from_secs(2), max_tasks: 8 },
        );
        context.register_factory("orchestrator", Arc::new(factory));
        let orchestrator_id = context.create_agent("orchestrator", Payload::Scalar(serde_json::Value::Null)).await.unwrap();
        context.activate(&orchestrator_id).await.unwrap();

        let request = Event::new(
            Topic::parse("orchestration.request.chat").unwrap(),
            Payload::map([("query".to_string(), serde_json::json!("tell me something interesting"))]),
            None,
        )
        .with_correlation(CorrelationId::from("req-1"));
        context.publish(request, None).await.unwrap();

        let mut observed = None;
        for _ in 0..100 {
            if let Some(event) = captured.lock().await.clone() {
                observed = Some(event);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let event = observed.expect("expected an orchestration response within the polling window");
        assert_eq!(event.payload.get("status").unwrap(), "success");
        let answer = event.payload.get("answer").unwrap().as_str().unwrap();
        assert!(answer.contains("42 degrees and sunny"));
        assert_eq!(event.metadata.get("source").map(String::as_str), Some("fallback"));
    }

    #[tokio::test]
    async fn total_failure_when_no_agent_advertises_the_capability() {
        let broker = Arc::new(EventBroker::new(BrokerConfig::default()));
        let registry = Arc::new(CapabilityRegistry::new(Duration::from_secs(90)));
        let context = Arc::new(Context::new("ctx-test", broker, registry));

        let captured = Arc::new(AsyncMutex::new(None));
        context
            .broker()
            .subscribe(
                "orchestration.response.**",
                AgentId::new("test-observer"),
                Arc::new(Capture(captured.clone())),
                DeliveryOptions::default(),
            )
            .unwrap();

        let llm = test_llm_engine(Arc::new(AlwaysFailsConnector));
        let rules_dir = tempfile::tempdir().unwrap();
        let fallback = Arc::new(
            amcp_fallback::FallbackEngine::new(FallbackConfig { rules_dir: rules_dir.path().to_path_buf(), ..Default::default() })
                .unwrap(),
        );
        let factory = OrchestratorFactory::new(
            Arc::downgrade(&context),
            llm,
            fallback,
            OrchestratorConfig { task_timeout: Duration::from_millis(200), max_tasks: 8 },
        );
        context.register_factory("orchestrator", Arc::new(factory));
        let orchestrator_id = context.create_agent("orchestrator", Payload::Scalar(serde_json::Value::Null)).await.unwrap();
        context.activate(&orchestrator_id).await.unwrap();

        let request = Event::new(
            Topic::parse("orchestration.request.chat").unwrap(),
            Payload::map([("query".to_string(), serde_json::json!("tell me something interesting"))]),
            None,
        )
        .with_correlation(CorrelationId::from("req-2"));
        context.publish(request, None).await.unwrap();

        let mut observed = None;
        for _ in 0..100 {
            if let Some(event) = captured.lock().await.clone() {
                observed = Some(event);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let event = observed.expect("expected an orchestration error response within the polling window");
        assert_eq!(event.payload.get("status").unwrap(), "failed");
        assert_eq!(event.payload.get("category").unwrap(), "no-agent");
    }
}
