//! Director: intent routing, fan-out dispatch, and timeout-bounded
//! response aggregation.
//!
//! The Director is a distinguished agent runtime. It discovers live agents
//! through their TTL'd liveness records, routes each intent to a candidate
//! set, fans a command out under one shared correlation id, collects the
//! replies that arrive on its own inbound channel, and merges them into a
//! single structured result.

pub mod routing;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::config::{DirectorSettings, Settings};
use crate::error::Result;
use crate::protocol::{agent_from_health_key, Envelope, MessageKind, Priority, HEALTH_PATTERN};
use crate::runtime::{AgentHandle, AgentRuntime, AgentState, HealthRecord, MessageHandler};
use crate::synthesis::Synthesizer;
use crate::transport::Transport;

pub use routing::RoutingTable;

/// Well-known agent name the Director registers under.
pub const DIRECTOR_NAME: &str = "Director";

/// Recognized user intent handed to the Director by the front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_confidence() -> f64 {
    0.5
}

impl Intent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            confidence: default_confidence(),
            extra: Map::new(),
        }
    }
}

/// Structured result every orchestration request resolves to.
///
/// Callers never see a raw protocol error: routing misses, timeouts, and
/// synthesis failures all land here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub success: bool,
    pub message: String,
    pub intent: Intent,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Orchestrating agent. Cheap to clone; clones share one runtime.
#[derive(Clone)]
pub struct Director {
    inner: Arc<DirectorInner>,
}

struct DirectorInner {
    runtime: AgentRuntime,
    routing: RoutingTable,
    settings: DirectorSettings,
    /// Correlation table: fan-out session id -> responses collected so far.
    /// Entries live only between fan-out and the end of collection.
    pending: Mutex<HashMap<String, Vec<Envelope>>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    handlers_registered: AtomicBool,
}

impl Director {
    /// Director with the default assistant routing table and no synthesizer.
    pub fn new(transport: Arc<dyn Transport>, settings: &Settings) -> Self {
        Self::with_components(transport, settings, RoutingTable::default(), None)
    }

    pub fn with_components(
        transport: Arc<dyn Transport>,
        settings: &Settings,
        routing: RoutingTable,
        synthesizer: Option<Arc<dyn Synthesizer>>,
    ) -> Self {
        let runtime = AgentRuntime::new(
            DIRECTOR_NAME,
            "orchestrator",
            transport,
            settings.heartbeat.clone(),
        );
        Self {
            inner: Arc::new(DirectorInner {
                runtime,
                routing,
                settings: settings.director.clone(),
                pending: Mutex::new(HashMap::new()),
                synthesizer,
                handlers_registered: AtomicBool::new(false),
            }),
        }
    }

    /// Register the response-collection and orchestrate handlers, then start
    /// the underlying runtime.
    pub async fn start(&self) -> Result<()> {
        if !self.inner.handlers_registered.swap(true, Ordering::SeqCst) {
            let weak = Arc::downgrade(&self.inner);
            self.inner
                .runtime
                .register_handler(MessageKind::Response, Arc::new(CollectHandler(weak.clone())))
                .await;
            self.inner
                .runtime
                .register_handler(MessageKind::Error, Arc::new(CollectHandler(weak.clone())))
                .await;
            self.inner
                .runtime
                .register_handler(MessageKind::Command, Arc::new(OrchestrateHandler(weak)))
                .await;
        }
        self.inner.runtime.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.inner.runtime.stop().await
    }

    pub async fn state(&self) -> AgentState {
        self.inner.runtime.state().await
    }

    pub fn handle(&self) -> AgentHandle {
        self.inner.runtime.handle()
    }

    /// Names of currently-live agents (valid liveness record, not the
    /// Director itself), sorted.
    pub async fn discover_agents(&self) -> Vec<String> {
        self.inner.discover_agents().await
    }

    /// Route an intent to live agents, fan out, collect, aggregate.
    pub async fn process_intent(
        &self,
        intent: Intent,
        context: Map<String, Value>,
    ) -> OrchestrationResult {
        self.inner.process_intent(intent, context).await
    }
}

impl DirectorInner {
    async fn process_intent(&self, intent: Intent, context: Map<String, Value>) -> OrchestrationResult {
        tracing::info!(intent = %intent.kind, confidence = intent.confidence, "Processing intent");

        let candidates = self.routing.candidates(&intent.kind);
        let targets: Vec<String> = if candidates.is_empty() {
            Vec::new()
        } else {
            let live = self.discover_agents().await;
            candidates
                .iter()
                .filter(|c| live.contains(c))
                .cloned()
                .collect()
        };

        if targets.is_empty() {
            tracing::info!(intent = %intent.kind, "No live candidate agents, short-circuiting");
            return OrchestrationResult {
                success: false,
                message: "No suitable agents found".to_string(),
                intent,
                sources: Vec::new(),
                data: Vec::new(),
            };
        }

        let correlation_id = self.fan_out(&targets, &intent, &context).await;
        let responses = self.collect_responses(&correlation_id, targets.len()).await;
        self.aggregate(responses, intent, &context).await
    }

    async fn discover_agents(&self) -> Vec<String> {
        let handle = self.runtime.handle();
        let transport = handle.transport();

        let keys = match transport.scan(HEALTH_PATTERN).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Agent discovery scan failed");
                return Vec::new();
            }
        };

        let mut agents = Vec::new();
        for key in keys {
            let Some(name) = agent_from_health_key(&key) else {
                continue;
            };
            if name == self.runtime.name() {
                continue;
            }
            match transport.get(&key).await {
                Ok(Some(bytes)) => match serde_json::from_slice::<HealthRecord>(&bytes) {
                    Ok(_) => agents.push(name.to_string()),
                    Err(e) => {
                        tracing::warn!(agent = name, error = %e, "Skipping unreadable liveness record")
                    }
                },
                // Expired between scan and get: not live.
                Ok(None) => {}
                Err(e) => tracing::warn!(agent = name, error = %e, "Liveness read failed"),
            }
        }
        agents.sort();
        agents
    }

    /// Send `Command{action: "process"}` to every target under one minted
    /// correlation id. A failing send for one target never blocks the rest.
    async fn fan_out(&self, targets: &[String], intent: &Intent, context: &Map<String, Value>) -> String {
        let correlation_id = format!("dir_{}", ulid::Ulid::new());
        self.pending
            .lock()
            .await
            .insert(correlation_id.clone(), Vec::new());

        let handle = self.runtime.handle();
        for target in targets {
            let mut payload = Map::new();
            payload.insert("action".to_string(), json!("process"));
            payload.insert(
                "intent".to_string(),
                serde_json::to_value(intent).unwrap_or(Value::Null),
            );
            payload.insert("context".to_string(), Value::Object(context.clone()));
            payload.insert("correlation_id".to_string(), json!(correlation_id));

            match handle
                .send_correlated(
                    target,
                    MessageKind::Command,
                    payload,
                    Priority::High,
                    true,
                    Some(correlation_id.clone()),
                )
                .await
            {
                Ok(_) => tracing::debug!(target = %target, correlation = %correlation_id, "Fanned out"),
                Err(e) => tracing::warn!(target = %target, error = %e, "Fan-out send failed"),
            }
        }
        correlation_id
    }

    /// Poll the correlation table until every dispatched agent has answered
    /// or the timeout elapses, then remove the entry unconditionally.
    ///
    /// Expiry is a normal termination: aggregation proceeds with whatever
    /// was collected, including nothing.
    async fn collect_responses(&self, correlation_id: &str, expected: usize) -> Vec<Envelope> {
        let deadline = tokio::time::Instant::now() + self.settings.response_timeout();
        loop {
            let collected = {
                let pending = self.pending.lock().await;
                pending.get(correlation_id).map(Vec::len).unwrap_or(0)
            };
            if collected >= expected {
                break;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::debug!(
                    correlation = %correlation_id,
                    collected,
                    expected,
                    "Response collection timed out"
                );
                break;
            }
            let remaining = deadline - now;
            tokio::time::sleep(self.settings.poll_interval().min(remaining)).await;
        }

        self.pending
            .lock()
            .await
            .remove(correlation_id)
            .unwrap_or_default()
    }

    async fn aggregate(
        &self,
        responses: Vec<Envelope>,
        intent: Intent,
        context: &Map<String, Value>,
    ) -> OrchestrationResult {
        if responses.is_empty() {
            return OrchestrationResult {
                success: true,
                message: "I'm here to help! What would you like me to do?".to_string(),
                intent,
                sources: Vec::new(),
                data: Vec::new(),
            };
        }

        let mut data = Vec::new();
        let mut sources = Vec::new();
        for response in &responses {
            if response.kind == MessageKind::Response
                && response
                    .payload
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            {
                data.push(response.payload.get("data").cloned().unwrap_or(Value::Null));
                sources.push(response.from_agent.clone());
            }
        }

        if sources.is_empty() {
            return OrchestrationResult {
                success: true,
                message: "None of the contacted agents could complete this request.".to_string(),
                intent,
                sources,
                data,
            };
        }

        if let Some(synthesizer) = &self.synthesizer {
            if synthesizer.is_available().await {
                let user_input = context
                    .get("user_input")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let prompt = build_synthesis_prompt(user_input, &intent, &data);
                match synthesizer.generate(&prompt).await {
                    Ok(message) => {
                        return OrchestrationResult {
                            success: true,
                            message,
                            intent,
                            sources,
                            data,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(service = synthesizer.name(), error = %e, "Synthesis failed, using summary")
                    }
                }
            }
        }

        OrchestrationResult {
            success: true,
            message: format!("I've gathered information from {}.", sources.join(", ")),
            intent,
            sources,
            data,
        }
    }
}

fn build_synthesis_prompt(user_input: &str, intent: &Intent, data: &[Value]) -> String {
    format!(
        "Synthesize these agent responses into a single cohesive answer.\n\n\
         User query: {user_input}\n\
         Intent: {intent}\n\n\
         Agent responses:\n{data}\n\n\
         Provide a natural, helpful response that combines the information appropriately.",
        intent = serde_json::to_string(intent).unwrap_or_default(),
        data = serde_json::to_string_pretty(data).unwrap_or_default(),
    )
}

/// Appends `Response`/`Error` envelopes to their open correlation entry.
/// Replies with no open entry (late arrivals after timeout) are dropped.
struct CollectHandler(Weak<DirectorInner>);

#[async_trait]
impl MessageHandler for CollectHandler {
    async fn handle(&self, _agent: &AgentHandle, envelope: &Envelope) -> Result<()> {
        let Some(inner) = self.0.upgrade() else {
            return Ok(());
        };
        let Some(correlation_id) = &envelope.correlation_id else {
            return Ok(());
        };
        let mut pending = inner.pending.lock().await;
        if let Some(bucket) = pending.get_mut(correlation_id) {
            bucket.push(envelope.clone());
        } else {
            tracing::debug!(
                from = %envelope.from_agent,
                correlation = %correlation_id,
                "Dropping reply for closed correlation"
            );
        }
        Ok(())
    }
}

/// Answers `Command{action: "orchestrate"}` envelopes over the wire.
///
/// Processing runs on its own task so the Director's listener stays free to
/// collect the fan-out responses the orchestration itself is waiting on.
struct OrchestrateHandler(Weak<DirectorInner>);

#[async_trait]
impl MessageHandler for OrchestrateHandler {
    async fn handle(&self, agent: &AgentHandle, envelope: &Envelope) -> Result<()> {
        if envelope.payload.get("action").and_then(Value::as_str) != Some("orchestrate") {
            return Ok(());
        }
        let Some(inner) = self.0.upgrade() else {
            return Ok(());
        };

        let intent = envelope
            .payload
            .get("intent")
            .cloned()
            .and_then(|v| serde_json::from_value::<Intent>(v).ok())
            .unwrap_or_else(|| Intent::new("general_query"));
        let context = match envelope.payload.get("context") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        let agent = agent.clone();
        let request = envelope.clone();
        tokio::spawn(async move {
            let result = inner.process_intent(intent, context).await;
            let payload = match serde_json::to_value(&result) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            if let Err(e) = agent.reply(&request, payload).await {
                tracing::warn!(error = %e, "Could not send orchestration reply");
            }
        });
        Ok(())
    }
}
