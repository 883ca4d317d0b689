//! Per-agent runtime: channel subscription, handler dispatch, lifecycle.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::config::HeartbeatSettings;
use crate::error::{Error, Result};
use crate::protocol::{commands_channel, Envelope, MessageKind, Priority, BROADCAST, BROADCAST_CHANNEL};
use crate::transport::{Subscription, Transport};

use super::heartbeat;

/// Agent lifecycle states.
///
/// `Stopping` is only observable while in-flight handlers drain; there is no
/// way back to `Running` without a fresh `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Initializing,
    Running,
    Stopping,
    Stopped,
}

/// Domain hooks invoked around the runtime lifecycle.
///
/// A failing `initialize` prevents the agent from reaching `Running`.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Lifecycle for agents without domain resources.
pub struct NoopLifecycle;

#[async_trait]
impl Lifecycle for NoopLifecycle {}

/// Handler invoked for every received envelope of a registered kind.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, agent: &AgentHandle, envelope: &Envelope) -> Result<()>;
}

/// Adapter so plain async closures can be registered as handlers.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(AgentHandle, Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, agent: &AgentHandle, envelope: &Envelope) -> Result<()> {
        (self.0)(agent.clone(), envelope.clone()).await
    }
}

type HandlerTable = HashMap<MessageKind, Vec<Arc<dyn MessageHandler>>>;

/// Cheap, cloneable sending half of an agent: identity plus transport.
///
/// Handlers receive one of these so they can reply without touching the
/// runtime's mutable state.
#[derive(Clone)]
pub struct AgentHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    name: String,
    kind: String,
    instance_id: String,
    transport: Arc<dyn Transport>,
}

impl AgentHandle {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                name: name.into(),
                kind: kind.into(),
                instance_id: uuid::Uuid::new_v4().to_string(),
                transport,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Construct and publish an envelope to `agents.<to>.commands`
    /// (or `broadcast.all` when `to == "broadcast"`).
    ///
    /// Returns the envelope id when a reply is expected, otherwise `None`.
    pub async fn send(
        &self,
        to: &str,
        kind: MessageKind,
        payload: Map<String, Value>,
        priority: Priority,
        requires_response: bool,
    ) -> Result<Option<String>> {
        self.send_correlated(to, kind, payload, priority, requires_response, None)
            .await
    }

    /// Like [`send`](Self::send) with an explicit correlation id, e.g. a
    /// Director fan-out session id shared across all fanned-out copies.
    pub async fn send_correlated(
        &self,
        to: &str,
        kind: MessageKind,
        payload: Map<String, Value>,
        priority: Priority,
        requires_response: bool,
        correlation_id: Option<String>,
    ) -> Result<Option<String>> {
        let mut envelope = Envelope::new(self.name(), to, kind, payload).with_priority(priority);
        if let Some(correlation_id) = correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        }
        let envelope = envelope.with_requires_response(requires_response);

        let id = envelope.id.clone();
        self.send_envelope(&envelope).await?;
        Ok(requires_response.then_some(id))
    }

    /// Publish a fully-built envelope.
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        let channel = if envelope.to_agent == BROADCAST {
            BROADCAST_CHANNEL.to_string()
        } else {
            commands_channel(&envelope.to_agent)
        };
        self.inner
            .transport
            .publish(&channel, envelope.encode()?)
            .await?;
        tracing::debug!(
            from = %self.name(),
            to = %envelope.to_agent,
            kind = envelope.kind.as_str(),
            "Sent message"
        );
        Ok(())
    }

    /// Send a `Response` back to a request's sender.
    pub async fn reply(&self, request: &Envelope, payload: Map<String, Value>) -> Result<()> {
        self.send_envelope(&request.reply(self.name(), payload)).await
    }

    /// Send an `Error` back to a request's sender.
    pub async fn reply_error(&self, request: &Envelope, error: &str) -> Result<()> {
        self.send_envelope(&request.error_reply(self.name(), error)).await
    }
}

/// Owns an agent's subscription, handler table, and background tasks.
///
/// `start()` spawns the listener and heartbeat loops; `stop()` signals them,
/// joins both, and runs the domain `shutdown` hook. All handler invocations
/// for one runtime happen sequentially on the listener task.
pub struct AgentRuntime {
    handle: AgentHandle,
    handlers: Arc<RwLock<HandlerTable>>,
    lifecycle: Arc<dyn Lifecycle>,
    heartbeat: HeartbeatSettings,
    state: Arc<RwLock<AgentState>>,
    shutdown: StdMutex<Option<watch::Sender<bool>>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl AgentRuntime {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        transport: Arc<dyn Transport>,
        heartbeat: HeartbeatSettings,
    ) -> Self {
        Self::with_lifecycle(name, kind, transport, heartbeat, Arc::new(NoopLifecycle))
    }

    pub fn with_lifecycle(
        name: impl Into<String>,
        kind: impl Into<String>,
        transport: Arc<dyn Transport>,
        heartbeat: HeartbeatSettings,
        lifecycle: Arc<dyn Lifecycle>,
    ) -> Self {
        let mut table: HandlerTable = MessageKind::ALL
            .iter()
            .map(|kind| (*kind, Vec::new()))
            .collect();
        // Default every agent carries; domain handlers extend, not replace.
        table
            .entry(MessageKind::Query)
            .or_default()
            .push(Arc::new(StatusQueryHandler) as Arc<dyn MessageHandler>);

        Self {
            handle: AgentHandle::new(name, kind, transport),
            handlers: Arc::new(RwLock::new(table)),
            lifecycle,
            heartbeat,
            state: Arc::new(RwLock::new(AgentState::Initializing)),
            shutdown: StdMutex::new(None),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub async fn state(&self) -> AgentState {
        *self.state.read().await
    }

    /// Append a handler to the ordered list for a message kind.
    pub async fn register_handler(&self, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        let mut table = self.handlers.write().await;
        table.entry(kind).or_default().push(handler);
    }

    /// Register an async closure as a handler.
    pub async fn on<F, Fut>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(AgentHandle, Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register_handler(kind, Arc::new(FnHandler(handler))).await;
    }

    /// Subscribe, spawn the listener and heartbeat tasks, run the domain
    /// `initialize` hook, and transition to `Running`.
    ///
    /// Fails with [`Error::Startup`] when the subscription cannot be
    /// established or `initialize` fails; the agent never reaches `Running`
    /// in either case.
    pub async fn start(&self) -> Result<()> {
        {
            let state = self.state.read().await;
            if matches!(*state, AgentState::Running | AgentState::Stopping) {
                return Err(Error::Startup(format!(
                    "agent {} already running",
                    self.name()
                )));
            }
        }
        tracing::info!(agent = %self.name(), kind = %self.handle.kind(), "Starting agent");

        let channels = vec![
            commands_channel(self.name()),
            BROADCAST_CHANNEL.to_string(),
        ];
        let stream = self
            .handle
            .transport()
            .subscribe(&channels)
            .await
            .map_err(|e| Error::Startup(format!("transport subscription failed: {e}")))?;

        let (shutdown_tx, _) = watch::channel(false);
        let listener = tokio::spawn(listen_loop(
            self.handle.clone(),
            self.handlers.clone(),
            stream,
            shutdown_tx.subscribe(),
        ));
        let heartbeat = tokio::spawn(heartbeat::heartbeat_loop(
            self.handle.clone(),
            self.heartbeat.clone(),
            shutdown_tx.subscribe(),
        ));

        if let Err(e) = self.lifecycle.initialize().await {
            let _ = shutdown_tx.send(true);
            let _ = listener.await;
            let _ = heartbeat.await;
            *self.state.write().await = AgentState::Stopped;
            return Err(Error::Startup(format!("agent initialization failed: {e}")));
        }

        *self.shutdown.lock().unwrap() = Some(shutdown_tx);
        *self.tasks.lock().unwrap() = vec![listener, heartbeat];
        *self.state.write().await = AgentState::Running;
        tracing::info!(agent = %self.name(), "Agent started");
        Ok(())
    }

    /// Cancel the background tasks, join them, and run the domain `shutdown`
    /// hook. Idempotent: stopping an already-stopped agent is a no-op.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                AgentState::Stopped => return Ok(()),
                AgentState::Initializing => {
                    *state = AgentState::Stopped;
                    return Ok(());
                }
                _ => *state = AgentState::Stopping,
            }
        }
        tracing::info!(agent = %self.name(), "Stopping agent");

        if let Some(shutdown) = self.shutdown.lock().unwrap().take() {
            let _ = shutdown.send(true);
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        if let Err(e) = self.lifecycle.shutdown().await {
            tracing::warn!(agent = %self.name(), error = %e, "Shutdown hook failed");
        }

        *self.state.write().await = AgentState::Stopped;
        tracing::info!(agent = %self.name(), "Agent stopped");
        Ok(())
    }
}

/// Consume the inbound subscription until shutdown, dispatching each frame.
async fn listen_loop(
    handle: AgentHandle,
    handlers: Arc<RwLock<HandlerTable>>,
    mut stream: Subscription,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = stream.next() => match frame {
                Some(bytes) => match Envelope::decode(&bytes) {
                    Ok(envelope) => dispatch(&handle, &handlers, envelope).await,
                    // Malformed frames are logged and dropped, never retried.
                    Err(e) => tracing::warn!(agent = %handle.name(), error = %e, "Dropping malformed frame"),
                },
                None => {
                    tracing::debug!(agent = %handle.name(), "Subscription closed");
                    break;
                }
            }
        }
    }
    tracing::debug!(agent = %handle.name(), "Listener loop exited");
}

/// Invoke every registered handler for the envelope's kind, in registration
/// order. A failing handler is logged, owes the sender an `Error` envelope
/// when a response was expected, and never aborts later handlers or the loop.
async fn dispatch(handle: &AgentHandle, handlers: &RwLock<HandlerTable>, envelope: Envelope) {
    let list = {
        let table = handlers.read().await;
        table.get(&envelope.kind).cloned().unwrap_or_default()
    };

    if list.is_empty() {
        if envelope.kind == MessageKind::Command {
            tracing::warn!(
                agent = %handle.name(),
                from = %envelope.from_agent,
                payload = %serde_json::Value::Object(envelope.payload.clone()),
                "Unhandled command"
            );
        } else {
            tracing::debug!(
                agent = %handle.name(),
                kind = envelope.kind.as_str(),
                from = %envelope.from_agent,
                "No handler for message"
            );
        }
        return;
    }

    for handler in list {
        if let Err(e) = handler.handle(handle, &envelope).await {
            tracing::warn!(
                agent = %handle.name(),
                kind = envelope.kind.as_str(),
                from = %envelope.from_agent,
                error = %e,
                "Handler failed"
            );
            if envelope.requires_response {
                if let Err(send_err) = handle.reply_error(&envelope, &e.to_string()).await {
                    tracing::warn!(agent = %handle.name(), error = %send_err, "Could not send error reply");
                }
            }
        }
    }
}

/// Default `Query` handler: answers `{type: "status"}` probes.
struct StatusQueryHandler;

#[async_trait]
impl MessageHandler for StatusQueryHandler {
    async fn handle(&self, agent: &AgentHandle, envelope: &Envelope) -> Result<()> {
        if envelope.payload.get("type").and_then(Value::as_str) != Some("status") {
            return Ok(());
        }
        let mut payload = Map::new();
        payload.insert("status".to_string(), json!("active"));
        payload.insert("name".to_string(), json!(agent.name()));
        payload.insert("kind".to_string(), json!(agent.kind()));
        agent.reply(envelope, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_heartbeat() -> HeartbeatSettings {
        HeartbeatSettings {
            interval_ms: 25,
            ttl_ms: 80,
        }
    }

    async fn recv_envelope(sub: &mut Subscription) -> Envelope {
        let bytes = timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("subscription closed");
        Envelope::decode(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let transport = Arc::new(MemoryTransport::new());
        let runtime = AgentRuntime::new("alpha", "test", transport, test_heartbeat());

        assert_eq!(runtime.state().await, AgentState::Initializing);
        runtime.start().await.unwrap();
        assert_eq!(runtime.state().await, AgentState::Running);

        // Starting a running agent is an error.
        assert!(matches!(runtime.start().await, Err(Error::Startup(_))));

        runtime.stop().await.unwrap();
        assert_eq!(runtime.state().await, AgentState::Stopped);

        // Idempotent stop.
        runtime.stop().await.unwrap();
        assert_eq!(runtime.state().await, AgentState::Stopped);

        // A fresh start() brings it back.
        runtime.start().await.unwrap();
        assert_eq!(runtime.state().await, AgentState::Running);
        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_default_status_query_handler() {
        let transport = Arc::new(MemoryTransport::new());
        let runtime = AgentRuntime::new("beta", "calendar", transport.clone(), test_heartbeat());
        runtime.start().await.unwrap();

        let probe = AgentHandle::new("probe", "test", transport.clone());
        let mut replies = transport
            .subscribe(&[commands_channel("probe")])
            .await
            .unwrap();

        let mut payload = Map::new();
        payload.insert("type".to_string(), json!("status"));
        let id = probe
            .send("beta", MessageKind::Query, payload, Priority::Normal, true)
            .await
            .unwrap()
            .unwrap();

        let reply = recv_envelope(&mut replies).await;
        assert_eq!(reply.kind, MessageKind::Response);
        assert_eq!(reply.from_agent, "beta");
        assert_eq!(reply.correlation_id, Some(id));
        assert_eq!(reply.payload["status"], json!("active"));
        assert_eq!(reply.payload["name"], json!("beta"));
        assert_eq!(reply.payload["kind"], json!("calendar"));

        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_handler_sends_error_envelope() {
        let transport = Arc::new(MemoryTransport::new());
        let runtime = AgentRuntime::new("echo", "test", transport.clone(), test_heartbeat());
        runtime
            .on(MessageKind::Command, |_agent, _envelope| async {
                Err(Error::handler("boom"))
            })
            .await;
        runtime.start().await.unwrap();

        let probe = AgentHandle::new("probe", "test", transport.clone());
        let mut replies = transport
            .subscribe(&[commands_channel("probe")])
            .await
            .unwrap();

        let mut payload = Map::new();
        payload.insert("action".to_string(), json!("echo"));
        let id = probe
            .send("echo", MessageKind::Command, payload, Priority::Normal, true)
            .await
            .unwrap()
            .unwrap();

        let reply = recv_envelope(&mut replies).await;
        assert_eq!(reply.kind, MessageKind::Error);
        assert_eq!(reply.correlation_id, Some(id));
        assert!(reply.payload["error"]
            .as_str()
            .unwrap()
            .contains("boom"));

        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_isolation() {
        let transport = Arc::new(MemoryTransport::new());
        let runtime = AgentRuntime::new("gamma", "test", transport.clone(), test_heartbeat());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        runtime
            .on(MessageKind::Event, |_agent, _envelope| async {
                Err(Error::handler("first handler fails"))
            })
            .await;
        let tx_clone = tx.clone();
        runtime
            .on(MessageKind::Event, move |_agent, envelope| {
                let tx = tx_clone.clone();
                async move {
                    tx.send(envelope.id.clone()).ok();
                    Ok(())
                }
            })
            .await;
        runtime.start().await.unwrap();

        let probe = AgentHandle::new("probe", "test", transport.clone());
        probe
            .send("gamma", MessageKind::Event, Map::new(), Priority::Normal, false)
            .await
            .unwrap();
        probe
            .send("gamma", MessageKind::Event, Map::new(), Priority::Normal, false)
            .await
            .unwrap();

        // The failing handler neither blocks the second handler nor kills
        // the listener loop for subsequent envelopes.
        timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();

        runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_failure_prevents_running() {
        struct FailingLifecycle;

        #[async_trait]
        impl Lifecycle for FailingLifecycle {
            async fn initialize(&self) -> Result<()> {
                Err(Error::Other("database unreachable".to_string()))
            }
        }

        let transport = Arc::new(MemoryTransport::new());
        let runtime = AgentRuntime::with_lifecycle(
            "delta",
            "test",
            transport,
            test_heartbeat(),
            Arc::new(FailingLifecycle),
        );

        let err = runtime.start().await.unwrap_err();
        assert!(matches!(err, Error::Startup(_)));
        assert!(err.to_string().contains("database unreachable"));
        assert_ne!(runtime.state().await, AgentState::Running);
    }

    #[tokio::test]
    async fn test_heartbeat_liveness_expiry() {
        let transport = Arc::new(MemoryTransport::new());
        let runtime = AgentRuntime::new("epsilon", "test", transport.clone(), test_heartbeat());
        runtime.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let keys = transport.scan("agents.*.health").await.unwrap();
        assert_eq!(keys, vec!["agents.epsilon.health".to_string()]);

        let record: crate::runtime::HealthRecord = serde_json::from_slice(
            &transport.get("agents.epsilon.health").await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(record.status, "active");
        assert_eq!(record.instance_id, runtime.handle().instance_id());

        // Heartbeat survives longer than a single TTL while refreshed.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!transport.scan("agents.*.health").await.unwrap().is_empty());

        // After stop the record is not deleted; it ages out via TTL.
        runtime.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(transport.scan("agents.*.health").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_delivery() {
        let transport = Arc::new(MemoryTransport::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

        let mut runtimes = Vec::new();
        for name in ["one", "two"] {
            let runtime = AgentRuntime::new(name, "test", transport.clone(), test_heartbeat());
            let tx = tx.clone();
            runtime
                .on(MessageKind::Event, move |agent, _envelope| {
                    let tx = tx.clone();
                    async move {
                        tx.send(agent.name().to_string()).ok();
                        Ok(())
                    }
                })
                .await;
            runtime.start().await.unwrap();
            runtimes.push(runtime);
        }

        let probe = AgentHandle::new("probe", "test", transport.clone());
        probe
            .send(BROADCAST, MessageKind::Event, Map::new(), Priority::Low, false)
            .await
            .unwrap();

        let mut seen = vec![
            timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap(),
            timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap(),
        ];
        seen.sort();
        assert_eq!(seen, vec!["one".to_string(), "two".to_string()]);

        for runtime in &runtimes {
            runtime.stop().await.unwrap();
        }
    }
}
