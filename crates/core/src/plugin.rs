//! Plugin traits and the plugin registry.
//!
//! Plugins are the extension units of the runtime. Each plugin owns
//! triggers (which originate events into the queue) and executors (which
//! run pipeline steps). Plugins are registered by id; the planner sees
//! the roster of ids, descriptions, and executor names.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::RuntimeHandle;
use crate::error::PluginError;
use crate::event_context::{EventContext, QueueHandle};
use crate::pipeline::PipelineStep;

/// What an executor reports back to the loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOutput {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutorOutput {
    pub fn ok(data: impl Into<serde_json::Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
        }
    }

    /// Success with nothing to add to the chain.
    pub fn done() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// A plugin-owned action invoked by a pipeline step.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Action name used in pipeline steps.
    fn name(&self) -> &str;

    /// Description shown to the planner.
    fn description(&self) -> &str;

    /// Run the action against the live event context.
    ///
    /// `Ok` with `success == false` is a reported failure; `Err` is an
    /// unexpected one. Both become error items in the chain.
    async fn execute(
        &self,
        step: &PipelineStep,
        event: &EventContext,
        runtime: &RuntimeHandle,
    ) -> Result<ExecutorOutput, PluginError>;
}

/// A plugin-owned listener that originates events.
#[async_trait]
pub trait Trigger: Send + Sync {
    fn id(&self) -> &str;

    /// Begin listening. Long-running listeners should spawn their own task
    /// and return promptly.
    async fn start(&self, queue: QueueHandle) -> Result<(), PluginError>;
}

/// The core Plugin trait.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique, non-empty plugin id.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Capabilities that must be backed by a provider at startup.
    fn required_capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    fn triggers(&self) -> Vec<Arc<dyn Trigger>> {
        Vec::new()
    }

    fn executors(&self) -> Vec<Arc<dyn Executor>>;

    /// One-time initialization after models and memory are ready.
    async fn init(&self, _runtime: &RuntimeHandle) -> Result<(), PluginError> {
        Ok(())
    }

    /// Find an executor by action name.
    fn executor(&self, action: &str) -> Option<Arc<dyn Executor>> {
        self.executors().into_iter().find(|e| e.name() == action)
    }
}

/// Planner-facing description of one executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSummary {
    pub name: String,
    pub description: String,
}

/// Planner-facing description of one plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSummary {
    pub id: String,
    pub description: String,
    pub executors: Vec<ExecutorSummary>,
}

/// A registry of plugins, preserving registration order.
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    index: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a plugin. Fails on an empty or already registered id.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let id = plugin.id().to_string();
        if id.trim().is_empty() {
            return Err(PluginError::EmptyId);
        }
        if self.index.contains_key(&id) {
            return Err(PluginError::Collision {
                id,
                registered: self.ids(),
            });
        }
        info!(plugin = %id, executors = plugin.executors().len(), "Registered plugin");
        self.index.insert(id, self.plugins.len());
        self.plugins.push(plugin);
        Ok(())
    }

    /// Get a plugin by id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Plugin>, PluginError> {
        self.index
            .get(id)
            .map(|&i| self.plugins[i].clone())
            .ok_or_else(|| PluginError::NotFound {
                id: id.to_string(),
                available: self.ids(),
            })
    }

    /// Resolve the executor for a pipeline step.
    pub fn find_executor(&self, step: &PipelineStep) -> Result<Arc<dyn Executor>, PluginError> {
        let plugin = self.get(&step.plugin_id)?;
        plugin.executor(&step.action).ok_or_else(|| PluginError::ExecutorNotFound {
            plugin: step.plugin_id.clone(),
            action: step.action.clone(),
            available: plugin.executors().iter().map(|e| e.name().to_string()).collect(),
        })
    }

    /// All plugins in registration order.
    pub fn all(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// All plugin ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// The roster shown to the planner.
    pub fn roster(&self) -> Vec<PluginSummary> {
        self.plugins
            .iter()
            .map(|p| PluginSummary {
                id: p.id().to_string(),
                description: p.description().to_string(),
                executors: p
                    .executors()
                    .iter()
                    .map(|e| ExecutorSummary {
                        name: e.name().to_string(),
                        description: e.description().to_string(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Run every plugin's `init` concurrently. The first failure wins.
    pub async fn init_all(&self, runtime: &RuntimeHandle) -> Result<(), PluginError> {
        futures::future::try_join_all(self.plugins.iter().map(|p| async move {
            debug!(plugin = %p.id(), "Initializing plugin");
            p.init(runtime).await
        }))
        .await?;
        Ok(())
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityRouter, ExecuteConfig};
    use crate::context::ContextItem;
    use crate::error::{CapabilityError, Error, MemoryError};
    use crate::event::EventBus;
    use crate::event_context::{EventSink, InboundEvent};
    use crate::memory::MemoryProvider;
    use crate::message::{ConversationId, HistoryMessage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes the first item back"
        }
        async fn execute(
            &self,
            _step: &PipelineStep,
            event: &EventContext,
            _runtime: &RuntimeHandle,
        ) -> Result<ExecutorOutput, PluginError> {
            let first = event.context_chain.first().map(|i| i.content.clone()).unwrap_or_default();
            Ok(ExecutorOutput::ok(first))
        }
    }

    struct TestPlugin {
        id: &'static str,
        inits: AtomicUsize,
    }

    impl TestPlugin {
        fn new(id: &'static str) -> Self {
            Self {
                id,
                inits: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            "Test"
        }
        fn description(&self) -> &str {
            "A plugin for tests"
        }
        fn executors(&self) -> Vec<Arc<dyn Executor>> {
            vec![Arc::new(EchoExecutor)]
        }
        async fn init(&self, _runtime: &RuntimeHandle) -> Result<(), PluginError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn push(&self, _event: InboundEvent) -> Result<(), Error> {
            Ok(())
        }
    }

    struct NullModels;

    #[async_trait]
    impl CapabilityRouter for NullModels {
        fn resolve(&self, id: &str) -> String {
            id.to_string()
        }
        fn has_capability(&self, _id: &str) -> bool {
            false
        }
        async fn execute(
            &self,
            capability_id: &str,
            _input: serde_json::Value,
            _config: &ExecuteConfig,
            _provider_id: Option<&str>,
        ) -> Result<serde_json::Value, CapabilityError> {
            Err(CapabilityError::NoProvider {
                capability: capability_id.into(),
            })
        }
    }

    struct NullMemory;

    #[async_trait]
    impl MemoryProvider for NullMemory {
        fn name(&self) -> &str {
            "null"
        }
        async fn get_or_create_conversation(
            &self,
            _user_id: &str,
            _platform: &str,
        ) -> Result<ConversationId, MemoryError> {
            Ok(ConversationId::from("c"))
        }
        async fn get_recent_conversation_history(
            &self,
            _user_id: &str,
            _platform: &str,
            _limit: Option<usize>,
        ) -> Result<Vec<HistoryMessage>, MemoryError> {
            Ok(Vec::new())
        }
        async fn store_user_interaction(
            &self,
            _user_id: &str,
            _platform: &str,
            _raw_message: &str,
            _timestamp: chrono::DateTime<chrono::Utc>,
            _message_id: &str,
        ) -> Result<(), MemoryError> {
            Ok(())
        }
        async fn store_assistant_interaction(
            &self,
            _user_id: &str,
            _platform: &str,
            _final_message: &str,
            _chain: &crate::context::ContextChain,
        ) -> Result<(), MemoryError> {
            Ok(())
        }
    }

    fn handle() -> RuntimeHandle {
        RuntimeHandle::new(
            Arc::new(NullModels),
            Arc::new(NullMemory),
            Arc::new(NullSink),
            Arc::new(EventBus::default()),
        )
    }

    #[test]
    fn register_and_lookup_in_order() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(TestPlugin::new("b"))).unwrap();
        registry.register(Arc::new(TestPlugin::new("a"))).unwrap();
        assert_eq!(registry.ids(), vec!["b", "a"]);
        assert_eq!(registry.get("a").unwrap().id(), "a");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn empty_id_is_rejected() {
        let mut registry = PluginRegistry::new();
        let err = registry.register(Arc::new(TestPlugin::new(" "))).unwrap_err();
        assert!(matches!(err, PluginError::EmptyId));
    }

    #[test]
    fn collision_names_new_and_registered_ids() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(TestPlugin::new("time"))).unwrap();
        registry.register(Arc::new(TestPlugin::new("reply"))).unwrap();
        let err = registry.register(Arc::new(TestPlugin::new("time"))).unwrap_err();
        match &err {
            PluginError::Collision { id, registered } => {
                assert_eq!(id, "time");
                assert_eq!(registered, &vec!["time".to_string(), "reply".to_string()]);
            }
            other => panic!("expected collision, got {other:?}"),
        }
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn missing_plugin_lists_available() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(TestPlugin::new("time"))).unwrap();
        let msg = match registry.get("weather") {
            Err(e) => e.to_string(),
            Ok(_) => panic!("expected not found"),
        };
        assert!(msg.contains("weather"));
        assert!(msg.contains("[time]"));
    }

    #[test]
    fn find_executor_reports_missing_action() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(TestPlugin::new("t"))).unwrap();
        assert!(registry.find_executor(&PipelineStep::new("t", "echo")).is_ok());
        let err = match registry.find_executor(&PipelineStep::new("t", "shout")) {
            Err(e) => e,
            Ok(_) => panic!("expected missing executor"),
        };
        assert!(matches!(err, PluginError::ExecutorNotFound { .. }));
    }

    #[test]
    fn roster_describes_executors() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(TestPlugin::new("t"))).unwrap();
        let roster = registry.roster();
        assert_eq!(roster[0].id, "t");
        assert_eq!(roster[0].executors[0].name, "echo");
    }

    #[tokio::test]
    async fn init_all_runs_every_plugin_once() {
        let a = Arc::new(TestPlugin::new("a"));
        let b = Arc::new(TestPlugin::new("b"));
        let mut registry = PluginRegistry::new();
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();

        registry.init_all(&handle()).await.unwrap();
        assert_eq!(a.inits.load(Ordering::SeqCst), 1);
        assert_eq!(b.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn executor_sees_live_event_context() {
        let event = EventContext::from_inbound(
            InboundEvent::new(ContextItem::data("timer", "tick", "tick-1", None)),
            Arc::new(NullSink),
        );
        let out = EchoExecutor
            .execute(&PipelineStep::new("t", "echo"), &event, &handle())
            .await
            .unwrap();
        assert_eq!(out, ExecutorOutput::ok("tick-1"));
    }
}
