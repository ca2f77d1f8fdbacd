//! Runtime assembly and lifecycle.
//!
//! [`RuntimeBuilder`] registers providers and plugins, resolves capability
//! aliases, and checks that every required capability is backed. The
//! resulting [`AgentRuntime`] initializes its collaborators on the first
//! `start()`, starts plugin triggers, and spawns the evaluation loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use weft_config::RuntimeConfig;
use weft_core::agent::{LoopState, RuntimeHandle};
use weft_core::capability::{CapabilityRouter, ModelProvider};
use weft_core::error::{Error, PluginError, Result};
use weft_core::event::{DomainEvent, EventBus};
use weft_core::event_context::{EventSink, InboundEvent, QueueHandle};
use weft_core::memory::MemoryProvider;
use weft_core::plugin::{Plugin, PluginRegistry};
use weft_memory::InMemoryMemory;
use weft_providers::ModelRouter;

use crate::loop_runner::EvaluationLoop;
use crate::planner::PipelineEngine;
use crate::queue::{EventQueue, QueueReceiver};
use crate::retrieval::{RetrievalOptions, StructuredRetriever};

/// Collects everything a runtime needs, then validates it in [`build`](Self::build).
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    providers: Vec<Arc<dyn ModelProvider>>,
    plugins: Vec<Arc<dyn Plugin>>,
    memory: Option<Arc<dyn MemoryProvider>>,
    events: Option<Arc<EventBus>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            providers: Vec::new(),
            plugins: Vec::new(),
            memory: None,
            events: None,
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Memory collaborator. Defaults to [`InMemoryMemory`].
    pub fn with_memory(mut self, memory: Arc<dyn MemoryProvider>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Add a group of interchangeable capability ids.
    pub fn with_alias_group(mut self, group: Vec<String>) -> Self {
        self.config.capability_aliases.push(group);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Register everything and check capabilities. All failures here are
    /// configuration errors.
    pub fn build(self) -> Result<AgentRuntime> {
        let config = self.config;
        config.validate()?;

        let mut router = ModelRouter::new();
        for provider in self.providers {
            router.register_provider(provider)?;
        }
        router.apply_alias_groups(&config.capability_aliases)?;

        if !router.has_capability(&config.text_capability) {
            return Err(Error::config(format!(
                "no registered provider supplies the '{}' capability",
                config.text_capability
            )));
        }

        let mut plugins = PluginRegistry::new();
        for plugin in self.plugins {
            for capability in plugin.required_capabilities() {
                if !router.has_capability(&capability) {
                    return Err(Error::config(format!(
                        "plugin '{}' requires capability '{}' but no provider supplies it",
                        plugin.id(),
                        capability
                    )));
                }
            }
            plugins.register(plugin)?;
        }

        let router = Arc::new(router);
        let plugins = Arc::new(plugins);
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(InMemoryMemory::new()) as Arc<dyn MemoryProvider>);
        let events = self.events.unwrap_or_default();

        let (queue, receiver) =
            EventQueue::new(memory.clone(), events.clone(), config.history_limit);
        let models: Arc<dyn CapabilityRouter> = router.clone();
        let handle = RuntimeHandle::new(models.clone(), memory, queue.handle()?, events.clone());

        let retriever = StructuredRetriever::new(models, config.text_capability.clone())
            .with_defaults(RetrievalOptions {
                max_retries: config.retrieval.max_retries,
                max_tokens: config.retrieval.max_tokens,
                ..RetrievalOptions::default()
            });
        let engine = PipelineEngine::new(retriever.clone(), plugins.clone(), events.clone())
            .with_temperature(config.planning_temperature);
        let evaluation = EvaluationLoop::new(engine, plugins.clone(), handle.clone())
            .with_history_limit(config.history_limit)
            .with_max_steps(config.max_steps_per_event);

        info!(
            providers = router.provider_ids().len(),
            plugins = plugins.len(),
            capabilities = ?router.capabilities(),
            "Runtime built"
        );

        let (shutdown, _) = watch::channel(false);
        Ok(AgentRuntime {
            config,
            router,
            plugins,
            queue,
            handle,
            retriever,
            evaluation: Arc::new(evaluation),
            receiver: Arc::new(Mutex::new(Some(receiver))),
            shutdown,
            running: Arc::new(AtomicBool::new(false)),
            initialized: AtomicBool::new(false),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A built runtime. Cheap to share behind an `Arc`.
pub struct AgentRuntime {
    config: RuntimeConfig,
    router: Arc<ModelRouter>,
    plugins: Arc<PluginRegistry>,
    queue: Arc<EventQueue>,
    handle: RuntimeHandle,
    retriever: StructuredRetriever,
    evaluation: Arc<EvaluationLoop>,
    /// Present while the loop is not running
    receiver: Arc<Mutex<Option<QueueReceiver>>>,
    shutdown: watch::Sender<bool>,
    running: Arc<AtomicBool>,
    initialized: AtomicBool,
}

impl AgentRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Start the runtime.
    ///
    /// The first call initializes and health-checks every provider, runs
    /// plugin `init`, and starts plugin triggers. Every call spawns the
    /// evaluation loop, which resumes with whatever is still queued.
    pub async fn start(&self) -> Result<RuntimeTask> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Internal("runtime is already running".into()));
        }

        match self.launch().await {
            Ok(task) => {
                info!("Runtime started");
                Ok(task)
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Runs with `running` already claimed by the caller.
    async fn launch(&self) -> Result<RuntimeTask> {
        if !self.initialized.load(Ordering::SeqCst) {
            self.initialize().await?;
            self.initialized.store(true, Ordering::SeqCst);
        }

        let receiver = lock(&self.receiver)
            .take()
            .ok_or_else(|| Error::Internal("evaluation loop is still shutting down".into()))?;

        self.shutdown.send_replace(false);
        let mut shutdown = self.shutdown.subscribe();
        let evaluation = self.evaluation.clone();
        let mut guard = LoopGuard {
            receiver: Some(receiver),
            slot: self.receiver.clone(),
            running: self.running.clone(),
            evaluation: evaluation.clone(),
            finished: false,
        };

        let join = tokio::spawn(async move {
            let result = match guard.receiver.as_mut() {
                Some(receiver) => evaluation.run(receiver, &mut shutdown).await,
                None => Ok(()),
            };
            guard.finished = true;
            if let Err(e) = &result {
                error!(error = %e, "Runtime stopped after a fatal error");
            }
            result
        });

        Ok(RuntimeTask { join })
    }

    async fn initialize(&self) -> Result<()> {
        self.router.init_all().await?;
        self.router.check_health_all().await?;
        self.plugins.init_all(&self.handle).await?;

        for plugin in self.plugins.all() {
            for trigger in plugin.triggers() {
                trigger.start(self.handle.queue().clone()).await.map_err(|e| match e {
                    failed @ PluginError::TriggerFailed { .. } => failed,
                    other => PluginError::TriggerFailed {
                        trigger: trigger.id().to_string(),
                        reason: other.to_string(),
                    },
                })?;
                info!(plugin = %plugin.id(), trigger = %trigger.id(), "Trigger started");
            }
        }
        Ok(())
    }

    /// Ask the loop to stop once the current event is done.
    pub fn stop(&self) {
        info!("Runtime stop requested");
        self.shutdown.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LoopState {
        self.evaluation.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.evaluation.subscribe_state()
    }

    /// Telemetry bus.
    pub fn events(&self) -> &Arc<EventBus> {
        self.handle.events()
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<Arc<DomainEvent>> {
        self.handle.events().subscribe()
    }

    /// Prepare and enqueue an event.
    pub async fn push(&self, event: InboundEvent) -> Result<()> {
        self.queue.push(event).await
    }

    pub fn queue(&self) -> QueueHandle {
        self.handle.queue().clone()
    }

    /// Events waiting for the loop.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    /// Structured retrieval with the runtime's configured defaults.
    pub fn retriever(&self) -> &StructuredRetriever {
        &self.retriever
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owned by the loop task. Hands the queue receiver back and clears
/// `running` however the task ends, including by panic or cancellation.
struct LoopGuard {
    receiver: Option<QueueReceiver>,
    slot: Arc<Mutex<Option<QueueReceiver>>>,
    running: Arc<AtomicBool>,
    evaluation: Arc<EvaluationLoop>,
    finished: bool,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            *lock(&self.slot) = Some(receiver);
        }
        if !self.finished {
            error!("Evaluation loop task ended abnormally");
            self.evaluation.mark_failed();
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

/// The spawned evaluation loop.
pub struct RuntimeTask {
    join: JoinHandle<Result<()>>,
}

impl RuntimeTask {
    /// Wait for the loop to end. A loop-fatal error is returned here.
    pub async fn join(self) -> Result<()> {
        self.join
            .await
            .map_err(|e| Error::Internal(format!("evaluation loop task failed: {e}")))?
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingPlugin, ScriptedModel};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use weft_core::capability::{CapabilityDescriptor, ExecuteConfig, IMAGE_GENERATION};
    use weft_core::error::CapabilityError;
    use weft_core::plugin::{Executor, Trigger};

    struct NeedsImages;

    #[async_trait]
    impl Plugin for NeedsImages {
        fn id(&self) -> &str {
            "painter"
        }
        fn name(&self) -> &str {
            "Painter"
        }
        fn description(&self) -> &str {
            "Draws pictures"
        }
        fn required_capabilities(&self) -> Vec<String> {
            vec![IMAGE_GENERATION.into()]
        }
        fn executors(&self) -> Vec<Arc<dyn Executor>> {
            Vec::new()
        }
    }

    struct SickProvider;

    #[async_trait]
    impl ModelProvider for SickProvider {
        fn id(&self) -> &str {
            "sick"
        }
        fn capabilities(&self) -> Vec<CapabilityDescriptor> {
            vec![CapabilityDescriptor::text_generation()]
        }
        async fn execute(
            &self,
            _capability_id: &str,
            _input: serde_json::Value,
            _config: &ExecuteConfig,
        ) -> std::result::Result<serde_json::Value, CapabilityError> {
            Ok(serde_json::json!(""))
        }
        async fn check_health(&self) -> std::result::Result<(), CapabilityError> {
            Err(CapabilityError::Execution {
                provider: "sick".into(),
                message: "503".into(),
            })
        }
    }

    struct TickTrigger;

    #[async_trait]
    impl Trigger for TickTrigger {
        fn id(&self) -> &str {
            "tick"
        }
        async fn start(&self, queue: QueueHandle) -> std::result::Result<(), PluginError> {
            queue
                .push(InboundEvent::user_message("cron", "timer", "tick", "t1"))
                .await
                .map_err(|e| PluginError::TriggerFailed {
                    trigger: "tick".into(),
                    reason: e.to_string(),
                })
        }
    }

    struct Ticker;

    #[async_trait]
    impl Plugin for Ticker {
        fn id(&self) -> &str {
            "ticker"
        }
        fn name(&self) -> &str {
            "Ticker"
        }
        fn description(&self) -> &str {
            "Emits one tick at startup"
        }
        fn triggers(&self) -> Vec<Arc<dyn Trigger>> {
            vec![Arc::new(TickTrigger)]
        }
        fn executors(&self) -> Vec<Arc<dyn Executor>> {
            Vec::new()
        }
    }

    fn scripted(replies: Vec<&str>) -> Arc<ScriptedModel> {
        Arc::new(ScriptedModel::new(replies))
    }

    #[test]
    fn build_requires_text_generation() {
        let err = RuntimeBuilder::new().build().err().unwrap();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("text-generation"));
    }

    #[test]
    fn build_rejects_unbacked_plugin_capability() {
        let err = RuntimeBuilder::new()
            .with_provider(scripted(vec![]))
            .with_plugin(Arc::new(NeedsImages))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("painter"));
        assert!(err.to_string().contains("image-generation"));
    }

    #[test]
    fn build_rejects_plugin_collision() {
        let err = RuntimeBuilder::new()
            .with_provider(scripted(vec![]))
            .with_plugin(Arc::new(RecordingPlugin::new("rec", &["a"])))
            .with_plugin(Arc::new(RecordingPlugin::new("rec", &["b"])))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Plugin(PluginError::Collision { .. })));
    }

    #[test]
    fn alias_group_satisfies_text_capability() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let mut config = RuntimeConfig::default();
        config.text_capability = "llm".into();
        let runtime = RuntimeBuilder::new()
            .with_config(config)
            .with_provider(model)
            .with_alias_group(vec!["llm".into(), "text-generation".into()])
            .build()
            .unwrap();
        assert_eq!(runtime.router().resolve("llm"), "text-generation");
    }

    #[tokio::test]
    async fn failed_health_check_aborts_start() {
        let runtime = RuntimeBuilder::new()
            .with_provider(Arc::new(SickProvider))
            .build()
            .unwrap();
        let err = runtime.start().await.err().unwrap();
        assert!(err.to_string().contains("health check"));
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn stop_then_restart_resumes_queue() {
        let runtime = RuntimeBuilder::new()
            .with_provider(scripted(vec![r#"{"steps": []}"#, r#"{"steps": []}"#]))
            .build()
            .unwrap();

        let task = runtime.start().await.unwrap();
        assert!(runtime.is_running());
        assert!(runtime.start().await.is_err());

        runtime.stop();
        task.join().await.unwrap();
        assert!(!runtime.is_running());

        runtime
            .push(InboundEvent::user_message("u", "cli", "while stopped", "m1"))
            .await
            .unwrap();
        assert_eq!(runtime.pending(), 1);

        let mut state = runtime.subscribe_state();
        let mut events = runtime.subscribe_events();
        let task = runtime.start().await.unwrap();
        loop {
            let event = events.recv().await.unwrap();
            if matches!(event.as_ref(), DomainEvent::EventCompleted { .. }) {
                break;
            }
        }
        assert_eq!(runtime.pending(), 0);
        state.wait_for(|s| *s == LoopState::Idle).await.unwrap();

        runtime.stop();
        task.join().await.unwrap();
    }

    #[tokio::test]
    async fn triggers_start_once_and_feed_the_queue() {
        let runtime = RuntimeBuilder::new()
            .with_provider(scripted(vec![r#"{"steps": []}"#]))
            .with_plugin(Arc::new(Ticker))
            .build()
            .unwrap();
        let mut events = runtime.subscribe_events();

        let task = runtime.start().await.unwrap();
        loop {
            let event = events.recv().await.unwrap();
            if matches!(event.as_ref(), DomainEvent::EventCompleted { .. }) {
                break;
            }
        }
        runtime.stop();
        task.join().await.unwrap();

        let task = runtime.start().await.unwrap();
        assert_eq!(runtime.pending(), 0);
        runtime.stop();
        task.join().await.unwrap();
    }

    struct CountingTrigger(Arc<AtomicUsize>);

    #[async_trait]
    impl Trigger for CountingTrigger {
        fn id(&self) -> &str {
            "counter"
        }
        async fn start(&self, _queue: QueueHandle) -> std::result::Result<(), PluginError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(())
        }
    }

    struct Counted(Arc<AtomicUsize>);

    #[async_trait]
    impl Plugin for Counted {
        fn id(&self) -> &str {
            "counted"
        }
        fn name(&self) -> &str {
            "Counted"
        }
        fn description(&self) -> &str {
            "Counts trigger starts"
        }
        fn triggers(&self) -> Vec<Arc<dyn Trigger>> {
            vec![Arc::new(CountingTrigger(self.0.clone()))]
        }
        fn executors(&self) -> Vec<Arc<dyn Executor>> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn concurrent_starts_initialize_once() {
        let starts = Arc::new(AtomicUsize::new(0));
        let runtime = RuntimeBuilder::new()
            .with_provider(scripted(vec![]))
            .with_plugin(Arc::new(Counted(starts.clone())))
            .build()
            .unwrap();

        let (a, b) = tokio::join!(runtime.start(), runtime.start());
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        let task = a.or(b).unwrap();
        runtime.stop();
        task.join().await.unwrap();
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn panicking_loop_leaves_runtime_restartable() {
        let model = ScriptedModel::from_fn(|_: &str| -> String { panic!("model crashed") });
        let runtime = RuntimeBuilder::new()
            .with_provider(Arc::new(model))
            .build()
            .unwrap();

        let task = runtime.start().await.unwrap();
        runtime
            .push(InboundEvent::user_message("u", "cli", "plan this", "m1"))
            .await
            .unwrap();

        let err = task.join().await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert!(!runtime.is_running());
        assert_eq!(runtime.state(), LoopState::Error);

        let task = runtime.start().await.unwrap();
        assert!(runtime.is_running());
        runtime.stop();
        task.join().await.unwrap();

        // The receiver came back, so the queue still accepts events.
        runtime
            .push(InboundEvent::user_message("u", "cli", "still there?", "m2"))
            .await
            .unwrap();
        assert_eq!(runtime.pending(), 1);
    }
}
