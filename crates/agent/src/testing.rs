//! Scripted collaborators for tests.
//!
//! [`ScriptedModel`] stands in for a text-generation provider and
//! [`RecordingPlugin`] for a plugin whose executors only record that they
//! ran. Both are public so embedding applications can test their own plugins
//! against a real runtime.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use weft_core::agent::RuntimeHandle;
use weft_core::capability::{
    CapabilityDescriptor, CapabilityRouter, ExecuteConfig, ModelProvider,
};
use weft_core::error::{CapabilityError, Error, PluginError};
use weft_core::event_context::{EventContext, EventSink, InboundEvent, QueueHandle};
use weft_core::pipeline::PipelineStep;
use weft_core::plugin::{Executor, ExecutorOutput, Plugin};
use weft_providers::ModelRouter;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Responder = Box<dyn Fn(&str) -> String + Send + Sync>;

enum Script {
    Queue(Mutex<VecDeque<Result<String, String>>>),
    Function(Responder),
}

/// A text-generation provider that replays scripted completions.
///
/// Every request prompt and temperature is recorded. A queue-based script
/// that runs dry answers with a provider error.
pub struct ScriptedModel {
    id: String,
    script: Script,
    prompts: Mutex<Vec<String>>,
    temperatures: Mutex<Vec<Option<f32>>>,
}

impl ScriptedModel {
    /// Replay `replies` in order.
    pub fn new(replies: Vec<&str>) -> Self {
        Self::from_replies(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    /// Replay replies in order; `Err` entries fail the model call.
    pub fn from_replies(replies: Vec<Result<String, String>>) -> Self {
        Self::with_script(Script::Queue(Mutex::new(replies.into())))
    }

    /// Answer every request by calling `respond` with the prompt.
    pub fn from_fn<F>(respond: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::with_script(Script::Function(Box::new(respond)))
    }

    fn with_script(script: Script) -> Self {
        Self {
            id: "scripted".into(),
            script,
            prompts: Mutex::new(Vec::new()),
            temperatures: Mutex::new(Vec::new()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    /// Every prompt received, in order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn temperatures(&self) -> Vec<Option<f32>> {
        lock(&self.temperatures).clone()
    }

    /// A router with only this model registered.
    pub fn router(self: &Arc<Self>) -> Arc<dyn CapabilityRouter> {
        let mut router = ModelRouter::new();
        let provider: Arc<dyn ModelProvider> = self.clone();
        // A fresh router has no providers, so registration cannot collide.
        let _ = router.register_provider(provider);
        Arc::new(router)
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        vec![CapabilityDescriptor::text_generation()]
    }

    async fn execute(
        &self,
        _capability_id: &str,
        input: Value,
        config: &ExecuteConfig,
    ) -> Result<Value, CapabilityError> {
        let prompt = input
            .get("prompt")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        lock(&self.temperatures).push(config.temperature);
        lock(&self.prompts).push(prompt.clone());

        let reply = match &self.script {
            Script::Function(respond) => Ok(respond(&prompt)),
            Script::Queue(replies) => lock(replies)
                .pop_front()
                .unwrap_or_else(|| Err("script exhausted".to_string())),
        };
        reply.map(Value::String).map_err(|message| CapabilityError::Execution {
            provider: self.id.clone(),
            message,
        })
    }
}

/// How a [`RecordingPlugin`] executor responds.
#[derive(Debug, Clone, Copy)]
pub enum StepBehavior {
    /// Succeed with `"<plugin>.<action>"` as data
    Succeed,
    /// Return `success: false` with this error
    Report(&'static str),
    /// Return `Err` with this reason
    Throw(&'static str),
    /// Panic with this message
    Panic(&'static str),
}

/// A plugin whose executors record every call.
pub struct RecordingPlugin {
    id: String,
    executors: Vec<Arc<dyn Executor>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
    behaviors: Arc<Mutex<HashMap<String, StepBehavior>>>,
}

impl RecordingPlugin {
    pub fn new(id: &str, actions: &[&str]) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let behaviors = Arc::new(Mutex::new(HashMap::new()));
        let executors = actions
            .iter()
            .map(|action| {
                Arc::new(RecordingExecutor {
                    plugin: id.to_string(),
                    action: action.to_string(),
                    calls: calls.clone(),
                    behaviors: behaviors.clone(),
                }) as Arc<dyn Executor>
            })
            .collect();
        Self {
            id: id.to_string(),
            executors,
            calls,
            behaviors,
        }
    }

    pub fn with_behavior(self, action: &str, behavior: StepBehavior) -> Self {
        lock(&self.behaviors).insert(action.to_string(), behavior);
        self
    }

    /// Actions run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|(_, action)| action.clone()).collect()
    }

    /// `(event_id, action)` for every call, in order.
    pub fn calls_by_event(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Records every executed action"
    }

    fn executors(&self) -> Vec<Arc<dyn Executor>> {
        self.executors.clone()
    }
}

struct RecordingExecutor {
    plugin: String,
    action: String,
    calls: Arc<Mutex<Vec<(String, String)>>>,
    behaviors: Arc<Mutex<HashMap<String, StepBehavior>>>,
}

#[async_trait]
impl Executor for RecordingExecutor {
    fn name(&self) -> &str {
        &self.action
    }

    fn description(&self) -> &str {
        "Records the call"
    }

    async fn execute(
        &self,
        step: &PipelineStep,
        event: &EventContext,
        _runtime: &RuntimeHandle,
    ) -> Result<ExecutorOutput, PluginError> {
        lock(&self.calls).push((event.event_id.clone(), step.action.clone()));
        // Yield so concurrent producers get a chance to interleave.
        tokio::task::yield_now().await;

        let behavior = lock(&self.behaviors)
            .get(&self.action)
            .copied()
            .unwrap_or(StepBehavior::Succeed);
        match behavior {
            StepBehavior::Succeed => {
                Ok(ExecutorOutput::ok(format!("{}.{}", self.plugin, self.action)))
            }
            StepBehavior::Report(error) => Ok(ExecutorOutput::failed(error)),
            StepBehavior::Throw(reason) => Err(PluginError::ExecutionFailed {
                plugin: self.plugin.clone(),
                action: self.action.clone(),
                reason: reason.to_string(),
            }),
            StepBehavior::Panic(message) => panic!("{message}"),
        }
    }
}

/// A queue handle that discards everything pushed into it.
pub fn null_queue() -> QueueHandle {
    struct NullQueue;

    #[async_trait]
    impl EventSink for NullQueue {
        async fn push(&self, _event: InboundEvent) -> Result<(), Error> {
            Ok(())
        }
    }

    Arc::new(NullQueue)
}
