//! Chat plugin: drafts a conversational reply from the event's context.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use weft_core::agent::RuntimeHandle;
use weft_core::capability::{ExecuteConfig, TextGenerationInput, TEXT_GENERATION};
use weft_core::error::PluginError;
use weft_core::event_context::EventContext;
use weft_core::pipeline::PipelineStep;
use weft_core::plugin::{Executor, ExecutorOutput, Plugin};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's latest \
message using the results already gathered in the event context. Reply with plain text only.";

pub struct ChatPlugin {
    system_prompt: Arc<str>,
    temperature: Option<f32>,
}

impl ChatPlugin {
    pub fn new() -> Self {
        Self {
            system_prompt: Arc::from(DEFAULT_SYSTEM_PROMPT),
            temperature: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Arc::from(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

impl Default for ChatPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ChatPlugin {
    fn id(&self) -> &str {
        "chat"
    }

    fn name(&self) -> &str {
        "Chat"
    }

    fn description(&self) -> &str {
        "Writes a natural-language reply to the user"
    }

    fn required_capabilities(&self) -> Vec<String> {
        vec![TEXT_GENERATION.into()]
    }

    fn executors(&self) -> Vec<Arc<dyn Executor>> {
        vec![Arc::new(GenerateReply {
            system_prompt: self.system_prompt.clone(),
            temperature: self.temperature,
        })]
    }
}

struct GenerateReply {
    system_prompt: Arc<str>,
    temperature: Option<f32>,
}

#[async_trait]
impl Executor for GenerateReply {
    fn name(&self) -> &str {
        "generate_reply"
    }

    fn description(&self) -> &str {
        "Drafts a reply to the user from everything gathered so far"
    }

    async fn execute(
        &self,
        step: &PipelineStep,
        event: &EventContext,
        runtime: &RuntimeHandle,
    ) -> Result<ExecutorOutput, PluginError> {
        let Some(input) = event.context_chain.user_input() else {
            return Ok(ExecutorOutput::failed("there is no user message to reply to"));
        };

        let prompt = format!(
            "## Event context\n{}\n\n## Latest message\n{}\n",
            event.context_chain.render(),
            input.raw_message
        );
        let config = ExecuteConfig {
            temperature: self.temperature,
            ..ExecuteConfig::default()
        };

        debug!(event_id = %event.event_id, "Generating chat reply");
        let reply = runtime
            .models()
            .generate_text(
                TextGenerationInput::new(prompt).with_system_prompt(self.system_prompt.as_ref()),
                &config,
            )
            .await
            .map_err(|e| PluginError::ExecutionFailed {
                plugin: step.plugin_id.clone(),
                action: step.action.clone(),
                reason: e.to_string(),
            })?;

        Ok(ExecutorOutput::ok(reply.trim().to_string()))
    }
}
