//! Reply plugin: delivers the latest result through the platform's
//! response handler.

use std::sync::Arc;

use async_trait::async_trait;
use weft_core::agent::RuntimeHandle;
use weft_core::error::PluginError;
use weft_core::event_context::EventContext;
use weft_core::pipeline::PipelineStep;
use weft_core::plugin::{Executor, ExecutorOutput, Plugin};

pub struct ReplyPlugin;

#[async_trait]
impl Plugin for ReplyPlugin {
    fn id(&self) -> &str {
        "reply"
    }

    fn name(&self) -> &str {
        "Reply"
    }

    fn description(&self) -> &str {
        "Sends the most recent result back to the user on their platform"
    }

    fn executors(&self) -> Vec<Arc<dyn Executor>> {
        vec![Arc::new(SendResponse)]
    }
}

struct SendResponse;

#[async_trait]
impl Executor for SendResponse {
    fn name(&self) -> &str {
        "send_response"
    }

    fn description(&self) -> &str {
        "Sends the latest non-error result to the user. Run it last."
    }

    async fn execute(
        &self,
        _step: &PipelineStep,
        event: &EventContext,
        _runtime: &RuntimeHandle,
    ) -> Result<ExecutorOutput, PluginError> {
        let Some(platform) = &event.platform_context else {
            return Ok(ExecutorOutput::failed("event has no platform to reply on"));
        };

        let Some(message) = event
            .context_chain
            .items()
            .iter()
            .rev()
            .find(|item| !item.is_error() && item.as_user_input().is_none())
        else {
            return Ok(ExecutorOutput::failed("nothing to send yet"));
        };

        match platform.respond(&message.content).await {
            Ok(()) => Ok(ExecutorOutput::done()),
            Err(e) => Ok(ExecutorOutput::failed(e.to_string())),
        }
    }
}
