use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use weft_core::agent::RuntimeHandle;
use weft_core::capability::{CapabilityDescriptor, ExecuteConfig, ModelProvider};
use weft_core::error::{CapabilityError, Error};
use weft_core::event::EventBus;
use weft_core::event_context::{EventContext, EventSink, InboundEvent};
use weft_memory::InMemoryMemory;
use weft_providers::ModelRouter;

struct DiscardSink;

#[async_trait]
impl EventSink for DiscardSink {
    async fn push(&self, _event: InboundEvent) -> Result<(), Error> {
        Ok(())
    }
}

/// Answers every prompt with `echo: <prompt>`.
pub struct EchoModel;

#[async_trait]
impl ModelProvider for EchoModel {
    fn id(&self) -> &str {
        "echo"
    }

    fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        vec![CapabilityDescriptor::text_generation()]
    }

    async fn execute(
        &self,
        _capability_id: &str,
        input: Value,
        _config: &ExecuteConfig,
    ) -> Result<Value, CapabilityError> {
        let prompt = input["prompt"].as_str().unwrap_or_default();
        Ok(Value::String(format!("echo: {prompt}")))
    }
}

pub fn handle() -> RuntimeHandle {
    let mut router = ModelRouter::new();
    router.register_provider(Arc::new(EchoModel)).unwrap();
    RuntimeHandle::new(
        Arc::new(router),
        Arc::new(InMemoryMemory::new()),
        Arc::new(DiscardSink),
        Arc::new(EventBus::default()),
    )
}

pub fn user_event(message: &str) -> EventContext {
    EventContext::from_inbound(
        InboundEvent::user_message("u1", "cli", message, "m1"),
        Arc::new(DiscardSink),
    )
}
