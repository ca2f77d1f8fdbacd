//! Everything the loop knows about one in-flight event.
//!
//! An [`InboundEvent`] is what triggers hand to the queue. The queue turns it
//! into an [`EventContext`] by attaching a conversation id and the queue
//! handle. The queue owns the context while it is enqueued and hands it to
//! the evaluation loop when it becomes current; it is never shared.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::context::{ContextChain, ContextItem};
use crate::error::{Error, PluginError};
use crate::message::ConversationId;

/// Where events enter the runtime. Triggers and executors hold one of these.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Prepare and enqueue an inbound event.
    async fn push(&self, event: InboundEvent) -> Result<(), Error>;
}

/// Shared handle to the runtime's event queue.
pub type QueueHandle = Arc<dyn EventSink>;

/// Delivers a response back to the platform an event came from.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn send(&self, content: &str) -> Result<(), PluginError>;
}

/// Platform-specific data attached by the trigger that created an event.
#[derive(Clone, Default)]
pub struct PlatformContext {
    /// Platform name (e.g., "cli", "discord", "http")
    pub platform: String,

    /// Free-form platform metadata (channel ids, reply tokens, ...)
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// How to reply on this platform, if replies are possible
    pub response_handler: Option<Arc<dyn ResponseHandler>>,
}

impl PlatformContext {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            ..Self::default()
        }
    }

    pub fn with_response_handler(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.response_handler = Some(handler);
        self
    }

    /// Send `content` through the response handler.
    pub async fn respond(&self, content: &str) -> Result<(), PluginError> {
        match &self.response_handler {
            Some(handler) => handler.send(content).await,
            None => Err(PluginError::ResponseFailed(format!(
                "platform '{}' has no response handler",
                self.platform
            ))),
        }
    }
}

impl std::fmt::Debug for PlatformContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformContext")
            .field("platform", &self.platform)
            .field("metadata", &self.metadata)
            .field("response_handler", &self.response_handler.is_some())
            .finish()
    }
}

/// An event as produced by a trigger, before it is enqueued.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub context_chain: ContextChain,
    pub conversation_id: Option<ConversationId>,
    pub platform_context: Option<PlatformContext>,
}

impl InboundEvent {
    /// An event starting from an arbitrary item (timers, callbacks).
    pub fn new(item: ContextItem) -> Self {
        Self {
            context_chain: ContextChain::with_item(item),
            conversation_id: None,
            platform_context: None,
        }
    }

    /// An event carrying a user message.
    pub fn user_message(
        user_id: impl Into<String>,
        platform: impl Into<String>,
        message: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        let platform = platform.into();
        let item = ContextItem::user_input(
            platform.clone(),
            user_id,
            platform.clone(),
            message,
            message_id,
        );
        Self {
            context_chain: ContextChain::with_item(item),
            conversation_id: None,
            platform_context: Some(PlatformContext::new(platform)),
        }
    }

    pub fn with_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_platform_context(mut self, platform_context: PlatformContext) -> Self {
        self.platform_context = Some(platform_context);
        self
    }
}

/// An enqueued or current event.
pub struct EventContext {
    /// Unique id for logging and ordering
    pub event_id: String,
    pub context_chain: ContextChain,
    pub conversation_id: ConversationId,
    pub platform_context: Option<PlatformContext>,
    pub queue: QueueHandle,
    /// Whether history has been attached and the inbound message stored
    pub prepared: bool,
}

impl EventContext {
    /// Wrap an inbound event. A missing conversation id gets a fresh one.
    pub fn from_inbound(event: InboundEvent, queue: QueueHandle) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            context_chain: event.context_chain,
            conversation_id: event.conversation_id.unwrap_or_default(),
            platform_context: event.platform_context,
            queue,
            prepared: false,
        }
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("event_id", &self.event_id)
            .field("context_chain", &self.context_chain)
            .field("conversation_id", &self.conversation_id)
            .field("platform_context", &self.platform_context)
            .field("prepared", &self.prepared)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn push(&self, _event: InboundEvent) -> Result<(), Error> {
            Ok(())
        }
    }

    struct Capture(Mutex<Vec<String>>);

    #[async_trait]
    impl ResponseHandler for Capture {
        async fn send(&self, content: &str) -> Result<(), PluginError> {
            self.0.lock().unwrap().push(content.to_string());
            Ok(())
        }
    }

    #[test]
    fn user_message_builds_user_input_item() {
        let event = InboundEvent::user_message("u1", "cli", "what time is it?", "m1");
        let input = event.context_chain.user_input().unwrap();
        assert_eq!(input.user_id, "u1");
        assert_eq!(input.platform, "cli");
        assert_eq!(input.raw_message, "what time is it?");
        assert_eq!(event.platform_context.unwrap().platform, "cli");
    }

    #[test]
    fn from_inbound_assigns_ids() {
        let queue: QueueHandle = Arc::new(NullSink);
        let a = EventContext::from_inbound(
            InboundEvent::user_message("u", "p", "m", "1"),
            queue.clone(),
        );
        let b = EventContext::from_inbound(
            InboundEvent::user_message("u", "p", "m", "2")
                .with_conversation(ConversationId::from("c1")),
            queue,
        );
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(b.conversation_id, ConversationId::from("c1"));
        assert!(!a.prepared);
    }

    #[tokio::test]
    async fn respond_uses_handler() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let ctx = PlatformContext::new("cli").with_response_handler(capture.clone());
        ctx.respond("hello").await.unwrap();
        assert_eq!(capture.0.lock().unwrap().as_slice(), ["hello".to_string()]);

        let err = PlatformContext::new("cli").respond("x").await.unwrap_err();
        assert!(matches!(err, PluginError::ResponseFailed(_)));
    }
}
