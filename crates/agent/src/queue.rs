//! The event queue. Triggers and executors hand events to the loop here.
//!
//! Producers call [`EventQueue::push`] from any task. Preparation (history
//! fetch, inbound persistence) runs on the producer's task before the event
//! becomes visible; the evaluation loop is the only consumer and drains the
//! channel strictly one event at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use weft_core::error::{Error, PluginError};
use weft_core::event::{DomainEvent, EventBus};
use weft_core::event_context::{
    EventContext, EventSink, InboundEvent, QueueHandle, ResponseHandler,
};
use weft_core::memory::MemoryProvider;

/// Producer side of the runtime's event queue.
pub struct EventQueue {
    this: Weak<EventQueue>,
    sender: mpsc::UnboundedSender<EventContext>,
    pending: Arc<AtomicUsize>,
    memory: Arc<dyn MemoryProvider>,
    events: Arc<EventBus>,
    history_limit: usize,
}

/// Consumer side, owned by the evaluation loop.
pub struct QueueReceiver {
    receiver: mpsc::UnboundedReceiver<EventContext>,
    pending: Arc<AtomicUsize>,
}

impl QueueReceiver {
    /// Wait for the next event. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<EventContext> {
        let event = self.receiver.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(event)
    }
}

impl EventQueue {
    pub fn new(
        memory: Arc<dyn MemoryProvider>,
        events: Arc<EventBus>,
        history_limit: usize,
    ) -> (Arc<Self>, QueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            sender,
            pending: pending.clone(),
            memory,
            events,
            history_limit,
        });
        (queue, QueueReceiver { receiver, pending })
    }

    /// This queue as a [`QueueHandle`].
    pub fn handle(&self) -> Result<QueueHandle, Error> {
        let queue = self.this.upgrade().ok_or(Error::QueueClosed)?;
        Ok(queue as QueueHandle)
    }

    /// Events enqueued but not yet taken by the loop.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Enqueue an already built context as is. Unprepared contexts are
    /// prepared by the loop when they become current.
    pub fn enqueue(&self, event: EventContext) -> Result<(), Error> {
        let event_id = event.event_id.clone();
        let conversation_id = event.conversation_id.to_string();

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(event).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::QueueClosed);
        }

        debug!(event_id = %event_id, pending = self.pending(), "Event enqueued");
        self.events.publish(DomainEvent::EventQueued {
            event_id,
            conversation_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl EventSink for EventQueue {
    async fn push(&self, mut event: InboundEvent) -> Result<(), Error> {
        if self.sender.is_closed() {
            return Err(Error::QueueClosed);
        }

        if event.conversation_id.is_none() {
            if let Some(input) = event.context_chain.user_input() {
                let conversation = self
                    .memory
                    .get_or_create_conversation(&input.user_id, &input.platform)
                    .await?;
                event.conversation_id = Some(conversation);
            }
        }

        let mut context = EventContext::from_inbound(event, self.handle()?);
        prepare_event(self.memory.as_ref(), self.history_limit, &mut context).await?;

        if let Some(platform) = context.platform_context.as_mut() {
            if let Some(inner) = platform.response_handler.take() {
                platform.response_handler = Some(Arc::new(LoggedResponseHandler {
                    inner,
                    event_id: context.event_id.clone(),
                    platform: platform.platform.clone(),
                }));
            }
        }

        self.enqueue(context)
    }
}

/// Attach recent history to the user-input item and persist the inbound
/// message. Events without user input are only marked prepared.
pub(crate) async fn prepare_event(
    memory: &dyn MemoryProvider,
    history_limit: usize,
    event: &mut EventContext,
) -> Result<(), Error> {
    if event.prepared {
        return Ok(());
    }

    if let Some(input) = event.context_chain.user_input().cloned() {
        let history = memory
            .get_recent_conversation_history(&input.user_id, &input.platform, Some(history_limit))
            .await?;
        debug!(
            event_id = %event.event_id,
            messages = history.len(),
            "Attaching conversation history"
        );
        event.context_chain.attach_history(history);

        let received_at = event
            .context_chain
            .first()
            .map(|item| item.timestamp)
            .unwrap_or_else(Utc::now);
        memory
            .store_user_interaction(
                &input.user_id,
                &input.platform,
                &input.raw_message,
                received_at,
                &input.message_id,
            )
            .await?;
    }

    event.prepared = true;
    Ok(())
}

/// Brackets a platform response handler with log lines.
struct LoggedResponseHandler {
    inner: Arc<dyn ResponseHandler>,
    event_id: String,
    platform: String,
}

#[async_trait]
impl ResponseHandler for LoggedResponseHandler {
    async fn send(&self, content: &str) -> Result<(), PluginError> {
        debug!(
            event_id = %self.event_id,
            platform = %self.platform,
            len = content.len(),
            "Sending response"
        );
        let result = self.inner.send(content).await;
        match &result {
            Ok(()) => {
                info!(event_id = %self.event_id, platform = %self.platform, "Response delivered")
            }
            Err(e) => warn!(
                event_id = %self.event_id,
                platform = %self.platform,
                error = %e,
                "Response delivery failed"
            ),
        }
        result
    }
}
