//! Domain events: telemetry out of the evaluation loop.
//!
//! Events are published when something interesting happens while an event
//! is processed. Planning failures are reported only here and in the logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::agent::LoopState;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An event entered the queue
    EventQueued {
        event_id: String,
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline was produced for an event (possibly empty)
    PipelineGenerated {
        event_id: String,
        steps: usize,
        timestamp: DateTime<Utc>,
    },

    /// Pipeline generation failed; the event runs with an empty plan
    PlanningFailed {
        event_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline step ran
    StepExecuted {
        event_id: String,
        plugin_id: String,
        action: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The remaining plan was replaced after a step
    PipelineModified {
        event_id: String,
        after_step: usize,
        explanation: String,
        new_steps: usize,
        timestamp: DateTime<Utc>,
    },

    /// The modification check failed; the original plan continues
    ReplanFailed {
        event_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// An event finished and was persisted
    EventCompleted {
        event_id: String,
        steps_executed: usize,
        errors: usize,
        timestamp: DateTime<Utc>,
    },

    /// The evaluation loop changed state
    LoopStateChanged {
        state: LoopState,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
