//! Loop state and the runtime handle passed to plugins.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityRouter;
use crate::event::EventBus;
use crate::event_context::QueueHandle;
use crate::memory::MemoryProvider;

/// State of the evaluation loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Waiting for the next event
    #[default]
    Idle,
    /// Generating a pipeline for the current event
    Planning,
    /// Walking the current pipeline
    Executing,
    /// A loop-fatal error stopped processing
    Error,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopState::Idle => "idle",
            LoopState::Planning => "planning",
            LoopState::Executing => "executing",
            LoopState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Explicit handle to the runtime's collaborators.
///
/// Passed to every plugin `init` and executor call instead of any global
/// state, so executors can be tested with a hand-built handle.
#[derive(Clone)]
pub struct RuntimeHandle {
    models: Arc<dyn CapabilityRouter>,
    memory: Arc<dyn MemoryProvider>,
    queue: QueueHandle,
    events: Arc<EventBus>,
}

impl RuntimeHandle {
    pub fn new(
        models: Arc<dyn CapabilityRouter>,
        memory: Arc<dyn MemoryProvider>,
        queue: QueueHandle,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            models,
            memory,
            queue,
            events,
        }
    }

    /// Capability routing (model calls).
    pub fn models(&self) -> &Arc<dyn CapabilityRouter> {
        &self.models
    }

    pub fn memory(&self) -> &Arc<dyn MemoryProvider> {
        &self.memory
    }

    /// Queue for originating new events.
    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_starts_idle() {
        assert_eq!(LoopState::default(), LoopState::Idle);
        assert_eq!(LoopState::Executing.to_string(), "executing");
    }

    #[test]
    fn loop_state_serializes_snake_case() {
        let json = serde_json::to_string(&LoopState::Planning).unwrap();
        assert_eq!(json, "\"planning\"");
    }
}
