//! The evaluation loop, the single consumer of the event queue.
//!
//! One event is current at a time. For each event the loop plans a pipeline,
//! walks it one index at a time, lets the planner splice the remainder after
//! every step, and persists the final chain entry. Step failures become error
//! items in the chain. Anything else is loop-fatal: the loop enters
//! [`LoopState::Error`] and returns the error.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use weft_core::agent::{LoopState, RuntimeHandle};
use weft_core::context::ContextItem;
use weft_core::error::{PluginError, Result};
use weft_core::event::DomainEvent;
use weft_core::event_context::EventContext;
use weft_core::pipeline::PipelineStep;
use weft_core::plugin::PluginRegistry;

use crate::planner::PipelineEngine;
use crate::queue::{prepare_event, QueueReceiver};

/// Default cap on executed steps per event.
pub const DEFAULT_MAX_STEPS_PER_EVENT: usize = 25;

/// Drives events from the queue through planning and execution.
pub struct EvaluationLoop {
    engine: PipelineEngine,
    plugins: Arc<PluginRegistry>,
    runtime: RuntimeHandle,
    state: watch::Sender<LoopState>,
    history_limit: usize,
    max_steps: usize,
}

impl EvaluationLoop {
    pub fn new(
        engine: PipelineEngine,
        plugins: Arc<PluginRegistry>,
        runtime: RuntimeHandle,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            engine,
            plugins,
            runtime,
            state,
            history_limit: 10,
            max_steps: DEFAULT_MAX_STEPS_PER_EVENT,
        }
    }

    /// History attached to events the loop prepares itself.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max.max(1);
        self
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Record that the loop died without returning, e.g. by panicking.
    pub(crate) fn mark_failed(&self) {
        self.set_state(LoopState::Error);
    }

    fn set_state(&self, state: LoopState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Loop state changed");
            self.runtime.events().publish(DomainEvent::LoopStateChanged {
                state,
                timestamp: Utc::now(),
            });
        }
    }

    /// Drain `queue` until shutdown is signalled or every producer is gone.
    ///
    /// Shutdown is observed between events; the current event always runs
    /// to completion. Events still queued stay in `queue`.
    pub async fn run(
        &self,
        queue: &mut QueueReceiver,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Evaluation loop started");
        self.set_state(LoopState::Idle);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let event = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = queue.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            let event_id = event.event_id.clone();
            if let Err(e) = self.process(event).await {
                error!(event_id = %event_id, error = %e, "Evaluation loop halted");
                self.set_state(LoopState::Error);
                return Err(e);
            }
            self.set_state(LoopState::Idle);
        }

        info!("Evaluation loop stopped");
        Ok(())
    }

    /// Process one event from dequeue to persistence.
    pub async fn process(&self, mut event: EventContext) -> Result<()> {
        self.set_state(LoopState::Planning);
        debug!(event_id = %event.event_id, "Processing event");

        if !event.prepared {
            prepare_event(self.runtime.memory().as_ref(), self.history_limit, &mut event).await?;
        }

        let mut pipeline = self.engine.generate(&event).await;

        self.set_state(LoopState::Executing);

        let mut index = 0;
        let mut executed = 0;
        while let Some(step) = pipeline.get(index).cloned() {
            if executed >= self.max_steps {
                warn!(
                    event_id = %event.event_id,
                    max_steps = self.max_steps,
                    "Step limit reached, abandoning the rest of the plan"
                );
                event.context_chain.push(ContextItem::error(
                    format!("step limit of {} reached", self.max_steps),
                    Some(step),
                ));
                break;
            }

            self.execute_step(&mut event, &step).await;
            executed += 1;

            let decision = self.engine.check_modification(&event, &pipeline, index).await;
            let explanation = decision.explanation.clone();
            if let Some(continuation) = decision.continuation() {
                info!(
                    event_id = %event.event_id,
                    after = %step,
                    new_steps = continuation.len(),
                    explanation = %explanation,
                    "Pipeline modified"
                );
                self.runtime.events().publish(DomainEvent::PipelineModified {
                    event_id: event.event_id.clone(),
                    after_step: index,
                    explanation,
                    new_steps: continuation.len(),
                    timestamp: Utc::now(),
                });
                pipeline.splice_after(index, continuation);
            }

            index += 1;
        }

        self.persist(&event).await?;

        info!(
            event_id = %event.event_id,
            steps = executed,
            errors = event.context_chain.error_count(),
            "Event completed"
        );
        self.runtime.events().publish(DomainEvent::EventCompleted {
            event_id: event.event_id.clone(),
            steps_executed: executed,
            errors: event.context_chain.error_count(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Run one step and record its outcome in the chain. Never fails.
    async fn execute_step(&self, event: &mut EventContext, step: &PipelineStep) {
        let started = Instant::now();

        let success = match self.plugins.find_executor(step) {
            Err(e) => {
                warn!(event_id = %event.event_id, step = %step, error = %e, "No executor for step");
                event
                    .context_chain
                    .push(ContextItem::error(e.to_string(), Some(step.clone())));
                false
            }
            Ok(executor) => {
                let outcome = AssertUnwindSafe(executor.execute(step, event, &self.runtime))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(PluginError::ExecutionFailed {
                            plugin: step.plugin_id.clone(),
                            action: step.action.clone(),
                            reason: format!("executor panicked: {}", panic_message(panic.as_ref())),
                        })
                    });

                match outcome {
                    Ok(output) if output.success => {
                        if let Some(data) = output.data {
                            let content = content_of(&data);
                            event.context_chain.push(ContextItem::data(
                                &step.plugin_id,
                                &step.action,
                                content,
                                Some(data),
                            ));
                        }
                        true
                    }
                    Ok(output) => {
                        let reason = output
                            .error
                            .unwrap_or_else(|| "executor reported failure".to_string());
                        warn!(
                            event_id = %event.event_id,
                            step = %step,
                            error = %reason,
                            "Step reported failure"
                        );
                        event.context_chain.push(ContextItem::error(reason, Some(step.clone())));
                        false
                    }
                    Err(e) => {
                        warn!(event_id = %event.event_id, step = %step, error = %e, "Step failed");
                        event
                            .context_chain
                            .push(ContextItem::error(e.to_string(), Some(step.clone())));
                        false
                    }
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(event_id = %event.event_id, step = %step, success, duration_ms, "Step executed");
        self.runtime.events().publish(DomainEvent::StepExecuted {
            event_id: event.event_id.clone(),
            plugin_id: step.plugin_id.clone(),
            action: step.action.clone(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    /// Store the chain's final entry as the assistant response. Events
    /// without user input have no conversation to persist into.
    async fn persist(&self, event: &EventContext) -> Result<()> {
        let Some(input) = event.context_chain.user_input() else {
            debug!(event_id = %event.event_id, "No user input, skipping persistence");
            return Ok(());
        };
        let final_message = event
            .context_chain
            .last()
            .map(|item| item.content.as_str())
            .unwrap_or_default();

        self.runtime
            .memory()
            .store_assistant_interaction(
                &input.user_id,
                &input.platform,
                final_message,
                &event.context_chain,
            )
            .await?;
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Human-readable content for a data item.
fn content_of(data: &Value) -> String {
    match data {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
