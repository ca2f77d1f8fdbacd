//! Pipeline generation and modification.
//!
//! The engine plans an event's pipeline up front and, after every executed
//! step, asks whether the rest of the plan should change. Both calls go
//! through the structured retrieval protocol. Failures never escape: a failed
//! generation yields an empty pipeline and a failed modification check keeps
//! the current plan. Both are logged and published on the event bus.

use std::sync::Arc;

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use weft_core::event::{DomainEvent, EventBus};
use weft_core::event_context::EventContext;
use weft_core::pipeline::{Pipeline, PipelineStep};
use weft_core::plugin::PluginRegistry;

use crate::prompts;
use crate::retrieval::{RetrievalOptions, StructuredRetriever};

/// Sampling temperature used for planning unless configured otherwise.
pub const DEFAULT_PLANNING_TEMPERATURE: f32 = 0.2;

/// The planner's answer to "should the remaining plan change?".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModificationDecision {
    pub should_modify: bool,

    #[serde(default)]
    pub explanation: String,

    /// Replacement for every step after the one just executed
    #[serde(default)]
    pub modified_steps: Option<Vec<PipelineStep>>,
}

impl ModificationDecision {
    /// Keep the current plan.
    pub fn keep() -> Self {
        Self::default()
    }

    /// The continuation to splice in, if this decision asks for one.
    pub fn continuation(self) -> Option<Vec<PipelineStep>> {
        if self.should_modify {
            self.modified_steps
        } else {
            None
        }
    }
}

/// Plans and re-plans pipelines for events.
pub struct PipelineEngine {
    retriever: StructuredRetriever,
    plugins: Arc<PluginRegistry>,
    events: Arc<EventBus>,
    temperature: f32,
}

impl PipelineEngine {
    pub fn new(
        retriever: StructuredRetriever,
        plugins: Arc<PluginRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            retriever,
            plugins,
            events,
            temperature: DEFAULT_PLANNING_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn options(&self) -> RetrievalOptions {
        self.retriever.options().with_temperature(self.temperature)
    }

    /// Plan the pipeline for an event. Returns an empty pipeline on failure.
    pub async fn generate(&self, event: &EventContext) -> Pipeline {
        let roster = prompts::render_roster(&self.plugins.roster());
        let history = event
            .context_chain
            .user_input()
            .map(|input| prompts::render_history(&input.history));
        let prompt = prompts::planning(&roster, &event.context_chain.render(), history.as_deref());

        match self.retriever.get_object::<Pipeline>(&prompt, &self.options()).await {
            Ok(retrieved) => {
                let pipeline = retrieved.value;
                info!(
                    event_id = %event.event_id,
                    steps = pipeline.len(),
                    attempts = retrieved.attempts,
                    "Pipeline generated"
                );
                self.events.publish(DomainEvent::PipelineGenerated {
                    event_id: event.event_id.clone(),
                    steps: pipeline.len(),
                    timestamp: Utc::now(),
                });
                pipeline
            }
            Err(e) => {
                warn!(
                    event_id = %event.event_id,
                    error = %e,
                    "Pipeline generation failed, continuing with an empty plan"
                );
                self.events.publish(DomainEvent::PlanningFailed {
                    event_id: event.event_id.clone(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Pipeline::empty()
            }
        }
    }

    /// Decide whether the steps after `index` should be replaced. Returns
    /// [`ModificationDecision::keep`] on failure.
    pub async fn check_modification(
        &self,
        event: &EventContext,
        pipeline: &Pipeline,
        index: usize,
    ) -> ModificationDecision {
        let Some(executed) = pipeline.get(index) else {
            return ModificationDecision::keep();
        };

        let roster = prompts::render_roster(&self.plugins.roster());
        let remaining = prompts::render_steps(pipeline.remaining_after(index));
        let prompt = prompts::modification(
            &roster,
            &event.context_chain.render(),
            executed,
            &remaining,
        );

        match self
            .retriever
            .get_object::<ModificationDecision>(&prompt, &self.options())
            .await
        {
            Ok(retrieved) => {
                debug!(
                    event_id = %event.event_id,
                    step = %executed,
                    should_modify = retrieved.value.should_modify,
                    "Modification check complete"
                );
                retrieved.value
            }
            Err(e) => {
                warn!(
                    event_id = %event.event_id,
                    step = %executed,
                    error = %e,
                    "Modification check failed, keeping the current plan"
                );
                self.events.publish(DomainEvent::ReplanFailed {
                    event_id: event.event_id.clone(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                ModificationDecision::keep()
            }
        }
    }
}
