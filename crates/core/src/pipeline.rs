//! The ordered plan of plugin actions for one event.
//!
//! A pipeline is produced by the planner, walked one index at a time by the
//! evaluation loop, and may be spliced after any executed step when the
//! planner decides the remaining plan should change.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single planned action: run `action` on the plugin `plugin_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    /// Id of the plugin that owns the executor
    pub plugin_id: String,

    /// Executor name on that plugin
    pub action: String,
}

impl PipelineStep {
    pub fn new(plugin_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            action: action.into(),
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.plugin_id, self.action)
    }
}

/// An ordered sequence of pipeline steps.
///
/// Has no identity beyond the event it was generated for; it is dropped once
/// the event completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Pipeline {
    /// Steps in execution order
    pub steps: Vec<PipelineStep>,
}

impl Pipeline {
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self { steps }
    }

    /// A pipeline with no steps (the fail-open result of planning).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PipelineStep> {
        self.steps.get(index)
    }

    /// Steps planned after `index` that have not run yet.
    pub fn remaining_after(&self, index: usize) -> &[PipelineStep] {
        let start = (index + 1).min(self.steps.len());
        &self.steps[start..]
    }

    /// Replace everything after `index` with `continuation`.
    ///
    /// Steps `0..=index` are untouched; previously planned steps after
    /// `index` are discarded.
    pub fn splice_after(&mut self, index: usize, continuation: Vec<PipelineStep>) {
        let keep = (index + 1).min(self.steps.len());
        self.steps.truncate(keep);
        self.steps.extend(continuation);
    }
}
