//! Context items and the context chain, the working memory of one event.
//!
//! Every event starts with a single item (usually user input) and grows as
//! pipeline steps execute. The chain is append-or-merge: an item whose
//! `(plugin_id, action)` pair matches an existing non-error entry is merged
//! into that entry in place, so the chain holds at most one current entry
//! per pair. Error items always append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::HistoryMessage;
use crate::pipeline::PipelineStep;

/// Plugin id used for items produced by the core itself.
pub const SYSTEM_PLUGIN_ID: &str = "system";

/// Action name for error items appended by the loop.
pub const ERROR_ACTION: &str = "error";

/// Raw user input plus the conversation history fetched for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInput {
    pub user_id: String,
    pub platform: String,
    pub raw_message: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryMessage>,
}

/// The typed payload carried by a context item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextPayload {
    /// The originating user message
    UserInput(UserInput),

    /// A failed step
    Error {
        error: String,
        #[serde(default, rename = "failedStep", skip_serializing_if = "Option::is_none")]
        failed_step: Option<PipelineStep>,
    },

    /// Arbitrary executor output
    Data {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
}

/// One record in the context chain. Immutable by convention once pushed;
/// only the chain's merge rule rewrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub id: String,
    pub plugin_id: String,
    pub action: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: ContextPayload,
}

impl ContextItem {
    /// A data item produced by a plugin action.
    pub fn data(
        plugin_id: impl Into<String>,
        action: impl Into<String>,
        content: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            plugin_id: plugin_id.into(),
            action: action.into(),
            content: content.into(),
            timestamp: Utc::now(),
            payload: ContextPayload::Data { data },
        }
    }

    /// A user-input item originating from a platform trigger.
    pub fn user_input(
        plugin_id: impl Into<String>,
        user_id: impl Into<String>,
        platform: impl Into<String>,
        raw_message: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        let raw_message = raw_message.into();
        Self {
            id: Uuid::new_v4().to_string(),
            plugin_id: plugin_id.into(),
            action: "user_input".into(),
            content: raw_message.clone(),
            timestamp: Utc::now(),
            payload: ContextPayload::UserInput(UserInput {
                user_id: user_id.into(),
                platform: platform.into(),
                raw_message,
                message_id: message_id.into(),
                history: Vec::new(),
            }),
        }
    }

    /// An error item, optionally naming the step that failed.
    pub fn error(error: impl Into<String>, failed_step: Option<PipelineStep>) -> Self {
        let error = error.into();
        let (plugin_id, action) = match &failed_step {
            Some(step) => (step.plugin_id.clone(), step.action.clone()),
            None => (SYSTEM_PLUGIN_ID.to_string(), ERROR_ACTION.to_string()),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            plugin_id,
            action,
            content: format!("Error: {error}"),
            timestamp: Utc::now(),
            payload: ContextPayload::Error { error, failed_step },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ContextPayload::Error { .. })
    }

    pub fn as_user_input(&self) -> Option<&UserInput> {
        match &self.payload {
            ContextPayload::UserInput(input) => Some(input),
            _ => None,
        }
    }

    /// Field-wise overwrite with the values of `newer`. The entry keeps its id.
    ///
    /// When both payloads are data objects their keys are merged, newer
    /// keys winning; any other payload combination is replaced outright.
    fn merge_from(&mut self, newer: ContextItem) {
        self.content = newer.content;
        self.timestamp = newer.timestamp;
        match (&mut self.payload, newer.payload) {
            (
                ContextPayload::Data {
                    data: Some(serde_json::Value::Object(existing)),
                },
                ContextPayload::Data {
                    data: Some(serde_json::Value::Object(incoming)),
                },
            ) => existing.extend(incoming),
            (slot, payload) => *slot = payload,
        }
    }
}

/// Ordered append/merge log of context items for one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextChain {
    items: Vec<ContextItem>,
}

impl ContextChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a chain with its originating item.
    pub fn with_item(item: ContextItem) -> Self {
        Self { items: vec![item] }
    }

    /// Append `item`, or merge it into the existing entry with the same
    /// `(plugin_id, action)`. Returns the index the item landed at.
    pub fn push(&mut self, item: ContextItem) -> usize {
        if !item.is_error() {
            let existing = self.items.iter().position(|e| {
                !e.is_error() && e.plugin_id == item.plugin_id && e.action == item.action
            });
            if let Some(index) = existing {
                self.items[index].merge_from(item);
                return index;
            }
        }
        self.items.push(item);
        self.items.len() - 1
    }

    pub fn items(&self) -> &[ContextItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&ContextItem> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&ContextItem> {
        self.items.last()
    }

    /// The originating user input, if this event came from a user.
    pub fn user_input(&self) -> Option<&UserInput> {
        self.items.iter().find_map(ContextItem::as_user_input)
    }

    /// Attach conversation history to the first item when it is user input.
    /// Returns whether anything was attached.
    pub fn attach_history(&mut self, history: Vec<HistoryMessage>) -> bool {
        match self.items.first_mut().map(|item| &mut item.payload) {
            Some(ContextPayload::UserInput(input)) => {
                input.history = history;
                true
            }
            _ => false,
        }
    }

    /// Number of error entries recorded so far.
    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_error()).count()
    }

    /// Pretty JSON rendering used in planning prompts.
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(&self.items).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_pair_merges_with_latest_values() {
        let mut chain = ContextChain::new();
        let first = chain.push(ContextItem::data(
            "weather",
            "lookup",
            "cloudy",
            Some(json!({"temp": 10})),
        ));
        let original_id = chain.items()[0].id.clone();
        let second = chain.push(ContextItem::data(
            "weather",
            "lookup",
            "sunny",
            Some(json!({"temp": 21, "wind": "low"})),
        ));

        assert_eq!(first, second);
        assert_eq!(chain.len(), 1);
        let item = &chain.items()[0];
        assert_eq!(item.id, original_id);
        assert_eq!(item.content, "sunny");
        assert_eq!(
            item.payload,
            ContextPayload::Data {
                data: Some(json!({"temp": 21, "wind": "low"}))
            }
        );
    }

    #[test]
    fn merge_keeps_keys_only_in_older_payload() {
        let mut chain = ContextChain::new();
        chain.push(ContextItem::data("p", "a", "1", Some(json!({"keep": true, "n": 1}))));
        chain.push(ContextItem::data("p", "a", "2", Some(json!({"n": 2}))));
        assert_eq!(
            chain.items()[0].payload,
            ContextPayload::Data {
                data: Some(json!({"keep": true, "n": 2}))
            }
        );
    }

    #[test]
    fn different_pairs_append() {
        let mut chain = ContextChain::new();
        chain.push(ContextItem::data("p", "a", "1", None));
        chain.push(ContextItem::data("p", "b", "2", None));
        chain.push(ContextItem::data("q", "a", "3", None));
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.last().unwrap().content, "3");
    }

    #[test]
    fn repeated_errors_append_distinct_entries() {
        let mut chain = ContextChain::new();
        let step = PipelineStep::new("p", "a");
        chain.push(ContextItem::error("boom", Some(step.clone())));
        chain.push(ContextItem::error("boom again", Some(step)));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.error_count(), 2);
    }

    #[test]
    fn data_after_error_for_same_pair_does_not_overwrite_error() {
        let mut chain = ContextChain::new();
        let step = PipelineStep::new("p", "a");
        chain.push(ContextItem::error("boom", Some(step)));
        chain.push(ContextItem::data("p", "a", "ok", None));
        assert_eq!(chain.len(), 2);
        assert!(chain.items()[0].is_error());
    }

    #[test]
    fn history_attaches_only_to_user_input() {
        let mut chain =
            ContextChain::with_item(ContextItem::user_input("chat", "u1", "cli", "hi", "m1"));
        assert!(chain.attach_history(vec![HistoryMessage::user("earlier")]));
        assert_eq!(chain.user_input().unwrap().history.len(), 1);

        let mut timer = ContextChain::with_item(ContextItem::data("timer", "tick", "", None));
        assert!(!timer.attach_history(vec![HistoryMessage::user("x")]));
    }

    #[test]
    fn item_serializes_with_type_tag() {
        let item = ContextItem::error("nope", Some(PipelineStep::new("p", "a")));
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["pluginId"], "p");
        assert_eq!(value["failedStep"]["action"], "a");
    }
}
