//! Structured object retrieval: schema-validated objects from free-form
//! model output.
//!
//! Each attempt asks the text-generation capability for a JSON value,
//! extracts the payload from the raw completion, parses it, and validates it
//! against the target schema. A failed attempt feeds the previous response
//! and the error back to the model. The caller either gets a conforming value
//! or a [`RetrievalError`] after exactly `max_retries` attempts.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use weft_core::capability::{CapabilityRouter, ExecuteConfig};
use weft_core::error::{AttemptError, RetrievalError};
use weft_core::schema::{describe_schema, schema_for, validate_against_schema};

use crate::prompts;

/// Attempts used when nothing else is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-call retrieval settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOptions {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_retries: u32,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Pin a specific provider instead of the capability default
    pub provider: Option<String>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            temperature: None,
            max_tokens: None,
            provider: None,
        }
    }
}

impl RetrievalOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    fn execute_config(&self) -> ExecuteConfig {
        ExecuteConfig {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..ExecuteConfig::default()
        }
    }
}

/// A successfully retrieved value.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieved<T> {
    pub value: T,
    /// Attempts used, 1-based
    pub attempts: u32,
    /// The completion the value was extracted from
    pub raw_response: String,
}

/// Runs the retrieval protocol over a capability router.
#[derive(Clone)]
pub struct StructuredRetriever {
    models: Arc<dyn CapabilityRouter>,
    capability: String,
    defaults: RetrievalOptions,
}

impl StructuredRetriever {
    /// `capability` is the text-generation capability id (aliases allowed).
    pub fn new(models: Arc<dyn CapabilityRouter>, capability: impl Into<String>) -> Self {
        Self {
            models,
            capability: capability.into(),
            defaults: RetrievalOptions::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: RetrievalOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// A copy of the default options, for per-call tweaking.
    pub fn options(&self) -> RetrievalOptions {
        self.defaults.clone()
    }

    /// Retrieve a value conforming to `schema`.
    pub async fn get_value(
        &self,
        schema: &Value,
        prompt: &str,
        options: &RetrievalOptions,
    ) -> Result<Retrieved<Value>, RetrievalError> {
        self.retrieve(schema, prompt, options, Ok).await
    }

    /// Retrieve a typed object. The schema is derived from `T`.
    pub async fn get_object<T>(
        &self,
        prompt: &str,
        options: &RetrievalOptions,
    ) -> Result<Retrieved<T>, RetrievalError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = schema_for::<T>();
        self.retrieve(&schema, prompt, options, |value| {
            serde_json::from_value(value).map_err(|e| AttemptError::Validation(vec![e.to_string()]))
        })
        .await
    }

    async fn retrieve<T, F>(
        &self,
        schema: &Value,
        prompt: &str,
        options: &RetrievalOptions,
        convert: F,
    ) -> Result<Retrieved<T>, RetrievalError>
    where
        F: Fn(Value) -> Result<T, AttemptError>,
    {
        let max_retries = options.max_retries.max(1);
        let schema_text = describe_schema(schema);
        let config = options.execute_config();

        let mut last_response: Option<String> = None;
        let mut last_error: Option<AttemptError> = None;

        for attempt in 1..=max_retries {
            let request = match (&last_error, &last_response) {
                (Some(error), previous) => prompts::retry_object(
                    &schema_text,
                    prompt,
                    previous.as_deref(),
                    &error.to_string(),
                ),
                (None, _) => prompts::generate_object(&schema_text, prompt),
            };

            debug!(
                attempt,
                max_retries,
                capability = %self.capability,
                "Requesting structured object"
            );

            let raw = match self
                .models
                .execute(
                    &self.capability,
                    serde_json::json!({ "prompt": request }),
                    &config,
                    options.provider.as_deref(),
                )
                .await
            {
                Ok(Value::String(text)) => text,
                Ok(other) => other.to_string(),
                Err(e) => {
                    warn!(attempt, error = %e, "Model call failed during structured retrieval");
                    last_response = None;
                    last_error = Some(AttemptError::Model(e));
                    continue;
                }
            };

            match parse_and_validate(&raw, schema).and_then(&convert) {
                Ok(value) => {
                    debug!(attempt, "Structured object retrieved");
                    return Ok(Retrieved {
                        value,
                        attempts: attempt,
                        raw_response: raw,
                    });
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_retries,
                        error = %e,
                        "Structured retrieval attempt rejected"
                    );
                    last_response = Some(raw);
                    last_error = Some(e);
                }
            }
        }

        Err(RetrievalError::Exhausted {
            attempts: max_retries,
            source: last_error.unwrap_or(AttemptError::NoJson),
            last_response,
        })
    }
}

fn parse_and_validate(raw: &str, schema: &Value) -> Result<Value, AttemptError> {
    let payload = extract_json(raw).ok_or(AttemptError::NoJson)?;
    let value: Value =
        serde_json::from_str(payload).map_err(|e| AttemptError::Parse(e.to_string()))?;
    validate_against_schema(schema, &value).map_err(AttemptError::Validation)?;
    Ok(value)
}

/// Locate the JSON payload in a model completion.
///
/// A fenced code block wins if it contains JSON. Otherwise the text is
/// scanned for the outermost balanced `{...}` or `[...]` span, skipping
/// brackets inside string literals. The first span that parses is returned;
/// if none parses, the first candidate is returned so the caller can report
/// the parse error. An opening bracket that never closes yields the rest of
/// the text.
pub fn extract_json(raw: &str) -> Option<&str> {
    let body = fenced_block(raw)
        .filter(|block| block.contains(['{', '[']))
        .unwrap_or(raw);

    let mut fallback = None;
    let mut pos = 0;
    while let Some(offset) = body[pos..].find(['{', '[']) {
        let start = pos + offset;
        match scan_balanced(&body[start..]) {
            Scan::Closed(len) => {
                let candidate = &body[start..start + len];
                if serde_json::from_str::<Value>(candidate).is_ok() {
                    return Some(candidate);
                }
                fallback.get_or_insert(candidate);
                pos = start + len;
            }
            Scan::Unclosed => {
                fallback.get_or_insert(body[start..].trim_end());
                break;
            }
            Scan::Mismatched => pos = start + 1,
        }
    }
    fallback
}

/// Contents of the first complete ``` fence, language tag dropped.
fn fenced_block(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let rest = &raw[open + 3..];
    let body_start = rest
        .find('\n')
        .filter(|&nl| rest[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|nl| nl + 1)
        .unwrap_or(0);
    let body = &rest[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

enum Scan {
    /// Byte length of the balanced span
    Closed(usize),
    Unclosed,
    Mismatched,
}

fn scan_balanced(text: &str) -> Scan {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return Scan::Mismatched;
                }
                if stack.is_empty() {
                    return Scan::Closed(i + 1);
                }
            }
            _ => {}
        }
    }
    Scan::Unclosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use serde::Deserialize;
    use serde_json::json;
    use weft_core::capability::TEXT_GENERATION;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Verdict {
        approve: bool,
        reason: String,
    }

    fn retriever(model: Arc<ScriptedModel>) -> StructuredRetriever {
        StructuredRetriever::new(model.router(), TEXT_GENERATION)
    }

    #[test]
    fn extracts_fenced_block() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```\nAnything else?";
        assert_eq!(extract_json(raw), Some("{\"a\": 1}"));
    }

    #[test]
    fn extracts_outermost_span_from_prose() {
        let raw = "Sure! {\"steps\": [{\"pluginId\": \"time\"}]} Hope that helps.";
        assert_eq!(
            extract_json(raw),
            Some("{\"steps\": [{\"pluginId\": \"time\"}]}")
        );
    }

    #[test]
    fn brackets_inside_strings_are_ignored() {
        let raw = r#"result: {"text": "a } tricky [ value", "n": 2} done"#;
        let json: Value = serde_json::from_str(extract_json(raw).unwrap()).unwrap();
        assert_eq!(json["n"], 2);
    }

    #[test]
    fn skips_bracketed_prose_before_payload() {
        let raw = "[note] the answer is {\"ok\": true}";
        assert_eq!(extract_json(raw), Some("{\"ok\": true}"));
    }

    #[test]
    fn unclosed_payload_is_returned_for_error_reporting() {
        let raw = "sure, here it is: {bad json";
        assert_eq!(extract_json(raw), Some("{bad json"));
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn top_level_arrays_are_supported() {
        assert_eq!(extract_json("list: [1, 2, 3]."), Some("[1, 2, 3]"));
    }

    #[tokio::test]
    async fn first_valid_response_returns_immediately() {
        let model = Arc::new(ScriptedModel::new(vec![
            r#"{"approve": true, "reason": "fine"}"#,
        ]));
        let got = retriever(model.clone())
            .get_object::<Verdict>("approve?", &RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(got.attempts, 1);
        assert!(got.value.approve);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn retry_carries_previous_response_and_error() {
        let model = Arc::new(ScriptedModel::new(vec![
            "sure, here it is: {bad json",
            r#"{"approve": false, "reason": "second time lucky"}"#,
        ]));
        let got = retriever(model.clone())
            .get_object::<Verdict>("approve?", &RetrievalOptions::default())
            .await
            .unwrap();

        assert_eq!(got.attempts, 2);
        assert_eq!(got.value.reason, "second time lucky");

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("{bad json"));
        assert!(prompts[1].contains("JSON parse error"));
    }

    #[tokio::test]
    async fn schema_violations_are_retried() {
        let model = Arc::new(ScriptedModel::new(vec![
            r#"{"approve": "yes"}"#,
            r#"{"approve": true, "reason": "typed"}"#,
        ]));
        let got = retriever(model.clone())
            .get_object::<Verdict>("approve?", &RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(got.attempts, 2);
        assert!(model.prompts()[1].contains("schema validation failed"));
    }

    #[tokio::test]
    async fn gives_up_after_exactly_max_retries() {
        let model = Arc::new(ScriptedModel::new(vec!["nope", "still nope", "no", "unused"]));
        let err = retriever(model.clone())
            .get_object::<Verdict>("approve?", &RetrievalOptions::default().with_max_retries(3))
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert!(matches!(err.last_error(), AttemptError::NoJson));
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn model_errors_count_as_attempts() {
        let model = Arc::new(ScriptedModel::from_replies(vec![
            Err("rate limited".to_string()),
            Ok(r#"{"approve": true, "reason": "ok"}"#.to_string()),
        ]));
        let got = retriever(model.clone())
            .get_object::<Verdict>("approve?", &RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(got.attempts, 2);
    }

    #[tokio::test]
    async fn zero_retries_still_makes_one_attempt() {
        let model = Arc::new(ScriptedModel::new(vec!["garbage"]));
        let err = retriever(model.clone())
            .get_value(
                &json!({"type": "object"}),
                "anything",
                &RetrievalOptions::default().with_max_retries(0),
            )
            .await
            .unwrap_err();
        assert_eq!(err.attempts(), 1);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn get_value_validates_against_raw_schema() {
        let schema = json!({
            "type": "array",
            "items": { "type": "integer" },
            "minItems": 2
        });
        let model = Arc::new(ScriptedModel::new(vec!["[1]", "```\n[1, 2]\n```"]));
        let got = retriever(model)
            .get_value(&schema, "two numbers", &RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(got.value, json!([1, 2]));
        assert_eq!(got.attempts, 2);
    }
}
