//! Capabilities and model providers.
//!
//! A capability is a named operation (text generation, image generation, ...)
//! with input and output JSON Schemas. A provider implements one or more
//! capabilities; the router in `weft-providers` maps capability ids to
//! providers, resolves aliases, and validates both sides of every call.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CapabilityError;
use crate::schema::schema_for;

/// The mandatory text-generation capability.
pub const TEXT_GENERATION: &str = "text-generation";

/// Image generation, supplied by some providers.
pub const IMAGE_GENERATION: &str = "image-generation";

/// A capability as exposed by one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Capability identifier (e.g., "text-generation")
    pub id: String,

    /// JSON Schema every input must satisfy
    pub input_schema: Value,

    /// JSON Schema every result must satisfy
    pub output_schema: Value,
}

impl CapabilityDescriptor {
    pub fn new(id: impl Into<String>, input_schema: Value, output_schema: Value) -> Self {
        Self {
            id: id.into(),
            input_schema,
            output_schema,
        }
    }

    /// The standard text-generation descriptor: [`TextGenerationInput`] in,
    /// a plain string out.
    pub fn text_generation() -> Self {
        Self::new(
            TEXT_GENERATION,
            schema_for::<TextGenerationInput>(),
            serde_json::json!({ "type": "string" }),
        )
    }
}

/// Input accepted by the text-generation capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TextGenerationInput {
    /// The full prompt text
    pub prompt: String,

    /// Optional system instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl TextGenerationInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// Per-call execution settings passed through to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteConfig {
    /// Sampling temperature (0.0 = deterministic)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Backend-specific model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Anything else the provider understands
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

impl ExecuteConfig {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A backing implementation of one or more capabilities.
///
/// Implementations own their wire protocol and any per-call timeouts; the
/// core never sees either.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Unique provider identifier (e.g., "openai", "local-llama").
    fn id(&self) -> &str;

    /// Every capability this provider supplies.
    fn capabilities(&self) -> Vec<CapabilityDescriptor>;

    /// Execute a capability with input that already passed the input schema.
    async fn execute(
        &self,
        capability_id: &str,
        input: Value,
        config: &ExecuteConfig,
    ) -> Result<Value, CapabilityError>;

    /// One-time initialization at runtime startup.
    async fn init(&self) -> Result<(), CapabilityError> {
        Ok(())
    }

    /// Health check; an error aborts startup.
    async fn check_health(&self) -> Result<(), CapabilityError> {
        Ok(())
    }
}

/// Capability routing as seen by the engine and by plugins.
///
/// Implemented by `weft_providers::ModelRouter`.
#[async_trait]
pub trait CapabilityRouter: Send + Sync {
    /// Canonical id for `id` (aliases resolved, otherwise `id` itself).
    fn resolve(&self, id: &str) -> String;

    /// Whether any provider backs `id` (after alias resolution).
    fn has_capability(&self, id: &str) -> bool;

    /// Validate, route, execute, and validate the result.
    async fn execute(
        &self,
        capability_id: &str,
        input: Value,
        config: &ExecuteConfig,
        provider_id: Option<&str>,
    ) -> Result<Value, CapabilityError>;

    /// Convenience wrapper over the text-generation capability.
    async fn generate_text(
        &self,
        input: TextGenerationInput,
        config: &ExecuteConfig,
    ) -> Result<String, CapabilityError> {
        let value = serde_json::to_value(&input).map_err(|e| CapabilityError::InvalidInput {
            capability: TEXT_GENERATION.into(),
            violations: vec![e.to_string()],
        })?;
        match self.execute(TEXT_GENERATION, value, config, None).await? {
            Value::String(text) => Ok(text),
            other => Err(CapabilityError::InvalidOutput {
                capability: TEXT_GENERATION.into(),
                provider: "unknown".into(),
                violations: vec![format!("expected a string, got {other}")],
            }),
        }
    }
}
