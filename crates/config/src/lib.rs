//! Configuration loading, validation, and management for weft.
//!
//! Loads the runtime configuration from a TOML file (path from `WEFT_CONFIG`,
//! default `weft.toml` in the working directory) with environment variable
//! overrides. Validates all settings before the runtime is built.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Capability id used for all planning and retrieval calls
    #[serde(default = "default_text_capability")]
    pub text_capability: String,

    /// Sampling temperature for pipeline generation and modification
    #[serde(default = "default_planning_temperature")]
    pub planning_temperature: f32,

    /// How many recent history messages to attach to user input
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Upper bound on steps executed for one event, splices included
    #[serde(default = "default_max_steps_per_event")]
    pub max_steps_per_event: usize,

    /// Groups of interchangeable capability ids
    #[serde(default)]
    pub capability_aliases: Vec<Vec<String>>,

    /// Structured retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

fn default_text_capability() -> String {
    weft_core::TEXT_GENERATION.into()
}
fn default_planning_temperature() -> f32 {
    0.2
}
fn default_history_limit() -> usize {
    10
}
fn default_max_steps_per_event() -> usize {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Attempts before a structured retrieval gives up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Optional cap on tokens per attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_tokens: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from `WEFT_CONFIG` (or `./weft.toml`) and apply
    /// environment overrides:
    /// - `WEFT_MAX_RETRIES`
    /// - `WEFT_PLANNING_TEMPERATURE`
    /// - `WEFT_HISTORY_LIMIT`
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("WEFT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("weft.toml"));
        let mut config = Self::load_from(&path)?;

        if let Some(v) = env_parse::<u32>("WEFT_MAX_RETRIES")? {
            config.retrieval.max_retries = v;
        }
        if let Some(v) = env_parse::<f32>("WEFT_PLANNING_TEMPERATURE")? {
            config.planning_temperature = v;
        }
        if let Some(v) = env_parse::<usize>("WEFT_HISTORY_LIMIT")? {
            config.history_limit = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.planning_temperature < 0.0 || self.planning_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "planning_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retrieval.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.max_retries must be at least 1".into(),
            ));
        }

        if self.max_steps_per_event == 0 {
            return Err(ConfigError::ValidationError(
                "max_steps_per_event must be at least 1".into(),
            ));
        }

        if self.text_capability.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "text_capability must not be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for group in &self.capability_aliases {
            if group.is_empty() {
                return Err(ConfigError::ValidationError(
                    "capability alias groups must not be empty".into(),
                ));
            }
            for id in group {
                if !seen.insert(id.as_str()) {
                    return Err(ConfigError::ValidationError(format!(
                        "capability '{id}' appears in more than one alias group"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            text_capability: default_text_capability(),
            planning_temperature: default_planning_temperature(),
            history_limit: default_history_limit(),
            max_steps_per_event: default_max_steps_per_event(),
            capability_aliases: Vec::new(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::ValidationError(format!("{key} has invalid value '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for weft_core::Error {
    fn from(e: ConfigError) -> Self {
        weft_core::Error::config(e.to_string())
    }
}
