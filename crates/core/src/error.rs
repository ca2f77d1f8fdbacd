//! Error types for the weft domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all weft operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Capability / model routing errors ---
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    // --- Plugin errors ---
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Structured retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Configuration / startup errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Queue ---
    #[error("Event queue is closed")]
    QueueClosed,

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("No provider for capability '{capability}'")]
    NoProvider { capability: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Capability '{capability}' not found on provider '{provider}'")]
    CapabilityNotFound { capability: String, provider: String },

    #[error("Invalid input for capability '{capability}': {}", .violations.join("; "))]
    InvalidInput {
        capability: String,
        violations: Vec<String>,
    },

    #[error("Invalid output from provider '{provider}' for capability '{capability}': {}", .violations.join("; "))]
    InvalidOutput {
        capability: String,
        provider: String,
        violations: Vec<String>,
    },

    #[error("Cannot alias '{alias}' to unknown capability '{target}'")]
    UnknownAliasTarget { alias: String, target: String },

    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),

    #[error("Provider '{provider}' failed: {message}")]
    Execution { provider: String, message: String },

    #[error("Provider '{provider}' failed health check: {message}")]
    Unhealthy { provider: String, message: String },
}

#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error("Plugin id must not be empty")]
    EmptyId,

    #[error("Plugin id '{id}' is already registered (registered: [{}])", .registered.join(", "))]
    Collision { id: String, registered: Vec<String> },

    #[error("Plugin '{id}' not found (available: [{}])", .available.join(", "))]
    NotFound { id: String, available: Vec<String> },

    #[error("Plugin '{plugin}' has no executor '{action}' (available: [{}])", .available.join(", "))]
    ExecutorNotFound {
        plugin: String,
        action: String,
        available: Vec<String>,
    },

    #[error("Executor {plugin}.{action} failed: {reason}")]
    ExecutionFailed {
        plugin: String,
        action: String,
        reason: String,
    },

    #[error("Plugin '{plugin}' failed to initialize: {reason}")]
    InitFailed { plugin: String, reason: String },

    #[error("Trigger '{trigger}' failed to start: {reason}")]
    TriggerFailed { trigger: String, reason: String },

    #[error("Response delivery failed: {0}")]
    ResponseFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
}

/// Why a single structured-retrieval attempt failed.
#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    #[error("model call failed: {0}")]
    Model(#[from] CapabilityError),

    #[error("no JSON payload found in response")]
    NoJson,

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("schema validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("gave up after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: AttemptError,
        last_response: Option<String>,
    },
}

impl RetrievalError {
    /// The error recorded on the final attempt.
    pub fn last_error(&self) -> &AttemptError {
        match self {
            RetrievalError::Exhausted { source, .. } => source,
        }
    }

    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetrievalError::Exhausted { attempts, .. } => *attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_error_names_every_registered_id() {
        let err = PluginError::Collision {
            id: "time".into(),
            registered: vec!["time".into(), "reply".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'time'"));
        assert!(msg.contains("time, reply"));
    }

    #[test]
    fn invalid_input_lists_violations() {
        let err = Error::Capability(CapabilityError::InvalidInput {
            capability: "text-generation".into(),
            violations: vec!["\"prompt\" is a required property".into(), "bad type".into()],
        });
        let msg = err.to_string();
        assert!(msg.contains("text-generation"));
        assert!(msg.contains("required property; bad type"));
    }

    #[test]
    fn retrieval_error_exposes_attempts() {
        let err = RetrievalError::Exhausted {
            attempts: 3,
            source: AttemptError::NoJson,
            last_response: Some("nothing here".into()),
        };
        assert_eq!(err.attempts(), 3);
        assert!(matches!(err.last_error(), AttemptError::NoJson));
        assert!(err.to_string().contains("3 attempt(s)"));
    }
}
