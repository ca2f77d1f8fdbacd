//! # weft core
//!
//! Domain types, traits, and error definitions for the weft agent execution
//! core. This crate defines the model every other crate implements against:
//! context items and the context chain, pipelines, capability providers,
//! plugins, memory collaborators, and the event context that flows through
//! the evaluation loop.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping model/storage backends without touching the engine
//! - Testing executors and the loop with injected fakes
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod capability;
pub mod context;
pub mod error;
pub mod event;
pub mod event_context;
pub mod memory;
pub mod message;
pub mod pipeline;
pub mod plugin;
pub mod schema;

// Re-export key types at crate root for ergonomics
pub use agent::{LoopState, RuntimeHandle};
pub use capability::{
    CapabilityDescriptor, CapabilityRouter, ExecuteConfig, ModelProvider, TextGenerationInput,
    IMAGE_GENERATION, TEXT_GENERATION,
};
pub use context::{ContextChain, ContextItem, ContextPayload, UserInput};
pub use error::{
    AttemptError, CapabilityError, Error, MemoryError, PluginError, Result, RetrievalError,
};
pub use event::{DomainEvent, EventBus};
pub use event_context::{
    EventContext, EventSink, InboundEvent, PlatformContext, QueueHandle, ResponseHandler,
};
pub use memory::MemoryProvider;
pub use message::{ConversationId, HistoryMessage, Role};
pub use pipeline::{Pipeline, PipelineStep};
pub use plugin::{Executor, ExecutorOutput, Plugin, PluginRegistry, PluginSummary, Trigger};
