//! The execution core of weft.
//!
//! An event flows through the runtime like this:
//!
//! 1. **Push**: a trigger hands an [`InboundEvent`](weft_core::InboundEvent)
//!    to the [`EventQueue`], which attaches history and stores the message
//! 2. **Plan**: the [`EvaluationLoop`] takes the next event and asks the
//!    [`PipelineEngine`] for a pipeline
//! 3. **Execute**: each step runs on its plugin's executor and its result is
//!    appended or merged into the context chain
//! 4. **Replan**: after every step the engine may replace the remaining steps
//! 5. **Persist**: the final chain entry is stored as the assistant response
//!
//! Planning decisions come back from the model through the
//! [`StructuredRetriever`], which validates them against a JSON Schema and
//! retries with feedback.

pub mod loop_runner;
pub mod planner;
pub mod prompts;
pub mod queue;
pub mod retrieval;
pub mod runtime;
pub mod testing;

pub use loop_runner::EvaluationLoop;
pub use planner::{ModificationDecision, PipelineEngine};
pub use queue::{EventQueue, QueueReceiver};
pub use retrieval::{extract_json, RetrievalOptions, Retrieved, StructuredRetriever};
pub use runtime::{AgentRuntime, RuntimeBuilder, RuntimeTask};
