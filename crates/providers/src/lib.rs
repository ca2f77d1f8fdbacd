//! Capability registry and model routing for weft.
//!
//! Concrete model backends implement `weft_core::ModelProvider` and are
//! registered with a [`ModelRouter`], which the runtime shares with the
//! engine and every plugin.

pub mod router;

pub use router::ModelRouter;
