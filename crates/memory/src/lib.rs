//! Memory providers for weft.
//!
//! All providers implement `weft_core::MemoryProvider`. The in-memory and
//! file providers share the [`InteractionRecord`] log format.

pub mod file;
pub mod in_memory;
pub mod noop;
pub mod record;

pub use file::FileMemory;
pub use in_memory::InMemoryMemory;
pub use noop::NoopMemory;
pub use record::{InteractionRecord, DEFAULT_HISTORY_LIMIT};
