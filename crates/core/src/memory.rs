//! Memory trait for conversation history and interaction persistence.
//!
//! The core never persists anything itself. It reads recent history before
//! planning and hands the inbound message and the final context chain to a
//! memory collaborator.
//!
//! Implementations: in-memory (for testing), none (no-op), and any storage
//! backend an embedding application supplies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::context::ContextChain;
use crate::error::MemoryError;
use crate::message::{ConversationId, HistoryMessage};

/// The core MemoryProvider trait.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// The backend name (e.g., "in_memory", "none").
    fn name(&self) -> &str;

    /// Look up the conversation for a user on a platform, creating it if absent.
    async fn get_or_create_conversation(
        &self,
        user_id: &str,
        platform: &str,
    ) -> Result<ConversationId, MemoryError>;

    /// Most recent history, oldest first. `None` means the backend default.
    async fn get_recent_conversation_history(
        &self,
        user_id: &str,
        platform: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryMessage>, MemoryError>;

    /// Persist an inbound user message.
    async fn store_user_interaction(
        &self,
        user_id: &str,
        platform: &str,
        raw_message: &str,
        timestamp: DateTime<Utc>,
        message_id: &str,
    ) -> Result<(), MemoryError>;

    /// Persist the assistant-facing result together with the full trace.
    async fn store_assistant_interaction(
        &self,
        user_id: &str,
        platform: &str,
        final_message: &str,
        chain: &ContextChain,
    ) -> Result<(), MemoryError>;
}
