//! No-op memory provider. Disables persistence entirely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use weft_core::context::ContextChain;
use weft_core::error::MemoryError;
use weft_core::memory::MemoryProvider;
use weft_core::message::{ConversationId, HistoryMessage};

/// A memory provider that stores nothing and remembers nothing.
///
/// Every call to `get_or_create_conversation` returns a fresh id.
pub struct NoopMemory;

#[async_trait]
impl MemoryProvider for NoopMemory {
    fn name(&self) -> &str {
        "none"
    }

    async fn get_or_create_conversation(
        &self,
        _user_id: &str,
        _platform: &str,
    ) -> Result<ConversationId, MemoryError> {
        Ok(ConversationId::new())
    }

    async fn get_recent_conversation_history(
        &self,
        _user_id: &str,
        _platform: &str,
        _limit: Option<usize>,
    ) -> Result<Vec<HistoryMessage>, MemoryError> {
        Ok(Vec::new())
    }

    async fn store_user_interaction(
        &self,
        _user_id: &str,
        _platform: &str,
        _raw_message: &str,
        _timestamp: DateTime<Utc>,
        _message_id: &str,
    ) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn store_assistant_interaction(
        &self,
        _user_id: &str,
        _platform: &str,
        _final_message: &str,
        _chain: &ContextChain,
    ) -> Result<(), MemoryError> {
        Ok(())
    }
}
