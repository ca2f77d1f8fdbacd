//! In-memory provider for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use weft_core::context::ContextChain;
use weft_core::error::MemoryError;
use weft_core::memory::MemoryProvider;
use weft_core::message::{ConversationId, HistoryMessage, Role};

use crate::record::{recent_history, InteractionRecord};

/// Keeps conversations and interactions in process memory.
pub struct InMemoryMemory {
    conversations: Arc<RwLock<HashMap<(String, String), ConversationId>>>,
    records: Arc<RwLock<Vec<InteractionRecord>>>,
}

impl InMemoryMemory {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Every stored interaction in insertion order.
    pub async fn records(&self) -> Vec<InteractionRecord> {
        self.records.read().await.clone()
    }

    /// Assistant entries only.
    pub async fn assistant_records(&self) -> Vec<InteractionRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.role == Role::Assistant)
            .cloned()
            .collect()
    }

    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }

    async fn conversation_for(&self, user_id: &str, platform: &str) -> ConversationId {
        let key = (user_id.to_string(), platform.to_string());
        if let Some(id) = self.conversations.read().await.get(&key) {
            return id.clone();
        }
        self.conversations
            .write()
            .await
            .entry(key)
            .or_default()
            .clone()
    }
}

impl Default for InMemoryMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryProvider for InMemoryMemory {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_or_create_conversation(
        &self,
        user_id: &str,
        platform: &str,
    ) -> Result<ConversationId, MemoryError> {
        Ok(self.conversation_for(user_id, platform).await)
    }

    async fn get_recent_conversation_history(
        &self,
        user_id: &str,
        platform: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryMessage>, MemoryError> {
        let records = self.records.read().await;
        Ok(recent_history(&records, user_id, platform, limit))
    }

    async fn store_user_interaction(
        &self,
        user_id: &str,
        platform: &str,
        raw_message: &str,
        timestamp: DateTime<Utc>,
        message_id: &str,
    ) -> Result<(), MemoryError> {
        let conversation_id = self.conversation_for(user_id, platform).await;
        self.records.write().await.push(InteractionRecord {
            conversation_id,
            user_id: user_id.into(),
            platform: platform.into(),
            role: Role::User,
            content: raw_message.into(),
            message_id: Some(message_id.into()),
            timestamp,
            chain: None,
        });
        Ok(())
    }

    async fn store_assistant_interaction(
        &self,
        user_id: &str,
        platform: &str,
        final_message: &str,
        chain: &ContextChain,
    ) -> Result<(), MemoryError> {
        let conversation_id = self.conversation_for(user_id, platform).await;
        self.records.write().await.push(InteractionRecord {
            conversation_id,
            user_id: user_id.into(),
            platform: platform.into(),
            role: Role::Assistant,
            content: final_message.into(),
            message_id: None,
            timestamp: Utc::now(),
            chain: Some(chain.clone()),
        });
        Ok(())
    }
}
