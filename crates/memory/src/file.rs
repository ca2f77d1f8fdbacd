//! File-based memory provider backed by a JSON-lines interaction log.
//!
//! Each line is a JSON-encoded [`InteractionRecord`]. The log is loaded on
//! creation and every new interaction is appended, so the file stays
//! human-inspectable and survives restarts.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use weft_core::context::ContextChain;
use weft_core::error::MemoryError;
use weft_core::memory::MemoryProvider;
use weft_core::message::{ConversationId, HistoryMessage, Role};

use crate::record::{recent_history, InteractionRecord};

/// A file-backed interaction log using JSONL.
pub struct FileMemory {
    path: PathBuf,
    conversations: Arc<RwLock<HashMap<(String, String), ConversationId>>>,
    records: Arc<RwLock<Vec<InteractionRecord>>>,
}

impl FileMemory {
    /// Open the log at `path`. A missing file starts empty and is created on
    /// first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = Self::load_from_disk(&path);

        // The most recent conversation id per (user, platform) wins.
        let mut conversations = HashMap::new();
        for record in &records {
            conversations.insert(
                (record.user_id.clone(), record.platform.clone()),
                record.conversation_id.clone(),
            );
        }

        debug!(path = %path.display(), count = records.len(), "File memory loaded");
        Self {
            path,
            conversations: Arc::new(RwLock::new(conversations)),
            records: Arc::new(RwLock::new(records)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Vec<InteractionRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<InteractionRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted interaction record");
                    None
                }
            })
            .collect()
    }

    /// Append one record to the file, then to the in-memory log.
    async fn append(&self, record: InteractionRecord) -> Result<(), MemoryError> {
        let line = serde_json::to_string(&record)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize interaction: {e}")))?;

        // Holding the write lock keeps file order and memory order identical.
        let mut records = self.records.write().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MemoryError::Storage(format!("Failed to open memory file: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;

        records.push(record);
        Ok(())
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

#[async_trait]
impl MemoryProvider for FileMemory {
    fn name(&self) -> &str {
        "file"
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
        self.append(InteractionRecord {
            conversation_id,
            user_id: user_id.into(),
            platform: platform.into(),
            role: Role::User,
            content: raw_message.into(),
            message_id: Some(message_id.into()),
            timestamp,
            chain: None,
        })
        .await
    }

    async fn store_assistant_interaction(
        &self,
        user_id: &str,
        platform: &str,
        final_message: &str,
        chain: &ContextChain,
    ) -> Result<(), MemoryError> {
        let conversation_id = self.conversation_for(user_id, platform).await;
        self.append(InteractionRecord {
            conversation_id,
            user_id: user_id.into(),
            platform: platform.into(),
            role: Role::Assistant,
            content: final_message.into(),
            message_id: None,
            timestamp: Utc::now(),
            chain: Some(chain.clone()),
        })
        .await
    }
}
