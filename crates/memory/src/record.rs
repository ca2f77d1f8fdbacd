//! The interaction log entry shared by the in-memory and file providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weft_core::context::ContextChain;
use weft_core::message::{ConversationId, HistoryMessage, Role};

/// History length used when a caller passes no limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// One stored interaction, user or assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub conversation_id: ConversationId,
    pub user_id: String,
    pub platform: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Full execution trace, stored with assistant entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<ContextChain>,
}

impl InteractionRecord {
    pub fn belongs_to(&self, user_id: &str, platform: &str) -> bool {
        self.user_id == user_id && self.platform == platform
    }

    pub fn to_history(&self) -> HistoryMessage {
        HistoryMessage {
            role: self.role.clone(),
            content: self.content.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// The last `limit` messages for a user on a platform, oldest first.
pub(crate) fn recent_history(
    records: &[InteractionRecord],
    user_id: &str,
    platform: &str,
    limit: Option<usize>,
) -> Vec<HistoryMessage> {
    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let mut recent: Vec<HistoryMessage> = records
        .iter()
        .rev()
        .filter(|r| r.belongs_to(user_id, platform))
        .take(limit)
        .map(InteractionRecord::to_history)
        .collect();
    recent.reverse();
    recent
}
