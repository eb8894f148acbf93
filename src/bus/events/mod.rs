use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of conversation a message arrived on, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    #[default]
    Direct,
    Group,
    Thread,
}

/// Raw inbound event produced by a channel adapter, per the adapter contract:
/// `{sender, messageId, chatId, chatType, text, mentions, attachments,
/// timestamp, threadId?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    /// Display name as reported by the transport. Never used for
    /// authorization — only `sender_id` (and its normalized aliases) may
    /// authorize a sender, to defeat display-name spoofing.
    pub sender_name: Option<String>,
    pub message_id: String,
    pub chat_id: String,
    pub chat_type: ChatType,
    pub content: String,
    pub mentions: Vec<String>,
    pub attachments: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub thread_id: Option<String>,
    pub is_from_me: bool,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    pub fn is_group(&self) -> bool {
        matches!(self.chat_type, ChatType::Group | ChatType::Thread)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub reply_to: Option<String>,
    pub thread_id: Option<String>,
    pub account_id: Option<String>,
    pub media: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}
