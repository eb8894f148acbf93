/// Consumes agent-produced reply payloads and drives them into a channel's
/// outbound adapter: threading, renderability filtering, reasoning
/// suppression, messaging-tool dedupe and per-channel chunking.
use std::collections::HashSet;

use async_trait::async_trait;

use crate::bus::{MessageBus, OutboundMessage};
use crate::channels::base::split_message;
use crate::channels::manager::ChannelManager;

/// Where a dispatched reply actually goes out. Production wires this to the
/// shared `MessageBus` so outbound leak-scanning and rate-limiting apply to
/// agent replies the same way they apply to cron announcements; channel
/// tests wire it straight to a `ChannelManager` to assert on delivered
/// content without a bus in the loop.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send_outbound(&self, msg: OutboundMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl OutboundSink for ChannelManager {
    async fn send_outbound(&self, msg: OutboundMessage) -> anyhow::Result<()> {
        self.send(&msg).await
    }
}

#[async_trait]
impl OutboundSink for tokio::sync::Mutex<MessageBus> {
    async fn send_outbound(&self, msg: OutboundMessage) -> anyhow::Result<()> {
        self.lock().await.publish_outbound(msg).await
    }
}

/// A single piece of agent output before it has been chunked or dispatched.
#[derive(Debug, Clone, Default)]
pub struct ReplyPayload {
    pub text: Option<String>,
    pub media: Vec<String>,
    pub reply_to_id: Option<String>,
    pub reply_to_current: bool,
    pub is_reasoning: bool,
}

impl ReplyPayload {
    pub fn is_renderable(&self) -> bool {
        self.text.as_ref().is_some_and(|t| !t.trim().is_empty()) || !self.media.is_empty()
    }
}

/// When a channel threads replies, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadingMode {
    Off,
    First,
    #[default]
    Always,
}

/// Parse and strip an explicit `[[reply-to:<id>]]` tag from text, returning
/// the cleaned text and the extracted id, if any.
fn extract_reply_tag(text: &str) -> (String, Option<String>) {
    let Some(start) = text.find("[[reply-to:") else {
        return (text.to_string(), None);
    };
    let Some(end_rel) = text[start..].find(']') else {
        return (text.to_string(), None);
    };
    let end = start + end_rel + 1;
    let id = text[start + "[[reply-to:".len()..end - 1].to_string();
    let mut cleaned = String::with_capacity(text.len());
    cleaned.push_str(&text[..start]);
    cleaned.push_str(&text[end..]);
    (cleaned.trim().to_string(), Some(id))
}

/// Buffered, ordered dispatcher for one session's reply stream.
pub struct ReplyDispatcher<'a> {
    sink: &'a dyn OutboundSink,
    channel: String,
    chat_id: String,
    current_message_id: Option<String>,
    threading_mode: ThreadingMode,
    chunk_limit: usize,
    allow_reasoning: bool,
    already_sent: HashSet<String>,
    first_reply_sent: bool,
}

impl<'a> ReplyDispatcher<'a> {
    pub fn new(
        sink: &'a dyn OutboundSink,
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        current_message_id: Option<String>,
        threading_mode: ThreadingMode,
        chunk_limit: usize,
    ) -> Self {
        Self {
            sink,
            channel: channel.into(),
            chat_id: chat_id.into(),
            current_message_id,
            threading_mode,
            chunk_limit,
            allow_reasoning: false,
            already_sent: HashSet::new(),
            first_reply_sent: false,
        }
    }

    pub fn allow_reasoning(mut self, allow: bool) -> Self {
        self.allow_reasoning = allow;
        self
    }

    /// Mark text or media as already delivered by an explicit messaging-tool
    /// call, so the dispatcher suppresses a duplicate emission of it.
    pub fn mark_already_sent(&mut self, content: impl Into<String>) {
        self.already_sent.insert(content.into());
    }

    fn resolve_reply_to(&self, payload: &ReplyPayload, text: &str) -> (String, Option<String>) {
        let (cleaned, tagged) = extract_reply_tag(text);
        if tagged.is_some() {
            return (cleaned, tagged);
        }
        if payload.reply_to_id.is_some() {
            return (cleaned, payload.reply_to_id.clone());
        }
        if payload.reply_to_current {
            return (cleaned, self.current_message_id.clone());
        }
        (cleaned, None)
    }

    /// Deliver one payload, in order. Awaits completion before the caller
    /// should hand in the next payload.
    pub async fn deliver(&mut self, payload: ReplyPayload) -> anyhow::Result<()> {
        if !payload.is_renderable() {
            return Ok(());
        }
        if payload.is_reasoning && !self.allow_reasoning {
            return Ok(());
        }

        let raw_text = payload.text.clone().unwrap_or_default();
        if self.already_sent.contains(&raw_text) {
            return Ok(());
        }

        let (text, reply_to) = self.resolve_reply_to(&payload, &raw_text);

        let reply_to = match self.threading_mode {
            ThreadingMode::Off => None,
            ThreadingMode::First if self.first_reply_sent => None,
            ThreadingMode::First | ThreadingMode::Always => reply_to,
        };
        self.first_reply_sent = true;

        let chunks = if text.is_empty() {
            vec![String::new()]
        } else {
            split_message(&text, self.chunk_limit)
        };

        for chunk in chunks {
            let msg = OutboundMessage {
                channel: self.channel.clone(),
                chat_id: self.chat_id.clone(),
                content: chunk,
                reply_to: reply_to.clone(),
                thread_id: None,
                account_id: None,
                media: payload.media.clone(),
                metadata: std::collections::HashMap::new(),
            };
            self.sink.send_outbound(msg).await?;
        }

        Ok(())
    }
}

/// Resolve the outbound text chunk limit for a channel. Per-channel caps
/// (e.g. platform message-length limits) win over the generic default.
pub fn resolve_text_chunk_limit(per_channel_limit: Option<usize>, default_limit: usize) -> usize {
    per_channel_limit.unwrap_or(default_limit)
}

#[cfg(test)]
mod tests;
