use crate::reply::ThreadingMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Policy for handling DMs from senders not already on the allowlist.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    /// Only allow senders on the allowlist (default). Unknown senders are silently dropped.
    #[default]
    Allowlist,
    /// Send a pairing code to unknown senders so they can request access.
    Pairing,
    /// Allow all senders regardless of allowlist.
    Open,
    /// Reject every DM on this channel, regardless of allowlist.
    Disabled,
}

impl std::fmt::Display for DmPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allowlist => write!(f, "allowlist"),
            Self::Pairing => write!(f, "pairing"),
            Self::Open => write!(f, "open"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Policy for handling group/thread messages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Only respond when explicitly mentioned (default).
    #[default]
    MentionOnly,
    /// Respond to every message in the group.
    Open,
    /// Never respond in groups on this channel.
    Disabled,
}

impl std::fmt::Display for GroupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MentionOnly => write!(f, "mentiononly"),
            Self::Open => write!(f, "open"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

fn default_dm_policy() -> DmPolicy {
    DmPolicy::default()
}

fn default_group_policy() -> GroupPolicy {
    GroupPolicy::default()
}

fn default_true() -> bool {
    true
}

/// Configuration for a single named channel adapter. Every channel speaks the
/// same generic inbound-webhook contract; there are no per-platform structs.
#[derive(Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// HMAC-SHA256 secret used to verify the inbound webhook signature.
    #[serde(default, rename = "webhookSecret")]
    pub webhook_secret: String,
    /// URL this channel's outbound adapter posts replies to.
    #[serde(default, rename = "webhookUrl")]
    pub webhook_url: String,
    #[serde(default, rename = "allowFrom")]
    pub allow_from: Vec<String>,
    #[serde(default = "default_dm_policy", rename = "dmPolicy")]
    pub dm_policy: DmPolicy,
    #[serde(default = "default_group_policy", rename = "groupPolicy")]
    pub group_policy: GroupPolicy,
    /// Names that, when mentioned in a group chat, address the bot.
    #[serde(default, rename = "mentionNames")]
    pub mention_names: Vec<String>,
    /// Per-channel text chunk cap, overriding the agent-wide default when set.
    #[serde(default, rename = "chunkLimit")]
    pub chunk_limit: Option<usize>,
    #[serde(default, rename = "threadingMode")]
    pub threading_mode: ThreadingMode,
    /// Overrides `session.{direct,group,thread}IdleMs` for this channel only.
    #[serde(default, rename = "resetIdleMs")]
    pub reset_idle_ms: Option<u64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_secret: String::new(),
            webhook_url: String::new(),
            allow_from: Vec::new(),
            dm_policy: default_dm_policy(),
            group_policy: default_group_policy(),
            mention_names: Vec::new(),
            chunk_limit: None,
            threading_mode: ThreadingMode::default(),
            reset_idle_ms: None,
        }
    }
}

redact_debug!(
    ChannelConfig,
    enabled,
    redact(webhook_secret),
    webhook_url,
    allow_from,
    dm_policy,
    group_policy,
    mention_names,
    chunk_limit,
    threading_mode,
    reset_idle_ms,
);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default, flatten)]
    pub channels: HashMap<String, ChannelConfig>,
}
