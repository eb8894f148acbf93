/// Pure inbound-policy decisions: drop, request pairing, or dispatch.
///
/// No I/O beyond the caller-supplied allowlist/pairing snapshot — every
/// function here is a straight value transform, grounded on the same
/// discipline `config/schema/channels.rs`'s `DmPolicy`/`GroupPolicy` enums
/// were designed against.
use crate::bus::events::{ChatType, InboundMessage};
use crate::config::schema::{ChannelConfig, DmPolicy, GroupPolicy};
use crate::utils::regex::build_mention_regex;

pub mod echo_cache;

/// Outcome of evaluating an inbound event against channel policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Drop(String),
    Pairing(String),
    Dispatch,
}

/// A read-only view over which senders are already paired for a channel.
/// Implemented by `pairing::PairingStore` in production, by a plain closure
/// in tests.
pub trait AllowlistSnapshot {
    fn is_allowed(&self, channel: &str, sender_id: &str) -> bool;
}

impl<F: Fn(&str, &str) -> bool> AllowlistSnapshot for F {
    fn is_allowed(&self, channel: &str, sender_id: &str) -> bool {
        self(channel, sender_id)
    }
}

/// A read-only view of the echo cache: true if `key` was recently sent by us.
pub trait EchoCacheView {
    fn is_echo(&self, key: &str) -> bool;
}

impl<F: Fn(&str) -> bool> EchoCacheView for F {
    fn is_echo(&self, key: &str) -> bool {
        self(key)
    }
}

fn normalize_sender(id: &str) -> String {
    id.trim().to_lowercase()
}

fn dm_authorized(config: &ChannelConfig, sender_id: &str) -> bool {
    if config.allow_from.iter().any(|s| s == "*") {
        return true;
    }
    let normalized = normalize_sender(sender_id);
    config
        .allow_from
        .iter()
        .any(|allowed| normalize_sender(allowed) == normalized)
}

/// Does the message text contain an `@mention` or `<@mention>` of any
/// configured mention name? Mention names with invalid regex metacharacters
/// (none, since they're escaped) never fail to compile.
fn is_mentioned(config: &ChannelConfig, text: &str) -> bool {
    config.mention_names.iter().any(|name| {
        build_mention_regex(name)
            .map(|re| re.is_match(text))
            .unwrap_or(false)
    })
}

/// Whether the message text looks like an authorized control command (a
/// leading `/`), gated separately from mention/allowlist checks.
fn is_control_command(text: &str) -> bool {
    text.trim_start().starts_with('/')
}

/// Decide what to do with one inbound event. Pure function: the same inputs
/// always produce the same `Decision`.
pub fn resolve_channel_inbound_decision(
    config: &ChannelConfig,
    event: &InboundMessage,
    allowlist: &impl AllowlistSnapshot,
    echo_cache: &impl EchoCacheView,
) -> Decision {
    if event.is_from_me {
        return Decision::Drop("from self".to_string());
    }
    if event.sender_id.trim().is_empty() {
        return Decision::Drop("missing sender".to_string());
    }
    if event.content.trim().is_empty() {
        return Decision::Drop("empty body".to_string());
    }

    let is_group = matches!(event.chat_type, ChatType::Group | ChatType::Thread);

    if is_group {
        match config.group_policy {
            GroupPolicy::Disabled => return Decision::Drop("group policy disabled".to_string()),
            GroupPolicy::Open => {}
            GroupPolicy::MentionOnly => {
                let mentioned = is_mentioned(config, &event.content)
                    || event.mentions.iter().any(|m| {
                        config
                            .mention_names
                            .iter()
                            .any(|name| name.eq_ignore_ascii_case(m))
                    });
                if !mentioned
                    && !config.mention_names.is_empty()
                    && !(is_control_command(&event.content) && dm_authorized(config, &event.sender_id))
                {
                    return Decision::Drop("not mentioned".to_string());
                }
            }
        }
        if !config.allow_from.is_empty() && !dm_authorized(config, &event.sender_id) {
            return Decision::Drop("sender not in group allowlist".to_string());
        }
    } else {
        match config.dm_policy {
            DmPolicy::Disabled => return Decision::Drop("dm policy disabled".to_string()),
            DmPolicy::Open => {}
            DmPolicy::Allowlist => {
                let authorized =
                    allowlist.is_allowed("", &event.sender_id) || dm_authorized(config, &event.sender_id);
                if !authorized {
                    return Decision::Drop("sender not in allowlist".to_string());
                }
            }
            DmPolicy::Pairing => {
                let authorized =
                    allowlist.is_allowed("", &event.sender_id) || dm_authorized(config, &event.sender_id);
                if !authorized {
                    return Decision::Pairing(normalize_sender(&event.sender_id));
                }
            }
        }
    }

    let echo_key = format!("{}:{}", event.session_key(), event.message_id);
    if echo_cache.is_echo(&echo_key) || echo_cache.is_echo(&event.content) {
        return Decision::Drop("echo".to_string());
    }

    Decision::Dispatch
}
