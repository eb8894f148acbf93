/// Resolves or creates the `Session` for a dispatch, detecting reset
/// triggers, evaluating idle freshness against a chat-kind-dependent policy,
/// carrying user overrides across a reset, and archiving the prior
/// transcript. Layered on top of `SessionStore`'s atomic get/save rather
/// than replacing it — this module decides *what* the session should look
/// like before a turn starts; the store still owns persisting it.
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::bus::events::ChatType;
use crate::config::schema::SessionConfig;
use crate::session::manager::Session;
use crate::session::store::SessionStore;

/// Structural wrapping stripped before comparing a message against a reset
/// trigger — list markers, quote markers, and a single leading bracketed or
/// parenthesized label (e.g. a channel-prepended `[12:03]` timestamp).
fn strip_structural_prefix(text: &str) -> &str {
    let mut s = text.trim_start();
    loop {
        let before = s;
        s = s.trim_start_matches(['-', '*', '>', '#']).trim_start();
        if let Some(rest) = strip_one_bracketed(s) {
            s = rest.trim_start();
        }
        if s == before {
            break;
        }
    }
    s
}

fn strip_one_bracketed(s: &str) -> Option<&str> {
    let close = match s.chars().next()? {
        '[' => ']',
        '(' => ')',
        _ => return None,
    };
    let end = s.find(close)?;
    Some(s[end + 1..].trim_start_matches(':').trim_start())
}

/// True if `content`, after stripping structural wrapping, case-insensitively
/// equals one of the configured reset triggers.
fn matches_reset_trigger(content: &str, triggers: &[String]) -> bool {
    let stripped = strip_structural_prefix(content).trim();
    if stripped.is_empty() {
        return false;
    }
    triggers.iter().any(|t| stripped.eq_ignore_ascii_case(t))
}

fn idle_ms_for(chat_type: ChatType, channel_override: Option<u64>, cfg: &SessionConfig) -> u64 {
    if let Some(ms) = channel_override {
        return ms;
    }
    match chat_type {
        ChatType::Direct => cfg.direct_idle_ms,
        ChatType::Group => cfg.group_idle_ms,
        ChatType::Thread => cfg.thread_idle_ms,
    }
}

fn is_stale(entry: &Session, now: DateTime<Utc>, idle_ms: u64) -> bool {
    let elapsed_ms = (now - entry.updated_at).num_milliseconds().max(0);
    elapsed_ms as u64 > idle_ms
}

/// Optional extension seam fired around a session replacement. No concrete
/// implementation is wired into this build, the same "interface only" shape
/// as `agent_runner::AgentExecutor` for the LLM call itself.
pub trait SessionHooks: Send + Sync {
    fn session_start(&self, _session: &Session) {}
    fn session_end(&self, _session: &Session) {}
}

/// Everything Session Init needs to know about the inbound turn that isn't
/// already captured by `SessionKey` itself.
#[derive(Debug, Clone)]
pub struct SessionInitContext {
    pub session_key: String,
    /// Raw inbound text, used only for reset-trigger detection.
    pub content: String,
    pub channel: String,
    pub to: String,
    pub account_id: Option<String>,
    pub thread_id: Option<String>,
    pub chat_type: ChatType,
    /// Per-channel idle override, if `resetIdleMs` is configured for this channel.
    pub channel_idle_override_ms: Option<u64>,
    /// Whether the sender is authorized to issue reset commands. Unauthorized
    /// senders can still dispatch into a session, they just can't force a reset.
    pub command_authorized: bool,
    pub now: DateTime<Utc>,
    /// Fork the fresh session's history from this parent session's transcript
    /// instead of starting empty, when a reset/stale replacement occurs.
    pub parent_session_key: Option<String>,
}

/// Result of resolving a session for one turn.
pub struct SessionInitResult {
    pub session: Session,
    pub was_reset: bool,
    pub was_forked: bool,
    /// `ctx.content` with the matched reset trigger removed, so the caller
    /// doesn't forward a bare `/new` to the agent as if it were a prompt.
    pub content_after_trigger: String,
}

/// Snapshot the prior lineage's transcript under an archive key so a reset
/// doesn't lose it, without hiding the live key from `list_keys`.
async fn archive_prior(sessions: &dyn SessionStore, prior: &Session) -> anyhow::Result<()> {
    let mut snapshot = prior.clone();
    snapshot.key = format!("{}:archive:{}", prior.key, prior.session_id);
    snapshot.archived = true;
    sessions.save(&snapshot).await
}

/// Resolve the `Session` for this turn: `initSessionState` in the teacher's
/// idiom, built on `SessionStore::get_or_create`/`save`.
pub async fn init_session(
    ctx: &SessionInitContext,
    cfg: &SessionConfig,
    sessions: &dyn SessionStore,
    hooks: Option<&dyn SessionHooks>,
) -> anyhow::Result<SessionInitResult> {
    let existing = sessions.get_or_create(&ctx.session_key).await?;

    let reset_triggered =
        ctx.command_authorized && matches_reset_trigger(&ctx.content, &cfg.reset_triggers);
    let idle_ms = idle_ms_for(ctx.chat_type, ctx.channel_idle_override_ms, cfg);
    let stale = !reset_triggered && is_stale(&existing, ctx.now, idle_ms);
    let replace = reset_triggered || stale;

    // `matches_reset_trigger` only fires when the stripped content equals
    // the trigger exactly, so a reset consumes the whole message.
    let content_after_trigger = if reset_triggered { String::new() } else { ctx.content.clone() };

    let (mut session, was_forked) = if replace {
        archive_prior(sessions, &existing).await?;

        let mut fresh = Session::new(ctx.session_key.clone());
        fresh.carry_over_overrides(&existing);

        let mut forked = false;
        if let Some(parent_key) = &ctx.parent_session_key {
            let parent = sessions.get_or_create(parent_key).await?;
            fresh.messages = parent.messages.clone();
            fresh.forked_from_parent = Some(parent_key.clone());
            forked = true;
        }

        if let Some(hooks) = hooks {
            hooks.session_end(&existing);
        }
        tracing::info!(
            session_key = %ctx.session_key,
            old_session_id = %existing.session_id,
            new_session_id = %fresh.session_id,
            reset_triggered,
            stale,
            "session_end"
        );
        (fresh, forked)
    } else {
        (existing, false)
    };

    session.apply_delivery_context(
        &ctx.channel,
        &ctx.to,
        ctx.account_id.as_deref(),
        ctx.thread_id.as_deref(),
        ctx.chat_type,
    );

    sessions.save(&session).await?;

    if replace {
        if let Some(hooks) = hooks {
            hooks.session_start(&session);
        }
        tracing::info!(
            session_key = %ctx.session_key,
            session_id = %session.session_id,
            "session_start"
        );
    }

    Ok(SessionInitResult {
        session,
        was_reset: replace,
        was_forked,
        content_after_trigger,
    })
}

/// Mint a fresh lineage for an already-loaded session without going through
/// the store, used by the cron scratch-session path which keys each run
/// under a brand new `:run:<uuid>` anyway and never needs reset detection.
pub fn fresh_session_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests;
