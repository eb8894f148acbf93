/// Delivers a finished subagent's output back into its requester's session.
use crate::reply::{ReplyDispatcher, ReplyPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceStatus {
    Ok,
    Silent,
    Error,
}

/// Run the announce flow for one finished subagent turn.
///
/// `ping_pong_turns` counts how many agent-to-agent announce round trips
/// this requester chain has already taken; once it reaches
/// `max_ping_pong_turns` the exchange is forcibly terminated rather than
/// announced, to bound subagent-to-subagent chatter.
pub async fn run_subagent_announce_flow(
    dispatcher: &mut ReplyDispatcher<'_>,
    final_text: &str,
    best_effort_deliver: bool,
    ping_pong_turns: u32,
    max_ping_pong_turns: u32,
) -> AnnounceStatus {
    if final_text.trim() == super::NO_REPLY {
        return AnnounceStatus::Silent;
    }
    if ping_pong_turns >= max_ping_pong_turns {
        tracing::warn!(
            "subagent announce: ping-pong budget ({}) exhausted, dropping announce",
            max_ping_pong_turns
        );
        return AnnounceStatus::Silent;
    }

    let payload = ReplyPayload {
        text: Some(final_text.to_string()),
        ..Default::default()
    };

    match dispatcher.deliver(payload).await {
        Ok(()) => AnnounceStatus::Ok,
        Err(e) if best_effort_deliver => {
            tracing::warn!("subagent announce delivery failed, best-effort: {}", e);
            AnnounceStatus::Ok
        }
        Err(e) => {
            tracing::error!("subagent announce delivery failed: {}", e);
            AnnounceStatus::Error
        }
    }
}
