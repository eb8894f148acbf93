use super::*;
use crate::channels::base::BaseChannel;
use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex};

struct RecordingChannel {
    sent: Arc<StdMutex<Vec<OutboundMessage>>>,
}

#[async_trait]
impl BaseChannel for RecordingChannel {
    fn name(&self) -> &str {
        "test"
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

fn make_manager() -> (ChannelManager, Arc<StdMutex<Vec<OutboundMessage>>>) {
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let manager = ChannelManager::with_channels(vec![Box::new(RecordingChannel { sent: sent.clone() })]);
    (manager, sent)
}

#[tokio::test]
async fn test_non_renderable_payload_dropped() {
    let (manager, sent) = make_manager();
    let mut dispatcher =
        ReplyDispatcher::new(&manager, "test", "chat1", None, ThreadingMode::Off, 4000);
    dispatcher.deliver(ReplyPayload::default()).await.unwrap();
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_reasoning_suppressed_by_default() {
    let (manager, sent) = make_manager();
    let mut dispatcher =
        ReplyDispatcher::new(&manager, "test", "chat1", None, ThreadingMode::Off, 4000);
    let payload = ReplyPayload {
        text: Some("thinking...".to_string()),
        is_reasoning: true,
        ..Default::default()
    };
    dispatcher.deliver(payload).await.unwrap();
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_reasoning_allowed_when_enabled() {
    let (manager, sent) = make_manager();
    let mut dispatcher =
        ReplyDispatcher::new(&manager, "test", "chat1", None, ThreadingMode::Off, 4000)
            .allow_reasoning(true);
    let payload = ReplyPayload {
        text: Some("thinking...".to_string()),
        is_reasoning: true,
        ..Default::default()
    };
    dispatcher.deliver(payload).await.unwrap();
    assert_eq!(sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_reply_to_current_binds_current_message_id() {
    let (manager, sent) = make_manager();
    let mut dispatcher = ReplyDispatcher::new(
        &manager,
        "test",
        "chat1",
        Some("msg-42".to_string()),
        ThreadingMode::Always,
        4000,
    );
    let payload = ReplyPayload {
        text: Some("hi".to_string()),
        reply_to_current: true,
        ..Default::default()
    };
    dispatcher.deliver(payload).await.unwrap();
    let messages = sent.lock().unwrap();
    assert_eq!(messages[0].reply_to.as_deref(), Some("msg-42"));
}

#[tokio::test]
async fn test_explicit_reply_tag_stripped_and_used() {
    let (manager, sent) = make_manager();
    let mut dispatcher =
        ReplyDispatcher::new(&manager, "test", "chat1", None, ThreadingMode::Always, 4000);
    let payload = ReplyPayload {
        text: Some("here's your answer [[reply-to:abc123]]".to_string()),
        ..Default::default()
    };
    dispatcher.deliver(payload).await.unwrap();
    let messages = sent.lock().unwrap();
    assert_eq!(messages[0].content, "here's your answer");
    assert_eq!(messages[0].reply_to.as_deref(), Some("abc123"));
}

#[tokio::test]
async fn test_threading_off_never_sets_reply_to() {
    let (manager, sent) = make_manager();
    let mut dispatcher = ReplyDispatcher::new(
        &manager,
        "test",
        "chat1",
        Some("msg-1".to_string()),
        ThreadingMode::Off,
        4000,
    );
    let payload = ReplyPayload {
        text: Some("hi [[reply-to:zzz]]".to_string()),
        ..Default::default()
    };
    dispatcher.deliver(payload).await.unwrap();
    let messages = sent.lock().unwrap();
    assert_eq!(messages[0].reply_to, None);
}

#[tokio::test]
async fn test_threading_first_only_applies_to_first_reply() {
    let (manager, sent) = make_manager();
    let mut dispatcher = ReplyDispatcher::new(
        &manager,
        "test",
        "chat1",
        Some("msg-1".to_string()),
        ThreadingMode::First,
        4000,
    );
    dispatcher
        .deliver(ReplyPayload { text: Some("first".to_string()), reply_to_current: true, ..Default::default() })
        .await
        .unwrap();
    dispatcher
        .deliver(ReplyPayload { text: Some("second".to_string()), reply_to_current: true, ..Default::default() })
        .await
        .unwrap();
    let messages = sent.lock().unwrap();
    assert_eq!(messages[0].reply_to.as_deref(), Some("msg-1"));
    assert_eq!(messages[1].reply_to, None);
}

#[tokio::test]
async fn test_messaging_tool_dedupe_suppresses_duplicate() {
    let (manager, sent) = make_manager();
    let mut dispatcher =
        ReplyDispatcher::new(&manager, "test", "chat1", None, ThreadingMode::Off, 4000);
    dispatcher.mark_already_sent("already delivered");
    dispatcher
        .deliver(ReplyPayload { text: Some("already delivered".to_string()), ..Default::default() })
        .await
        .unwrap();
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_long_text_chunked_per_channel_limit() {
    let (manager, sent) = make_manager();
    let mut dispatcher =
        ReplyDispatcher::new(&manager, "test", "chat1", None, ThreadingMode::Off, 10);
    let text = "a".repeat(25);
    dispatcher
        .deliver(ReplyPayload { text: Some(text), ..Default::default() })
        .await
        .unwrap();
    assert!(sent.lock().unwrap().len() > 1);
}

#[test]
fn test_resolve_text_chunk_limit_prefers_per_channel() {
    assert_eq!(resolve_text_chunk_limit(Some(500), 4000), 500);
    assert_eq!(resolve_text_chunk_limit(None, 4000), 4000);
}
