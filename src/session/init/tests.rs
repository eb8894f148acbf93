use super::*;
use crate::config::schema::SessionConfig;
use crate::session::manager::SessionManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn make_manager() -> (tempfile::TempDir, SessionManager) {
    let dir = tempfile::tempdir().unwrap();
    unsafe { std::env::set_var("SWITCHBOARD_HOME", dir.path()) };
    let mgr = SessionManager::new(dir.path().to_path_buf()).unwrap();
    (dir, mgr)
}

fn make_ctx(session_key: &str, content: &str) -> SessionInitContext {
    SessionInitContext {
        session_key: session_key.to_string(),
        content: content.to_string(),
        channel: "telegram".to_string(),
        to: "chat-1".to_string(),
        account_id: None,
        thread_id: None,
        chat_type: ChatType::Direct,
        channel_idle_override_ms: None,
        command_authorized: true,
        now: Utc::now(),
        parent_session_key: None,
    }
}

#[test]
fn test_strip_structural_prefix_unwraps_timestamp_label() {
    assert_eq!(strip_structural_prefix("[12:03] /new"), "/new");
    assert_eq!(strip_structural_prefix("> - /reset"), "/reset");
    assert_eq!(strip_structural_prefix("(history) /new"), "/new");
}

#[test]
fn test_matches_reset_trigger_is_case_insensitive() {
    let triggers = vec!["/new".to_string(), "/reset".to_string()];
    assert!(matches_reset_trigger("/NEW", &triggers));
    assert!(matches_reset_trigger("[09:00] /Reset", &triggers));
    assert!(!matches_reset_trigger("hello /new world", &triggers));
    assert!(!matches_reset_trigger("", &triggers));
}

#[tokio::test]
async fn test_first_dispatch_creates_session_without_reset() {
    let (_dir, mgr) = make_manager();
    let cfg = SessionConfig::default();
    let ctx = make_ctx("telegram:chat1", "hello");

    let result = init_session(&ctx, &cfg, &mgr, None).await.unwrap();
    assert!(!result.was_reset);
    assert_eq!(result.content_after_trigger, "hello");
    assert_eq!(result.session.last_channel, Some("telegram".to_string()));
}

#[tokio::test]
async fn test_reset_trigger_mints_new_session_id_and_clears_transcript() {
    let (_dir, mgr) = make_manager();
    let cfg = SessionConfig::default();
    let key = "telegram:chat2";

    let first = init_session(&make_ctx(key, "hi"), &cfg, &mgr, None).await.unwrap();
    let mut session = first.session;
    session.add_message("user".to_string(), "hi".to_string(), Default::default());
    session.verbose = true;
    session.model_override = Some("claude-opus".to_string());
    mgr.save(&session).await.unwrap();
    let old_id = session.session_id;

    let reset = init_session(&make_ctx(key, "/new"), &cfg, &mgr, None).await.unwrap();
    assert!(reset.was_reset);
    assert_eq!(reset.content_after_trigger, "");
    assert_ne!(reset.session.session_id, old_id);
    assert!(reset.session.messages.is_empty());
    // overrides carried across the reset
    assert!(reset.session.verbose);
    assert_eq!(reset.session.model_override, Some("claude-opus".to_string()));

    // prior transcript archived under a side key, not lost
    let archived = mgr
        .get_or_create(&format!("{key}:archive:{old_id}"))
        .await
        .unwrap();
    assert_eq!(archived.messages.len(), 1);
}

#[tokio::test]
async fn test_stale_session_resets_without_trigger() {
    let (_dir, mgr) = make_manager();
    let mut cfg = SessionConfig::default();
    cfg.direct_idle_ms = 1;
    let key = "telegram:chat3";

    let first = init_session(&make_ctx(key, "hi"), &cfg, &mgr, None).await.unwrap();
    let old_id = first.session.session_id;

    let mut later_ctx = make_ctx(key, "still here?");
    later_ctx.now = Utc::now() + chrono::Duration::milliseconds(50);
    let second = init_session(&later_ctx, &cfg, &mgr, None).await.unwrap();

    assert!(second.was_reset);
    assert_ne!(second.session.session_id, old_id);
}

#[tokio::test]
async fn test_unauthorized_sender_cannot_trigger_reset() {
    let (_dir, mgr) = make_manager();
    let cfg = SessionConfig::default();
    let key = "telegram:chat4";

    let first = init_session(&make_ctx(key, "hi"), &cfg, &mgr, None).await.unwrap();
    let old_id = first.session.session_id;

    let mut ctx = make_ctx(key, "/new");
    ctx.command_authorized = false;
    let second = init_session(&ctx, &cfg, &mgr, None).await.unwrap();

    assert!(!second.was_reset);
    assert_eq!(second.session.session_id, old_id);
    assert_eq!(second.content_after_trigger, "/new");
}

#[tokio::test]
async fn test_internal_channel_does_not_overwrite_real_channel() {
    let (_dir, mgr) = make_manager();
    let cfg = SessionConfig::default();
    let key = "telegram:chat5";

    init_session(&make_ctx(key, "hi"), &cfg, &mgr, None).await.unwrap();

    let mut ctx = make_ctx(key, "ping");
    ctx.channel = "internal:heartbeat".to_string();
    ctx.to = "n/a".to_string();
    let result = init_session(&ctx, &cfg, &mgr, None).await.unwrap();

    assert_eq!(result.session.last_channel, Some("telegram".to_string()));
}

#[tokio::test]
async fn test_reset_forks_from_parent_session() {
    let (_dir, mgr) = make_manager();
    let cfg = SessionConfig::default();

    let parent_key = "telegram:parent";
    let mut parent = init_session(&make_ctx(parent_key, "hi"), &cfg, &mgr, None).await.unwrap().session;
    parent.add_message("user".to_string(), "parent history".to_string(), Default::default());
    mgr.save(&parent).await.unwrap();

    let mut ctx = make_ctx("telegram:child", "/new");
    ctx.parent_session_key = Some(parent_key.to_string());
    let result = init_session(&ctx, &cfg, &mgr, None).await.unwrap();

    assert!(result.was_forked);
    assert_eq!(result.session.forked_from_parent, Some(parent_key.to_string()));
    assert_eq!(result.session.messages.len(), 1);
}

#[derive(Default)]
struct CountingHooks {
    starts: AtomicUsize,
    ends: AtomicUsize,
}

impl SessionHooks for CountingHooks {
    fn session_start(&self, _session: &Session) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn session_end(&self, _session: &Session) {
        self.ends.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_hooks_fire_only_on_replacement() {
    let (_dir, mgr) = make_manager();
    let cfg = SessionConfig::default();
    let key = "telegram:chat6";
    let hooks = Arc::new(CountingHooks::default());

    init_session(&make_ctx(key, "hi"), &cfg, &mgr, Some(hooks.as_ref())).await.unwrap();
    assert_eq!(hooks.starts.load(Ordering::SeqCst), 0);
    assert_eq!(hooks.ends.load(Ordering::SeqCst), 0);

    init_session(&make_ctx(key, "/new"), &cfg, &mgr, Some(hooks.as_ref())).await.unwrap();
    assert_eq!(hooks.starts.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.ends.load(Ordering::SeqCst), 1);
}

