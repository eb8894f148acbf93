use crate::bus::events::ChatType;
use crate::config::schema::ThinkingLevel;
use crate::session::store::SessionStore;
use crate::utils::{ensure_dir, get_switchboard_home, safe_filename};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tokio::sync::Mutex;
use uuid::Uuid;

const MAX_CACHED_SESSIONS: usize = 64;
const MAX_SESSION_MESSAGES: usize = 200;

/// Running token/cost accounting for a session, merged in as each agent run completes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl UsageStats {
    pub fn merge(&mut self, other: &UsageStats) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd += other.cost_usd;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub messages: Vec<MessageData>,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "chrono::Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub usage: UsageStats,
    #[serde(default)]
    pub archived: bool,

    /// Identity of the current run lineage. Reminted whenever Session Init
    /// decides the prior transcript is stale or a reset trigger fired.
    #[serde(default = "Uuid::new_v4")]
    pub session_id: Uuid,
    /// Whether the system prompt has already been sent down this lineage.
    #[serde(default)]
    pub system_sent: bool,
    /// Set when the previous run on this session was aborted mid-flight, so
    /// the next turn knows to surface that rather than splice in silently.
    #[serde(default)]
    pub aborted_last_run: bool,

    // User-set behavior overrides. These survive a `/new`/`/reset` — only
    // the transcript and counters below it are wiped.
    #[serde(default)]
    pub thinking_level: ThinkingLevel,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub show_reasoning: bool,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub provider_override: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub tts_auto: bool,
    #[serde(default)]
    pub auth_profile_override: Option<String>,

    /// Tokens currently resident in the session's context window, as
    /// opposed to `usage`'s lifetime totals. Reset to 0 on `/new`.
    #[serde(default)]
    pub context_tokens: u64,
    #[serde(default)]
    pub compaction_count: u32,
    /// Path to the on-disk transcript this lineage is backed by.
    #[serde(default)]
    pub session_file: Option<String>,
    /// Session key this lineage was forked from, if any.
    #[serde(default)]
    pub forked_from_parent: Option<String>,

    // Last-observed delivery context. Never overwritten by an internal or
    // webchat context once a real channel has been recorded here.
    #[serde(default)]
    pub last_channel: Option<String>,
    #[serde(default)]
    pub last_to: Option<String>,
    #[serde(default)]
    pub last_account_id: Option<String>,
    #[serde(default)]
    pub last_thread_id: Option<String>,
    #[serde(default)]
    pub chat_type: ChatType,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub skills_snapshot: Vec<String>,
}

/// Build the `:run:<uuid>` scratch-session key used for a single cron job
/// invocation. These sessions are swept by the reaper and never listed.
pub fn run_session_key(base_key: &str) -> String {
    format!("{base_key}:run:{}", Uuid::new_v4())
}

pub fn is_run_session_key(key: &str) -> bool {
    key.contains(":run:")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageData {
    pub role: String,
    pub content: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Default for Session {
    fn default() -> Self {
        Session::new(String::new())
    }
}

impl Session {
    pub fn new(key: String) -> Self {
        Self {
            key,
            messages: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            metadata: HashMap::new(),
            usage: UsageStats::default(),
            archived: false,
            session_id: Uuid::new_v4(),
            system_sent: false,
            aborted_last_run: false,
            thinking_level: ThinkingLevel::default(),
            verbose: false,
            show_reasoning: false,
            model_override: None,
            provider_override: None,
            label: None,
            tts_auto: false,
            auth_profile_override: None,
            context_tokens: 0,
            compaction_count: 0,
            session_file: None,
            forked_from_parent: None,
            last_channel: None,
            last_to: None,
            last_account_id: None,
            last_thread_id: None,
            chat_type: ChatType::default(),
            display_name: None,
            skills_snapshot: Vec::new(),
        }
    }

    /// Carry the user-set behavior overrides from a prior lineage into this
    /// fresh one. Called by Session Init on reset — everything not named
    /// here (transcript, counters, `session_id`) starts clean.
    pub fn carry_over_overrides(&mut self, prior: &Session) {
        self.thinking_level = prior.thinking_level;
        self.verbose = prior.verbose;
        self.show_reasoning = prior.show_reasoning;
        self.model_override = prior.model_override.clone();
        self.provider_override = prior.provider_override.clone();
        self.label = prior.label.clone();
        self.tts_auto = prior.tts_auto;
        self.auth_profile_override = prior.auth_profile_override.clone();
    }

    /// Record the channel/recipient this turn arrived on. An internal or
    /// webchat context (`channel` starting with `internal:` or equal to
    /// `"webchat"`) never overwrites a previously-recorded real channel.
    pub fn apply_delivery_context(
        &mut self,
        channel: &str,
        to: &str,
        account_id: Option<&str>,
        thread_id: Option<&str>,
        chat_type: ChatType,
    ) {
        let is_internal = channel.starts_with("internal:") || channel == "webchat";
        if !(is_internal && self.last_channel.is_some()) {
            self.last_channel = Some(channel.to_string());
            self.last_to = Some(to.to_string());
            self.last_account_id = account_id.map(str::to_string);
            self.last_thread_id = thread_id.map(str::to_string);
        }
        self.chat_type = chat_type;
    }

    pub fn add_message(&mut self, role: String, content: String, extra: HashMap<String, Value>) {
        let msg = MessageData {
            role,
            content,
            timestamp: Utc::now().to_rfc3339(),
            extra,
        };
        self.messages.push(msg);
        self.updated_at = Utc::now();

        // Prune oldest messages
        if self.messages.len() > MAX_SESSION_MESSAGES {
            let drain_count = self.messages.len() - MAX_SESSION_MESSAGES;
            self.messages.drain(..drain_count);
        }
    }

    pub fn get_history(&self, max_messages: usize) -> Vec<HashMap<String, Value>> {
        let start = if self.messages.len() > max_messages {
            self.messages.len() - max_messages
        } else {
            0
        };

        self.messages[start..]
            .iter()
            .map(|m| {
                let mut map = HashMap::new();
                map.insert("role".to_string(), Value::String(m.role.clone()));
                map.insert("content".to_string(), Value::String(m.content.clone()));
                map
            })
            .collect()
    }

    pub fn get_full_history(&self) -> Vec<HashMap<String, Value>> {
        self.messages
            .iter()
            .map(|m| {
                let mut map = HashMap::new();
                map.insert("role".to_string(), Value::String(m.role.clone()));
                map.insert("content".to_string(), Value::String(m.content.clone()));
                map
            })
            .collect()
    }
}

pub struct SessionManager {
    _workspace: PathBuf,
    sessions_dir: PathBuf,
    cache: Mutex<LruCache<String, Session>>,
}

impl SessionManager {
    pub fn new(workspace: PathBuf) -> Result<Self> {
        let sessions_dir = ensure_dir(get_switchboard_home()?.join("sessions"))?;
        Ok(Self {
            _workspace: workspace.clone(),
            sessions_dir,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_CACHED_SESSIONS).expect("MAX_CACHED_SESSIONS must be > 0"),
            )),
        })
    }

    fn get_session_path(&self, key: &str) -> PathBuf {
        let safe_key = safe_filename(&key.replace(':', "_"));
        self.sessions_dir.join(format!("{}.json", safe_key))
    }

    pub async fn get_or_create(&self, key: &str) -> Result<Session> {
        // Check cache with single lock scope to prevent race conditions
        let cached_session = {
            let mut cache = self.cache.lock().await;
            cache.get(key).cloned()
        };

        if let Some(session) = cached_session {
            return Ok(session);
        }

        // Try to load from disk
        let session = self.load(key)?;
        let session = session.unwrap_or_else(|| Session::new(key.to_string()));

        // Put in cache - double-check pattern to avoid duplicates
        {
            let mut cache = self.cache.lock().await;
            // Check again in case another task loaded it
            if let Some(existing) = cache.get(key) {
                return Ok(existing.clone());
            }
            cache.put(key.to_string(), session.clone());
        }

        Ok(session)
    }

    fn load(&self, key: &str) -> Result<Option<Session>> {
        let path = self.get_session_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let session: Session = crate::utils::file_lock::read_under_lock(&path)
            .with_context(|| format!("failed to read session file: {}", path.display()))?;

        let mut session = session;
        if session.messages.len() > MAX_SESSION_MESSAGES {
            let drain_count = session.messages.len() - MAX_SESSION_MESSAGES;
            session.messages.drain(..drain_count);
        }
        Ok(Some(session))
    }

    pub async fn save(&self, session: &Session) -> Result<()> {
        let path = self.get_session_path(&session.key);
        ensure_dir(path.parent().context("session path has no parent")?)?;

        let to_persist = session.clone();
        crate::utils::file_lock::update_under_lock::<Session, _, _>(&path, move |existing| {
            *existing = to_persist.clone();
        })
        .with_context(|| format!("failed to write session file: {}", path.display()))?;

        {
            let mut cache = self.cache.lock().await;
            cache.put(session.key.clone(), session.clone());
        }

        Ok(())
    }

    /// Reset a session's conversation state, keeping the key.
    pub async fn reset(&self, key: &str) -> Result<()> {
        let fresh = Session::new(key.to_string());
        self.save(&fresh).await
    }

    /// Fork a session's current state into a freshly keyed copy.
    pub async fn fork(&self, key: &str) -> Result<String> {
        let source = self.get_or_create(key).await?;
        let new_key = format!("{key}:fork:{}", Uuid::new_v4());
        let mut forked = source;
        forked.key = new_key.clone();
        forked.created_at = Utc::now();
        forked.updated_at = Utc::now();
        self.save(&forked).await?;
        Ok(new_key)
    }

    /// Mark a session archived in place.
    pub async fn archive(&self, key: &str) -> Result<()> {
        let mut session = self.get_or_create(key).await?;
        session.archived = true;
        self.save(&session).await
    }

    /// List non-archived, non-scratch session keys known to the store.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(session) = crate::utils::file_lock::read_under_lock::<Session>(&path)
                && !session.archived
                && !is_run_session_key(&session.key)
            {
                keys.push(session.key);
            }
        }
        Ok(keys)
    }

    /// List `:run:<uuid>` scratch session keys with their last-updated time,
    /// for the session reaper to sweep.
    pub fn list_run_sessions(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(session) = crate::utils::file_lock::read_under_lock::<Session>(&path)
                && is_run_session_key(&session.key)
            {
                out.push((session.key, session.updated_at));
            }
        }
        Ok(out)
    }

    /// Remove a session's on-disk file and cache entry.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.get_session_path(key);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to delete session file: {}", path.display()))?;
        }
        self.cache.lock().await.pop(key);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SessionManager {
    async fn get_or_create(&self, key: &str) -> Result<Session> {
        SessionManager::get_or_create(self, key).await
    }

    async fn save(&self, session: &Session) -> Result<()> {
        SessionManager::save(self, session).await
    }

    async fn reset(&self, key: &str) -> Result<()> {
        SessionManager::reset(self, key).await
    }

    async fn fork(&self, key: &str) -> Result<String> {
        SessionManager::fork(self, key).await
    }

    async fn archive(&self, key: &str) -> Result<()> {
        SessionManager::archive(self, key).await
    }

    async fn list_run_sessions(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        SessionManager::list_run_sessions(self)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        SessionManager::delete(self, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new_creates_empty_session() {
        let session = Session::new("test_key".to_string());
        assert_eq!(session.key, "test_key");
        assert_eq!(session.messages.len(), 0);
        assert!(session.metadata.is_empty());
    }

    #[test]
    fn test_session_add_message() {
        let mut session = Session::new("test_key".to_string());
        let extra = HashMap::new();
        session.add_message("user".to_string(), "Hello".to_string(), extra);

        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, "user");
        assert_eq!(session.messages[0].content, "Hello");
    }

    #[test]
    fn test_session_get_history_with_limit() {
        let mut session = Session::new("test_key".to_string());
        let extra = HashMap::new();

        // Add 5 messages
        for i in 0..5 {
            session.add_message("user".to_string(), format!("Message {}", i), extra.clone());
        }

        let history = session.get_history(3);
        assert_eq!(history.len(), 3);

        // Should return last 3 messages (indices 2, 3, 4)
        assert_eq!(
            history[0]["content"],
            Value::String("Message 2".to_string())
        );
        assert_eq!(
            history[1]["content"],
            Value::String("Message 3".to_string())
        );
        assert_eq!(
            history[2]["content"],
            Value::String("Message 4".to_string())
        );
    }

    #[test]
    fn test_session_get_full_history() {
        let mut session = Session::new("test_key".to_string());
        let extra = HashMap::new();

        // Add 3 messages
        for i in 0..3 {
            session.add_message("user".to_string(), format!("Message {}", i), extra.clone());
        }

        let history = session.get_full_history();
        assert_eq!(history.len(), 3);

        for (i, entry) in history.iter().enumerate() {
            assert_eq!(entry["content"], Value::String(format!("Message {}", i)));
            assert_eq!(entry["role"], Value::String("user".to_string()));
        }
    }

    #[test]
    fn test_session_add_message_prunes_at_capacity() {
        let mut session = Session::new("test_key".to_string());
        let extra = HashMap::new();

        // Add MAX_SESSION_MESSAGES + 5 messages
        for i in 0..(MAX_SESSION_MESSAGES + 5) {
            session.add_message("user".to_string(), format!("Message {}", i), extra.clone());
        }

        // Should be capped at MAX_SESSION_MESSAGES
        assert_eq!(session.messages.len(), MAX_SESSION_MESSAGES);

        // First message should be the one at index 5 (0-4 should be pruned)
        assert_eq!(session.messages[0].content, "Message 5");

        // Last message should be the last one we added
        assert_eq!(
            session.messages[MAX_SESSION_MESSAGES - 1].content,
            format!("Message {}", MAX_SESSION_MESSAGES + 4)
        );
    }

    fn make_manager() -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var("SWITCHBOARD_HOME", dir.path()) };
        let mgr = SessionManager::new(dir.path().to_path_buf()).unwrap();
        (dir, mgr)
    }

    #[tokio::test]
    async fn test_save_and_reload_round_trip() {
        let (_dir, mgr) = make_manager();
        let mut session = mgr.get_or_create("telegram:123").await.unwrap();
        session.add_message("user".to_string(), "hi".to_string(), HashMap::new());
        mgr.save(&session).await.unwrap();

        let fresh = SessionManager::new(PathBuf::from(".")).unwrap();
        let reloaded = fresh.get_or_create("telegram:123").await.unwrap();
        assert_eq!(reloaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_history() {
        let (_dir, mgr) = make_manager();
        let mut session = mgr.get_or_create("slack:1").await.unwrap();
        session.add_message("user".to_string(), "hi".to_string(), HashMap::new());
        mgr.save(&session).await.unwrap();

        mgr.reset("slack:1").await.unwrap();
        let after = mgr.get_or_create("slack:1").await.unwrap();
        assert!(after.messages.is_empty());
    }

    #[tokio::test]
    async fn test_fork_copies_history_into_new_key() {
        let (_dir, mgr) = make_manager();
        let mut session = mgr.get_or_create("slack:2").await.unwrap();
        session.add_message("user".to_string(), "hi".to_string(), HashMap::new());
        mgr.save(&session).await.unwrap();

        let forked_key = mgr.fork("slack:2").await.unwrap();
        assert_ne!(forked_key, "slack:2");
        let forked = mgr.get_or_create(&forked_key).await.unwrap();
        assert_eq!(forked.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_archive_excludes_from_list_keys() {
        let (_dir, mgr) = make_manager();
        mgr.get_or_create("discord:1").await.unwrap();
        mgr.save(&mgr.get_or_create("discord:1").await.unwrap())
            .await
            .unwrap();
        mgr.archive("discord:1").await.unwrap();

        let keys = mgr.list_keys().unwrap();
        assert!(!keys.contains(&"discord:1".to_string()));
    }

    #[test]
    fn test_run_session_key_is_marked() {
        let key = run_session_key("discord:1");
        assert!(is_run_session_key(&key));
        assert!(!is_run_session_key("discord:1"));
    }
}
