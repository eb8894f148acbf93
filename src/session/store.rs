use crate::session::Session;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Pluggable session storage backend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get or create a session with the given key.
    async fn get_or_create(&self, key: &str) -> Result<Session>;

    /// Save a session.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Reset a session's conversation state (keeps the key, clears history and usage).
    async fn reset(&self, key: &str) -> Result<()>;

    /// Fork a session into a new key, copying its history. Returns the new key.
    async fn fork(&self, key: &str) -> Result<String>;

    /// Mark a session archived. Archived sessions are excluded from
    /// `sessions.list` but remain readable by key.
    async fn archive(&self, key: &str) -> Result<()>;

    /// List `:run:<uuid>` scratch session keys with their last-updated time,
    /// for the reaper to find sweep candidates.
    async fn list_run_sessions(&self) -> Result<Vec<(String, DateTime<Utc>)>>;

    /// Permanently remove a session.
    async fn delete(&self, key: &str) -> Result<()>;
}
