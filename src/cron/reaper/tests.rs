use super::*;
use crate::session::Session;
use async_trait::async_trait;
use chrono::DateTime;
use std::sync::Mutex as StdMutex;

struct FakeStore {
    sessions: StdMutex<Vec<(String, DateTime<Utc>)>>,
}

#[async_trait]
impl SessionStore for FakeStore {
    async fn get_or_create(&self, key: &str) -> anyhow::Result<Session> {
        Ok(Session::new(key.to_string()))
    }
    async fn save(&self, _session: &Session) -> anyhow::Result<()> {
        Ok(())
    }
    async fn reset(&self, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn fork(&self, key: &str) -> anyhow::Result<String> {
        Ok(format!("{key}:fork"))
    }
    async fn archive(&self, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn list_run_sessions(&self) -> anyhow::Result<Vec<(String, DateTime<Utc>)>> {
        Ok(self.sessions.lock().unwrap().clone())
    }
    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.sessions.lock().unwrap().retain(|(k, _)| k != key);
        Ok(())
    }
}

#[tokio::test]
async fn test_disabled_reaper_deletes_nothing() {
    let store = Arc::new(FakeStore {
        sessions: StdMutex::new(vec![("base:run:1".to_string(), Utc::now() - chrono::Duration::days(2))]),
    });
    let reaper = SessionReaper::new(store, None);
    let deleted = reaper.sweep_once().await.unwrap();
    assert!(deleted.is_empty());
}

#[tokio::test]
async fn test_sweep_deletes_sessions_past_retention() {
    let stale = Utc::now() - chrono::Duration::hours(25);
    let fresh = Utc::now() - chrono::Duration::hours(1);
    let store = Arc::new(FakeStore {
        sessions: StdMutex::new(vec![
            ("base:run:stale".to_string(), stale),
            ("base:run:fresh".to_string(), fresh),
        ]),
    });
    let reaper = SessionReaper::new(store.clone(), Some(DEFAULT_RETENTION));
    let deleted = reaper.sweep_once().await.unwrap();
    assert_eq!(deleted, vec!["base:run:stale".to_string()]);
    let remaining = store.list_run_sessions().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].0, "base:run:fresh");
}

#[tokio::test]
async fn test_sweep_with_no_stale_sessions_deletes_nothing() {
    let fresh = Utc::now();
    let store = Arc::new(FakeStore {
        sessions: StdMutex::new(vec![("base:run:fresh".to_string(), fresh)]),
    });
    let reaper = SessionReaper::new(store, Some(DEFAULT_RETENTION));
    let deleted = reaper.sweep_once().await.unwrap();
    assert!(deleted.is_empty());
}
