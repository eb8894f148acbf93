/// Periodically sweeps `:run:<uuid>` scratch sessions left behind by
/// isolated cron job executions.
///
/// Lock ordering: this always runs outside any cron-service critical
/// section — it only ever talks to the session store, never the cron
/// store — so it can never invert the session-store-lock vs.
/// cron-service-mutex ordering the scheduling loop depends on.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::session::store::SessionStore;

pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

pub struct SessionReaper {
    store: Arc<dyn SessionStore>,
    retention: Option<Duration>,
}

impl SessionReaper {
    /// `retention = None` disables reaping entirely.
    pub fn new(store: Arc<dyn SessionStore>, retention: Option<Duration>) -> Self {
        Self { store, retention }
    }

    /// Run one sweep pass, returning the keys that were deleted.
    pub async fn sweep_once(&self) -> anyhow::Result<Vec<String>> {
        let Some(retention) = self.retention else {
            return Ok(Vec::new());
        };
        let cutoff = Utc::now() - chrono::Duration::from_std(retention)?;
        let run_sessions = self.store.list_run_sessions().await?;
        let mut deleted = Vec::new();
        for (key, updated_at) in run_sessions {
            if updated_at < cutoff {
                match self.store.delete(&key).await {
                    Ok(()) => {
                        debug!("reaped stale cron run session {}", key);
                        deleted.push(key);
                    }
                    Err(e) => warn!("failed to reap session {}: {}", key, e),
                }
            }
        }
        if !deleted.is_empty() {
            info!("session reaper swept {} stale run session(s)", deleted.len());
        }
        Ok(deleted)
    }

    /// Run sweeps on a loop, throttled to at least `MIN_SWEEP_INTERVAL`
    /// apart, until `self` is dropped (caller holds the spawned handle).
    pub fn spawn_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(MIN_SWEEP_INTERVAL).await;
                if let Err(e) = self.sweep_once().await {
                    warn!("session reaper sweep failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests;
