/// TTL-bounded LRU of recently-sent message keys, used to suppress echo
/// loops when an outbound delivery is re-ingested as an inbound event.
/// Mirrors the `lru::LruCache` pattern `session::manager` uses for its
/// in-memory session cache.
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::Mutex;

const DEFAULT_CAPACITY: usize = 256;

pub struct EchoCache {
    entries: Mutex<LruCache<String, Instant>>,
    ttl: Duration,
}

impl EchoCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_CAPACITY).expect("nonzero capacity"),
            )),
            ttl,
        }
    }

    /// Record that we just sent `key` outbound.
    pub async fn record(&self, key: &str) {
        self.entries.lock().await.put(key.to_string(), Instant::now());
    }

    /// Check (without mutating recency) whether `key` was sent within the TTL window.
    pub async fn contains(&self, key: &str) -> bool {
        let mut cache = self.entries.lock().await;
        match cache.peek(key) {
            Some(sent_at) if sent_at.elapsed() < self.ttl => true,
            Some(_) => {
                cache.pop(key);
                false
            }
            None => false,
        }
    }
}

impl Default for EchoCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
