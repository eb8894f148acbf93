/// Per-conversation debounce of rapid-fire inbound messages.
///
/// A new message for a conversation starts (or extends) a timer; when the
/// timer elapses the accumulated batch is flushed as a single envelope.
/// Grounded on `utils::task_tracker::TaskTracker`'s named-task-replacement
/// pattern: enqueuing for a key that already has a pending timer aborts and
/// replaces it, extending the window.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::bus::InboundMessage;

/// Does this message bypass debouncing entirely (control commands and
/// anything carrying attachments flush immediately)?
fn bypasses_debounce(msg: &InboundMessage) -> bool {
    msg.content.trim_start().starts_with('/') || !msg.attachments.is_empty()
}

struct PendingBatch {
    entries: Vec<InboundMessage>,
    timer: JoinHandle<()>,
}

/// Debounces inbound events per conversation (`InboundMessage::session_key`)
/// and forwards flushed batches over `flush_tx`.
pub struct Debouncer {
    window: Duration,
    pending: Arc<Mutex<HashMap<String, PendingBatch>>>,
    flush_tx: mpsc::Sender<InboundMessage>,
}

/// Concatenate a batch's texts (newline-joined) into the last envelope, per
/// the "forward only the last envelope with concatenated text" contract.
fn merge_batch(mut entries: Vec<InboundMessage>) -> InboundMessage {
    if entries.len() == 1 {
        return entries.remove(0);
    }
    let joined = entries
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let mut last = entries.pop().expect("batch is non-empty");
    last.content = joined;
    last
}

impl Debouncer {
    pub fn new(window: Duration, flush_tx: mpsc::Sender<InboundMessage>) -> Self {
        Self {
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
            flush_tx,
        }
    }

    /// Enqueue an inbound message. Immediately flushed if it bypasses
    /// debouncing; otherwise joins (or starts) the conversation's batch.
    pub async fn enqueue(&self, msg: InboundMessage) {
        if bypasses_debounce(&msg) {
            let _ = self.flush_tx.send(msg).await;
            return;
        }

        let key = msg.session_key();
        let mut pending = self.pending.lock().await;
        if let Some(batch) = pending.get_mut(&key) {
            batch.entries.push(msg);
            batch.timer.abort();
            batch.timer = self.spawn_flush_timer(key.clone());
        } else {
            let timer = self.spawn_flush_timer(key.clone());
            pending.insert(key, PendingBatch { entries: vec![msg], timer });
        }
    }

    fn spawn_flush_timer(&self, key: String) -> JoinHandle<()> {
        let window = self.window;
        let pending = self.pending.clone();
        let flush_tx = self.flush_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let batch = { pending.lock().await.remove(&key) };
            if let Some(batch) = batch {
                let merged = merge_batch(batch.entries);
                let _ = flush_tx.send(merged).await;
            }
        })
    }
}
