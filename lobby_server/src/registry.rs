// Online-session registry and per-user notification serialization.
//
// A user's request/reply stream and asynchronous notifications share one
// socket, so all writes for a user must serialize. Each bound user gets an
// unbounded FIFO queue drained by a dedicated notifier task; the write half
// itself sits behind a mutex shared with the owning connection worker, which
// writes direct replies through the same lock.

use common::codec;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

struct Entry {
    queue: mpsc::UnboundedSender<Value>,
    notifier: JoinHandle<()>,
}

#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<i64, Entry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the user's outbound queue. Rebinding replaces the previous
    /// entry; its notifier drains whatever was queued and exits on its own.
    pub async fn bind(&self, user_id: i64, writer: SharedWriter) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let notifier = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let mut writer = writer.lock().await;
                if let Err(err) = codec::send_json(&mut *writer, frame).await {
                    warn!(user_id, error = %err, "notification write failed");
                    break;
                }
            }
        });

        let previous = self.entries.lock().await.insert(
            user_id,
            Entry {
                queue: tx,
                notifier,
            },
        );
        if previous.is_some() {
            debug!(user_id, "session rebound");
        }
    }

    /// Enqueues a frame for the user; false when the user is not bound.
    /// Never blocks on the network.
    pub async fn notify(&self, user_id: i64, frame: Value) -> bool {
        let entries = self.entries.lock().await;
        match entries.get(&user_id) {
            Some(entry) => entry.queue.send(frame).is_ok(),
            None => false,
        }
    }

    /// Removes the user and waits until no send is in flight for them.
    pub async fn unbind(&self, user_id: i64) {
        let entry = self.entries.lock().await.remove(&user_id);
        if let Some(entry) = entry {
            drop(entry.queue);
            let _ = entry.notifier.await;
        }
    }
}
