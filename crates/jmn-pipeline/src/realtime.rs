//! In-process real-time channel: one broadcast sender per connected user.

use std::collections::HashMap;

use async_trait::async_trait;
use jmn_core::NotificationRecord;
use jmn_storage::{PushOutcome, RealtimeChannel, StoreError};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

pub struct SessionHub {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<NotificationRecord>>>,
    capacity: usize,
}

impl SessionHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Open a session for `user_id`. The session ends when the receiver is dropped.
    pub async fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<NotificationRecord> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub async fn connected_sessions(&self, user_id: Uuid) -> usize {
        self.channels
            .lock()
            .await
            .get(&user_id)
            .map_or(0, |tx| tx.receiver_count())
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl RealtimeChannel for SessionHub {
    async fn push(&self, record: &NotificationRecord) -> Result<PushOutcome, StoreError> {
        let mut channels = self.channels.lock().await;
        let Some(tx) = channels.get(&record.user_id) else {
            return Ok(PushOutcome::NoSession);
        };
        if tx.send(record.clone()).is_ok() {
            return Ok(PushOutcome::Delivered);
        }
        // Every receiver is gone; forget the stale sender.
        channels.remove(&record.user_id);
        Ok(PushOutcome::NoSession)
    }
}
