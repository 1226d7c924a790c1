//! In-memory adapter.
//!
//! Backs tests and single-process servers. Change events fan out over a
//! broadcast channel so several runtime components (tabs, undo stacks) can
//! watch one adapter.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::adapter::{ChangeEvent, StorageAdapter};
use synckit_core::SyncResult;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A concurrent map of key → blob with change notifications.
pub struct MemoryAdapter {
    blobs: DashMap<String, Vec<u8>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            blobs: DashMap::new(),
            changes,
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    fn notify(&self, key: &str) {
        // No receivers is fine; the signal is best-effort.
        let _ = self.changes.send(ChangeEvent {
            key: key.to_string(),
        });
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn save(&self, key: &str, blob: &[u8]) -> SyncResult<()> {
        self.blobs.insert(key.to_string(), blob.to_vec());
        self.notify(key);
        Ok(())
    }

    async fn load(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        if self.blobs.remove(key).is_some() {
            self.notify(key);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>> {
        Ok(self
            .blobs
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
