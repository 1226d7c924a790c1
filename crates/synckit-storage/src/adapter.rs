//! The persistence adapter contract.

use async_trait::async_trait;
use tokio::sync::broadcast;

use synckit_core::SyncResult;

/// A change notification for one key. The cross-tab coordinator uses these
/// to fan leader-tab writes out to follower tabs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: String,
}

/// Abstract key→blob store with listing, deletion, and a per-adapter change
/// signal. Four concrete adapters exist outside the core (browser file
/// store, browser indexed store, in-memory, server SQL); the engine only
/// ever sees this trait.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Write a blob, replacing any existing value.
    async fn save(&self, key: &str, blob: &[u8]) -> SyncResult<()>;

    /// Read a blob, `None` when absent.
    async fn load(&self, key: &str) -> SyncResult<Option<Vec<u8>>>;

    /// Delete a key; deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> SyncResult<()>;

    /// All keys starting with `prefix`, in unspecified order.
    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>>;

    /// Subscribe to change events for every key this adapter writes.
    /// Receivers that lag may miss events; consumers reconcile by reading.
    fn watch(&self) -> broadcast::Receiver<ChangeEvent>;
}
