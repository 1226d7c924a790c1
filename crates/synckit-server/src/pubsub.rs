//! Pub/sub bridge for horizontal scaling.
//!
//! Every authoritative delta publishes to its document's channel; other
//! instances apply it with the same LWW rules and fan out to their own
//! subscribers, but never re-publish. The trait hides the backing system
//! (the in-process implementation stands in for an external broker).

use async_trait::async_trait;
use tokio::sync::broadcast;

use synckit_core::SyncResult;

/// One published payload with its channel and origin instance.
#[derive(Debug, Clone)]
pub struct PubSubMessage {
    pub channel: String,
    /// The publishing server instance; consumers skip their own messages.
    pub origin: String,
    pub payload: Vec<u8>,
}

/// The pub/sub surface the coordinator uses.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, message: PubSubMessage) -> SyncResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<PubSubMessage>;
}

/// In-process pub/sub: a broadcast channel shared by every instance in the
/// test or single-binary deployment.
pub struct InProcessPubSub {
    sender: broadcast::Sender<PubSubMessage>,
}

impl InProcessPubSub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

impl Default for InProcessPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InProcessPubSub {
    async fn publish(&self, message: PubSubMessage) -> SyncResult<()> {
        let _ = self.sender.send(message);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PubSubMessage> {
        self.sender.subscribe()
    }
}

/// Channel name for one document's deltas.
pub fn document_channel(doc_id: &synckit_core::DocumentId) -> String {
    format!("doc:{doc_id}")
}
