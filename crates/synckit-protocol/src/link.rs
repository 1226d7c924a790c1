//! The framed transport surface.
//!
//! Both ends of the protocol speak through this trait: a WebSocket binding,
//! a TCP framer, or an in-process channel pair for tests. One call, one
//! frame.

use async_trait::async_trait;

use synckit_core::SyncResult;

/// One open, framed, bidirectional link.
#[async_trait]
pub trait FramedLink: Send {
    /// Send one encoded frame.
    async fn send(&mut self, frame: Vec<u8>) -> SyncResult<()>;

    /// Receive the next frame; `None` when the peer closed.
    async fn recv(&mut self) -> SyncResult<Option<Vec<u8>>>;
}
