//! Shared plumbing for server tests: in-process framed links and a
//! client-transport bridge into a running server.

// Compiled once per test binary; not every binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use synckit_client::ClientTransport;
use synckit_core::{Permissions, SyncError, SyncResult, TokenPayload};
use synckit_protocol::{decode_frame, encode_frame, FramedLink, Message};
use synckit_server::{
    InProcessPubSub, NoLimit, StaticTokenVerifier, SyncCoordinator, SyncServer,
};
use synckit_storage::MemoryAdapter;

pub struct DuplexLink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl FramedLink for DuplexLink {
    async fn send(&mut self, frame: Vec<u8>) -> SyncResult<()> {
        self.tx.send(frame).map_err(|_| SyncError::ConnectionClosed)
    }

    async fn recv(&mut self) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }
}

pub fn duplex_pair() -> (DuplexLink, DuplexLink) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        DuplexLink { tx: a_tx, rx: a_rx },
        DuplexLink { tx: b_tx, rx: b_rx },
    )
}

/// A test peer speaking raw frames to the server.
pub struct TestPeer {
    link: DuplexLink,
}

impl TestPeer {
    pub async fn connect(server: &Arc<SyncServer>) -> Self {
        let (client_side, server_side) = duplex_pair();
        server.accept(Box::new(server_side)).await;
        Self { link: client_side }
    }

    pub async fn send(&mut self, message: &Message) {
        let frame = encode_frame(message, 0).unwrap();
        self.link.send(frame).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: Vec<u8>) {
        self.link.send(bytes).await.unwrap();
    }

    pub async fn recv(&mut self) -> Option<Message> {
        let bytes = self.link.recv().await.unwrap()?;
        Some(decode_frame(&bytes).unwrap().message)
    }

    /// Receive until a message matches, dropping everything else.
    pub async fn recv_until<F: Fn(&Message) -> bool>(&mut self, want: F) -> Option<Message> {
        for _ in 0..64 {
            let message = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                self.recv(),
            )
            .await
            .ok()??;
            if want(&message) {
                return Some(message);
            }
        }
        None
    }

    /// AUTH with the given token and wait for the verdict.
    pub async fn authenticate(&mut self, token: &str, client_id: &str) -> Message {
        self.send(&Message::Auth {
            token: token.to_string(),
            client_id: Some(client_id.into()),
        })
        .await;
        self.recv_until(|m| {
            matches!(m, Message::AuthSuccess { .. } | Message::AuthError { .. })
        })
        .await
        .expect("no auth verdict")
    }
}

/// Standard verifier: "writer-token" may read/write everything, "reader-token"
/// only reads, "admin-token" is admin.
pub fn test_verifier() -> StaticTokenVerifier {
    StaticTokenVerifier::new()
        .with_token(
            "writer-token",
            TokenPayload {
                user_id: "writer".to_string(),
                permissions: Permissions {
                    can_read: vec!["*".to_string()],
                    can_write: vec!["*".to_string()],
                    is_admin: false,
                },
            },
        )
        .with_token(
            "reader-token",
            TokenPayload {
                user_id: "reader".to_string(),
                permissions: Permissions {
                    can_read: vec!["*".to_string()],
                    can_write: vec![],
                    is_admin: false,
                },
            },
        )
        .with_token(
            "admin-token",
            TokenPayload {
                user_id: "admin".to_string(),
                permissions: Permissions::admin(),
            },
        )
}

/// A server on an in-memory adapter and in-process pub/sub.
pub fn start_server(config: synckit_core::config::ServerConfig) -> Arc<SyncServer> {
    let coordinator = SyncCoordinator::new(
        config,
        Arc::new(MemoryAdapter::new()),
        Arc::new(InProcessPubSub::new()),
        Arc::new(test_verifier()),
        Arc::new(NoLimit),
    );
    SyncServer::start(coordinator)
}

/// Client transport that opens links into a running server.
pub struct ServerTransport {
    server: Arc<SyncServer>,
}

impl ServerTransport {
    pub fn new(server: Arc<SyncServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl ClientTransport for ServerTransport {
    async fn connect(&self) -> SyncResult<Box<dyn FramedLink>> {
        let (client_side, server_side) = duplex_pair();
        self.server.accept(Box::new(server_side)).await;
        Ok(Box::new(client_side))
    }
}
