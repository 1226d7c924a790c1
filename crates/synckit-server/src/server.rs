//! Connection serving and server lifecycle.
//!
//! A transport accepts sockets elsewhere (HTTP scaffolding is out of
//! scope); every accepted link is handed to [`SyncServer::accept`], which
//! runs the read/write loop: decode, dispatch to the coordinator, report
//! errors on the wire, close on protocol violations. Shutdown closes every
//! connection and waits for in-flight work up to the grace period.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use synckit_protocol::{decode_frame, encode_frame, FramedLink, Message};

use crate::connection::ConnectionId;
use crate::coordinator::SyncCoordinator;

/// One running server instance.
pub struct SyncServer {
    coordinator: Arc<SyncCoordinator>,
    shutdown: watch::Sender<bool>,
    connections: Mutex<JoinSet<()>>,
}

impl SyncServer {
    /// Start background services (pub/sub bridge, ack resends, awareness
    /// sweep) and return the server.
    pub fn start(coordinator: Arc<SyncCoordinator>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        coordinator.spawn_pubsub_bridge();

        let server = Arc::new(Self {
            coordinator,
            shutdown,
            connections: Mutex::new(JoinSet::new()),
        });
        server.spawn_ack_sweep();
        server.spawn_awareness_sweep();
        server
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Serve one accepted link until it closes or the server shuts down.
    pub async fn accept(self: &Arc<Self>, link: Box<dyn FramedLink>) -> ConnectionId {
        let conn_id: ConnectionId = uuid::Uuid::new_v4().to_string();
        let this = self.clone();
        let id = conn_id.clone();
        self.connections
            .lock()
            .await
            .spawn(async move { this.serve_connection(id, link).await });
        conn_id
    }

    async fn serve_connection(self: Arc<Self>, conn_id: ConnectionId, mut link: Box<dyn FramedLink>) {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        self.coordinator
            .register_connection(conn_id.clone(), outbound_tx);
        let mut authenticated = false;
        let mut shutdown = self.shutdown.subscribe();
        info!(conn_id = %conn_id, "connection opened");

        loop {
            tokio::select! {
                outgoing = outbound_rx.recv() => {
                    let Some(message) = outgoing else { break };
                    let frame = match encode_frame(&message, Utc::now().timestamp_millis() as u64) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(conn_id = %conn_id, error = %e, "outbound encode failed");
                            continue;
                        }
                    };
                    if link.send(frame).await.is_err() {
                        break;
                    }
                }
                incoming = link.recv() => {
                    let bytes = match incoming {
                        Ok(Some(bytes)) => bytes,
                        Ok(None) => break,
                        Err(e) => {
                            debug!(conn_id = %conn_id, error = %e, "receive failed");
                            break;
                        }
                    };
                    let frame = match decode_frame(&bytes) {
                        Ok(frame) => frame,
                        Err(e) => {
                            // Malformed frames are policy violations: report
                            // and close.
                            let report = encode_frame(
                                &Message::error(e.to_string(), e.code()),
                                Utc::now().timestamp_millis() as u64,
                            );
                            if let Ok(report) = report {
                                let _ = link.send(report).await;
                            }
                            break;
                        }
                    };
                    match self
                        .coordinator
                        .handle_message(&conn_id, frame.message, &mut authenticated)
                        .await
                    {
                        Ok(()) => {}
                        Err(e) => {
                            if let Some(handle) = self.coordinator.connections.get(&conn_id) {
                                handle.send(Message::error(e.to_string(), e.code()));
                            }
                            if e.closes_connection() {
                                break;
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.coordinator.handle_disconnect(&conn_id).await;
        info!(conn_id = %conn_id, "connection closed");
    }

    /// Resend overdue unacked deltas on a timer.
    fn spawn_ack_sweep(self: &Arc<Self>) {
        let coordinator = self.coordinator.clone();
        let mut shutdown = self.shutdown.subscribe();
        let period =
            Duration::from_millis((coordinator.config().ack_timeout_ms / 2).max(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        coordinator.acks.sweep(&coordinator.connections).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Evict idle awareness entries on a timer.
    fn spawn_awareness_sweep(self: &Arc<Self>) {
        let coordinator = self.coordinator.clone();
        let mut shutdown = self.shutdown.subscribe();
        let period = Duration::from_millis(coordinator.config().awareness_sweep_ms.max(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        coordinator.sweep_awareness().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Graceful shutdown: signal every connection, then wait for in-flight
    /// work up to the configured grace period.
    pub async fn shutdown(self: &Arc<Self>) {
        info!("server shutting down");
        let _ = self.shutdown.send(true);
        let grace = Duration::from_millis(self.coordinator.config().shutdown_grace_ms);
        let mut connections = self.connections.lock().await;
        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("grace period elapsed with connections still draining");
            connections.abort_all();
        }
    }
}
