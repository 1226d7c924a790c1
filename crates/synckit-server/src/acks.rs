//! Outbound delivery tracking.
//!
//! Every DELTA the server sends is retained as a pending ack. A missing ACK
//! within the timeout triggers a resend; after the retry budget the message
//! is given up on (the client recovers via SYNC_REQUEST on its next
//! connect). Closing a connection clears its pending acks.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use synckit_core::DocumentId;
use synckit_protocol::Message;

use crate::connection::{ConnectionId, ConnectionRegistry};

/// One unacknowledged outbound message.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub connection_id: ConnectionId,
    pub doc_id: DocumentId,
    pub message_id: String,
    pub message: Message,
    pub sent_at: Instant,
    pub retries: u32,
}

/// Tracks pending acks and drives resends.
pub struct AckTracker {
    pending: DashMap<String, PendingAck>,
    ack_timeout: Duration,
    max_retries: u32,
}

impl AckTracker {
    pub fn new(ack_timeout: Duration, max_retries: u32) -> Self {
        Self {
            pending: DashMap::new(),
            ack_timeout,
            max_retries,
        }
    }

    /// Register an outbound message awaiting acknowledgement.
    pub fn track(&self, connection_id: ConnectionId, doc_id: DocumentId, message_id: String, message: Message) {
        self.pending.insert(
            message_id.clone(),
            PendingAck {
                connection_id,
                doc_id,
                message_id,
                message,
                sent_at: Instant::now(),
                retries: 0,
            },
        );
    }

    /// An ACK arrived; returns whether it matched a pending entry.
    pub fn acknowledge(&self, message_id: &str) -> bool {
        self.pending.remove(message_id).is_some()
    }

    /// Remove every pending ack for a closing connection.
    pub fn drop_connection(&self, connection_id: &ConnectionId) {
        self.pending
            .retain(|_, pending| pending.connection_id != *connection_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// One sweep: resend everything overdue, abandon entries whose retry
    /// budget is spent. Called periodically by the server task.
    pub async fn sweep(&self, connections: &Arc<ConnectionRegistry>) {
        let now = Instant::now();
        let mut overdue: Vec<String> = Vec::new();
        for entry in self.pending.iter() {
            if now.duration_since(entry.sent_at) >= self.ack_timeout {
                overdue.push(entry.key().clone());
            }
        }

        for message_id in overdue {
            let Some(mut entry) = self.pending.get_mut(&message_id) else {
                continue;
            };
            if entry.retries >= self.max_retries {
                warn!(
                    message_id = %entry.message_id,
                    connection_id = %entry.connection_id,
                    "retry budget spent, abandoning delivery"
                );
                drop(entry);
                self.pending.remove(&message_id);
                continue;
            }
            entry.retries += 1;
            entry.sent_at = now;
            let connection_id = entry.connection_id.clone();
            let message = entry.message.clone();
            drop(entry);

            match connections.get(&connection_id) {
                Some(handle) => {
                    debug!(message_id = %message_id, connection_id = %connection_id, "resending unacked delta");
                    handle.send(message);
                }
                None => {
                    self.pending.remove(&message_id);
                }
            }
        }
    }
}
