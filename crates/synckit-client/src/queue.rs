//! Durable offline operation queue.
//!
//! A FIFO of operation envelopes persisted through the storage adapter.
//! Order is preserved per document; every entry is delivered at least once
//! (duplicates are harmless because CRDT apply is idempotent by operation
//! identity). On overflow the oldest entry is dropped — but only after a
//! monotonically increasing dropped-marker is persisted, which forces a
//! fresh SYNC_REQUEST on the next connect.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use synckit_core::config::QueueConfig;
use synckit_core::errors::StorageError;
use synckit_core::{ReplicaId, SyncResult};
use synckit_crdt::OperationEnvelope;
use synckit_storage::StorageAdapter;

/// One queued envelope with its queue sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub seq: u64,
    pub envelope: OperationEnvelope,
}

/// What happened on enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The queue was full: the oldest entry was dropped after the dropped
    /// marker was persisted.
    QueuedWithOverflow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    next_seq: u64,
    /// Bumped on every overflow drop; never decreases.
    dropped_marker: u64,
    /// The marker value as of the last completed full sync.
    synced_marker: u64,
}

/// The durable queue. All mutations persist before returning.
pub struct OfflineQueue {
    adapter: Arc<dyn StorageAdapter>,
    key: String,
    state: QueueState,
    config: QueueConfig,
}

impl OfflineQueue {
    /// Open (or create) the queue for one replica.
    pub async fn open(
        adapter: Arc<dyn StorageAdapter>,
        replica: &ReplicaId,
        config: QueueConfig,
    ) -> SyncResult<Self> {
        let key = format!("queue:{replica}");
        let state = match adapter.load(&key).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            })?,
            None => QueueState::default(),
        };
        Ok(Self {
            adapter,
            key,
            state,
            config,
        })
    }

    /// Append an envelope, dropping the oldest entry on overflow.
    #[instrument(skip(self, envelope), fields(doc_id = %envelope.document_id))]
    pub async fn enqueue(&mut self, envelope: OperationEnvelope) -> SyncResult<EnqueueOutcome> {
        let mut outcome = EnqueueOutcome::Queued;
        if self.state.entries.len() >= self.config.max_size {
            // Persist the marker first: if we crash between the two steps,
            // the next connect still knows a full sync is owed.
            self.state.dropped_marker += 1;
            self.persist().await?;
            let dropped = self.state.entries.pop_front();
            if let Some(entry) = dropped {
                warn!(
                    seq = entry.seq,
                    doc_id = %entry.envelope.document_id,
                    "queue full, dropped oldest operation"
                );
            }
            outcome = EnqueueOutcome::QueuedWithOverflow;
        }

        let seq = self.state.next_seq;
        self.state.next_seq += 1;
        self.state.entries.push_back(QueueEntry { seq, envelope });
        self.persist().await?;
        debug!(seq, len = self.state.entries.len(), "operation queued");
        Ok(outcome)
    }

    /// The oldest `limit` entries, delivery order.
    pub fn peek(&self, limit: usize) -> Vec<QueueEntry> {
        self.state.entries.iter().take(limit).cloned().collect()
    }

    /// Remove one delivered entry by sequence number (server ACK received).
    pub async fn ack(&mut self, seq: u64) -> SyncResult<bool> {
        let before = self.state.entries.len();
        self.state.entries.retain(|entry| entry.seq != seq);
        let removed = self.state.entries.len() != before;
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Whether an overflow happened since the last completed full sync, so
    /// the runtime must issue a fresh SYNC_REQUEST instead of trusting its
    /// local clock.
    pub fn needs_full_sync(&self) -> bool {
        self.state.dropped_marker > self.state.synced_marker
    }

    /// Record that a full sync completed at the current marker.
    pub async fn mark_synced(&mut self) -> SyncResult<()> {
        self.state.synced_marker = self.state.dropped_marker;
        self.persist().await
    }

    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    async fn persist(&self) -> SyncResult<()> {
        let bytes = serde_json::to_vec(&self.state)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.adapter.save(&self.key, &bytes).await
    }
}

/// Exponential backoff bounded by a maximum delay. Drives delivery retries
/// between failed drain attempts.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    attempt: u32,
    initial: Duration,
    max: Duration,
}

impl RetryBackoff {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            attempt: 0,
            initial: Duration::from_millis(config.retry_initial_delay_ms),
            max: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// The delay before the next attempt; doubles per call, capped.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        self.initial
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max)
    }

    /// A successful delivery resets the schedule.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
