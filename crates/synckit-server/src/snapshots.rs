//! Snapshot scheduling.
//!
//! Size, age, and operation-count triggers are OR-composed; a boolean latch
//! coalesces concurrent triggers into one in-flight snapshot per document.
//! Creation serializes the state under the document lock, then writes and
//! prunes off the foreground path. Failures log and continue — snapshots
//! are an optimization, not a correctness requirement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use synckit_core::config::SnapshotConfig;
use synckit_core::DocumentId;
use synckit_storage::keys;
use synckit_storage::{SnapshotBlob, StorageAdapter};

#[derive(Debug)]
struct DocCounters {
    ops_since_snapshot: u64,
    last_snapshot: Instant,
    in_flight: AtomicBool,
}

/// Decides when to snapshot and runs creation plus retention.
pub struct SnapshotScheduler {
    config: SnapshotConfig,
    adapter: Arc<dyn StorageAdapter>,
    counters: DashMap<DocumentId, DocCounters>,
}

impl SnapshotScheduler {
    pub fn new(config: SnapshotConfig, adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            config,
            adapter,
            counters: DashMap::new(),
        }
    }

    /// Record applied operations and report whether a snapshot is due.
    pub fn note_ops(&self, doc_id: &DocumentId, ops: u64, state_size: usize) -> bool {
        let mut entry = self
            .counters
            .entry(doc_id.clone())
            .or_insert_with(|| DocCounters {
                ops_since_snapshot: 0,
                last_snapshot: Instant::now(),
                in_flight: AtomicBool::new(false),
            });
        entry.ops_since_snapshot += ops;

        let by_size = state_size >= self.config.max_bytes;
        let by_age = entry.last_snapshot.elapsed().as_millis() as u64 >= self.config.max_age_ms;
        let by_ops = entry.ops_since_snapshot >= self.config.max_ops;
        by_size || by_age || by_ops
    }

    /// Try to claim the in-flight latch; false means a snapshot is already
    /// being written for this document.
    pub fn begin(&self, doc_id: &DocumentId) -> bool {
        match self.counters.get(doc_id) {
            Some(entry) => entry
                .in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
            None => false,
        }
    }

    /// Write one captured blob and prune retention. Releases the latch.
    pub async fn write(&self, doc_id: &DocumentId, blob: SnapshotBlob) {
        let result = self.write_inner(doc_id, blob).await;
        if let Some(entry) = self.counters.get(doc_id) {
            entry.in_flight.store(false, Ordering::SeqCst);
        }
        if let Err(e) = result {
            // Never propagate: a failed snapshot must not affect syncing.
            warn!(doc_id = %doc_id, error = %e, "snapshot write failed");
        } else if let Some(mut entry) = self.counters.get_mut(doc_id) {
            entry.ops_since_snapshot = 0;
            entry.last_snapshot = Instant::now();
        }
    }

    async fn write_inner(
        &self,
        doc_id: &DocumentId,
        blob: SnapshotBlob,
    ) -> synckit_core::SyncResult<()> {
        let bytes = blob.encode(self.config.compress)?;
        let key = keys::retained_snapshot_key(&self.config.snapshot_prefix, doc_id, blob.timestamp);
        self.adapter.save(&key, &bytes).await?;
        debug!(doc_id = %doc_id, key = %key, size = bytes.len(), "snapshot written");

        // Retention: newest `max_snapshots` survive.
        let prefix = keys::retained_snapshot_prefix(&self.config.snapshot_prefix, doc_id);
        let mut timestamped: Vec<(i64, String)> = self
            .adapter
            .list(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| keys::snapshot_key_timestamp(&key).map(|ts| (ts, key)))
            .collect();
        timestamped.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, stale_key) in timestamped.into_iter().skip(self.config.max_snapshots) {
            if let Err(e) = self.adapter.delete(&stale_key).await {
                warn!(key = %stale_key, error = %e, "snapshot prune failed");
            }
        }
        Ok(())
    }
}
