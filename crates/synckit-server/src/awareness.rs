//! Server-side awareness store.
//!
//! Ephemeral presence keyed by (document, client): in-memory only, clock
//! gated, TTL evicted. Evictions and connection closes broadcast a
//! tombstone (`state = null`, `clock = previous + 1`) so peers drop the
//! entry promptly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use synckit_core::{ClientId, DocumentId};
use synckit_protocol::AwarenessStatePayload;

#[derive(Debug, Clone)]
struct Entry {
    state: Value,
    clock: u64,
    last_update: Instant,
}

/// The (document, client) → entry store.
pub struct AwarenessStore {
    entries: Mutex<HashMap<(DocumentId, ClientId), Entry>>,
    ttl: Duration,
}

impl AwarenessStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Apply an update. Stale clocks are ignored; returns whether the entry
    /// changed (and therefore should fan out).
    pub fn update(&self, doc_id: &DocumentId, client_id: &ClientId, state: Value, clock: u64) -> bool {
        let mut entries = self.entries.lock().expect("awareness lock");
        let key = (doc_id.clone(), client_id.clone());
        if let Some(existing) = entries.get(&key) {
            if clock <= existing.clock {
                return false;
            }
        }
        if state.is_null() {
            entries.remove(&key);
        } else {
            entries.insert(
                key,
                Entry {
                    state,
                    clock,
                    last_update: Instant::now(),
                },
            );
        }
        true
    }

    /// Current entries for one document.
    pub fn on_document(&self, doc_id: &DocumentId) -> Vec<AwarenessStatePayload> {
        self.entries
            .lock()
            .expect("awareness lock")
            .iter()
            .filter(|((doc, _), _)| doc == doc_id)
            .map(|((doc, client), entry)| AwarenessStatePayload {
                doc_id: doc.clone(),
                client_id: client.clone(),
                state: entry.state.clone(),
                clock: entry.clock,
            })
            .collect()
    }

    /// Remove one client everywhere (connection close); returns the
    /// tombstones to broadcast.
    pub fn drop_client(&self, client_id: &ClientId) -> Vec<AwarenessStatePayload> {
        let mut entries = self.entries.lock().expect("awareness lock");
        let keys: Vec<(DocumentId, ClientId)> = entries
            .keys()
            .filter(|(_, client)| client == client_id)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| {
                entries.remove(&key).map(|entry| AwarenessStatePayload {
                    doc_id: key.0,
                    client_id: key.1,
                    state: Value::Null,
                    clock: entry.clock + 1,
                })
            })
            .collect()
    }

    /// Evict everything idle past the TTL; returns the tombstones to
    /// broadcast.
    pub fn sweep(&self) -> Vec<AwarenessStatePayload> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("awareness lock");
        let expired: Vec<(DocumentId, ClientId)> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_update) > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|key| {
                entries.remove(&key).map(|entry| {
                    debug!(doc_id = %key.0, client_id = %key.1, "awareness entry expired");
                    AwarenessStatePayload {
                        doc_id: key.0,
                        client_id: key.1,
                        state: Value::Null,
                        clock: entry.clock + 1,
                    }
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("awareness lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
