//! Client-side awareness: publishing our ephemeral state, tracking peers.
//!
//! Awareness is not document state: it is TTL-bounded presence (cursor,
//! selection, display name) with a per-client clock. The server evicts idle
//! entries and fans updates out as AWARENESS_STATE messages.

use std::collections::HashMap;

use serde_json::Value;

use synckit_core::{ClientId, DocumentId};
use synckit_protocol::{AwarenessStatePayload, AwarenessUpdatePayload};

/// Publishes this client's awareness state for one document. Each update
/// increments the per-client clock; a `null` state with an incremented clock
/// announces departure.
#[derive(Debug, Clone)]
pub struct AwarenessPublisher {
    doc_id: DocumentId,
    clock: u64,
}

impl AwarenessPublisher {
    pub fn new(doc_id: DocumentId) -> Self {
        Self { doc_id, clock: 0 }
    }

    /// Publish a new state.
    pub fn update(&mut self, state: Value) -> AwarenessUpdatePayload {
        self.clock += 1;
        AwarenessUpdatePayload {
            doc_id: self.doc_id.clone(),
            state,
            clock: self.clock,
        }
    }

    /// Publish departure.
    pub fn leave(&mut self) -> AwarenessUpdatePayload {
        self.update(Value::Null)
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }
}

/// The peers visible on documents we subscribed awareness for.
#[derive(Debug, Clone, Default)]
pub struct AwarenessPeers {
    peers: HashMap<(DocumentId, ClientId), (Value, u64)>,
}

impl AwarenessPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a fan-out message. Stale clocks are ignored; a `null` state
    /// removes the peer. Returns whether anything changed.
    pub fn apply(&mut self, payload: &AwarenessStatePayload) -> bool {
        let key = (payload.doc_id.clone(), payload.client_id.clone());
        if let Some((_, clock)) = self.peers.get(&key) {
            if payload.clock <= *clock {
                return false;
            }
        }
        if payload.state.is_null() {
            self.peers.remove(&key).is_some()
        } else {
            self.peers
                .insert(key, (payload.state.clone(), payload.clock));
            true
        }
    }

    /// All live peers on one document.
    pub fn on_document(&self, doc_id: &DocumentId) -> Vec<(&ClientId, &Value)> {
        self.peers
            .iter()
            .filter(|((doc, _), _)| doc == doc_id)
            .map(|((_, client), (state, _))| (client, state))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
