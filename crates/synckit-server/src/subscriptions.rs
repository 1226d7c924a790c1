//! Subscription registry.
//!
//! Both directions — connection → documents and document → connections —
//! live under one lock so they can never diverge under concurrent
//! subscribe/unsubscribe/disconnect.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use synckit_core::DocumentId;

use crate::connection::ConnectionId;

#[derive(Default)]
struct Index {
    by_connection: HashMap<ConnectionId, HashSet<DocumentId>>,
    by_document: HashMap<DocumentId, HashSet<ConnectionId>>,
}

/// Coherent two-way subscription index.
#[derive(Default)]
pub struct SubscriptionRegistry {
    index: Mutex<Index>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this is a new subscription.
    pub fn subscribe(&self, connection: &ConnectionId, doc_id: &DocumentId) -> bool {
        let mut index = self.index.lock().expect("subscription lock");
        let inserted = index
            .by_connection
            .entry(connection.clone())
            .or_default()
            .insert(doc_id.clone());
        index
            .by_document
            .entry(doc_id.clone())
            .or_default()
            .insert(connection.clone());
        inserted
    }

    pub fn unsubscribe(&self, connection: &ConnectionId, doc_id: &DocumentId) {
        let mut index = self.index.lock().expect("subscription lock");
        if let Some(docs) = index.by_connection.get_mut(connection) {
            docs.remove(doc_id);
            if docs.is_empty() {
                index.by_connection.remove(connection);
            }
        }
        if let Some(connections) = index.by_document.get_mut(doc_id) {
            connections.remove(connection);
            if connections.is_empty() {
                index.by_document.remove(doc_id);
            }
        }
    }

    /// Drop every subscription of a closing connection; returns the
    /// documents it was subscribed to.
    pub fn drop_connection(&self, connection: &ConnectionId) -> Vec<DocumentId> {
        let mut index = self.index.lock().expect("subscription lock");
        let docs: Vec<DocumentId> = index
            .by_connection
            .remove(connection)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for doc_id in &docs {
            if let Some(connections) = index.by_document.get_mut(doc_id) {
                connections.remove(connection);
                if connections.is_empty() {
                    index.by_document.remove(doc_id);
                }
            }
        }
        docs
    }

    pub fn subscribers(&self, doc_id: &DocumentId) -> Vec<ConnectionId> {
        self.index
            .lock()
            .expect("subscription lock")
            .by_document
            .get(doc_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, connection: &ConnectionId, doc_id: &DocumentId) -> bool {
        self.index
            .lock()
            .expect("subscription lock")
            .by_connection
            .get(connection)
            .is_some_and(|docs| docs.contains(doc_id))
    }

    pub fn documents_of(&self, connection: &ConnectionId) -> Vec<DocumentId> {
        self.index
            .lock()
            .expect("subscription lock")
            .by_connection
            .get(connection)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}
