//! Connection handles.
//!
//! A connection is a framed link plus its identity: the connection id, the
//! client id the peer announced, and the permissions its token carried.
//! Outbound traffic goes through a per-connection mpsc sender so any
//! subsystem (coordinator, ack tracker, awareness) can write without owning
//! the socket.

use dashmap::DashMap;
use tokio::sync::mpsc;

use synckit_core::{ClientId, Permissions};
use synckit_protocol::Message;

/// Opaque connection identifier, unique per accepted link.
pub type ConnectionId = String;

/// One live connection's shared state.
///
/// The outbound queue is unbounded so the per-document pipeline never
/// stalls on one slow consumer; outstanding data is bounded by the ack
/// tracker's retry budget and by connection teardown.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Set after AUTH (or on first contact when auth is not required).
    pub client_id: ClientId,
    pub permissions: Permissions,
    pub outbound: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    /// Queue a message for delivery; a closed peer drops it silently (the
    /// read loop notices the close and cleans up).
    pub fn send(&self, message: Message) {
        let _ = self.outbound.send(message);
    }
}

/// All live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id.clone(), handle);
    }

    pub fn get(&self, id: &str) -> Option<ConnectionHandle> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<ConnectionHandle> {
        self.connections.remove(id).map(|(_, handle)| handle)
    }

    /// Update the identity fields after a successful AUTH.
    pub fn authenticate(&self, id: &str, client_id: ClientId, permissions: Permissions) {
        if let Some(mut entry) = self.connections.get_mut(id) {
            entry.client_id = client_id;
            entry.permissions = permissions;
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}
