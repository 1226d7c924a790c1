//! The per-document sync coordinator.
//!
//! Every DELTA runs the same pipeline: auth guard, auto-subscribe, persist
//! and apply under the document's lock, build the authoritative delta from
//! RESOLVED state, broadcast to every subscriber including the sender, ACK
//! the sender, publish to pub/sub. Locks are strictly per-document; one
//! document's storage stall never blocks another's operations.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use synckit_core::config::ServerConfig;
use synckit_core::errors::AuthError;
use synckit_core::{
    ClientId, DocumentId, FieldPath, Permissions, ReplicaId, SyncError, SyncResult,
};
use synckit_crdt::doc::DocState;
use synckit_crdt::{is_tombstone, Operation, OperationEnvelope, ReplicatedDoc};
use synckit_protocol::{
    AwarenessStatePayload, DeltaBody, DeltaMessage, FieldMeta, Message,
};
use synckit_storage::{keys, SnapshotBlob, StorageAdapter};

use crate::acks::AckTracker;
use crate::auth::TokenVerifier;
use crate::awareness::AwarenessStore;
use crate::batch::DeltaCoalescer;
use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::pubsub::{document_channel, PubSub, PubSubMessage};
use crate::ratelimit::RateLimiter;
use crate::snapshots::SnapshotScheduler;
use crate::subscriptions::SubscriptionRegistry;

/// Shared coordinator state. Cheap to clone behind an `Arc`.
pub struct SyncCoordinator {
    instance_id: String,
    replica: ReplicaId,
    config: ServerConfig,
    adapter: Arc<dyn StorageAdapter>,
    pubsub: Arc<dyn PubSub>,
    verifier: Arc<dyn TokenVerifier>,
    limiter: Arc<dyn RateLimiter>,
    pub connections: Arc<ConnectionRegistry>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    awareness_subs: Arc<SubscriptionRegistry>,
    pub acks: Arc<AckTracker>,
    pub awareness: Arc<AwarenessStore>,
    snapshots: Arc<SnapshotScheduler>,
    docs: DashMap<DocumentId, Arc<Mutex<ReplicatedDoc>>>,
    batchers: DashMap<DocumentId, Arc<Mutex<DeltaCoalescer>>>,
}

impl SyncCoordinator {
    pub fn new(
        config: ServerConfig,
        adapter: Arc<dyn StorageAdapter>,
        pubsub: Arc<dyn PubSub>,
        verifier: Arc<dyn TokenVerifier>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Arc<Self> {
        let instance_id = uuid::Uuid::new_v4().to_string();
        let replica = ReplicaId::from(format!("server-{instance_id}").as_str());
        let snapshots = Arc::new(SnapshotScheduler::new(
            config.snapshots.clone(),
            adapter.clone(),
        ));
        let acks = Arc::new(AckTracker::new(
            Duration::from_millis(config.ack_timeout_ms),
            config.max_ack_retries,
        ));
        let awareness = Arc::new(AwarenessStore::new(Duration::from_millis(
            config.awareness_ttl_ms,
        )));
        Arc::new(Self {
            instance_id,
            replica,
            config,
            adapter,
            pubsub,
            verifier,
            limiter,
            connections: Arc::new(ConnectionRegistry::new()),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            awareness_subs: Arc::new(SubscriptionRegistry::new()),
            acks,
            awareness,
            snapshots,
            docs: DashMap::new(),
            batchers: DashMap::new(),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Dispatch one decoded message from a connection. A returned error is
    /// reported to the peer by the caller (and closes the connection only
    /// for protocol errors).
    pub async fn handle_message(
        self: &Arc<Self>,
        conn_id: &ConnectionId,
        message: Message,
        authenticated: &mut bool,
    ) -> SyncResult<()> {
        // Gate everything but the handshake behind auth when required.
        if self.config.auth_required
            && !*authenticated
            && !matches!(message, Message::Auth { .. } | Message::Ping | Message::Pong)
        {
            if let Some(conn) = self.connections.get(conn_id) {
                conn.send(Message::AuthError {
                    error: "authentication required".to_string(),
                    code: "AUTH_REQUIRED".to_string(),
                });
            }
            return Ok(());
        }

        match message {
            Message::Ping => {
                if let Some(conn) = self.connections.get(conn_id) {
                    conn.send(Message::Pong);
                }
                Ok(())
            }
            Message::Pong => Ok(()),
            Message::Auth { token, client_id } => {
                self.handle_auth(conn_id, token, client_id, authenticated)
                    .await
            }
            Message::Subscribe { doc_id } => self.handle_subscribe(conn_id, doc_id).await,
            Message::Unsubscribe { doc_id } => {
                self.subscriptions.unsubscribe(conn_id, &doc_id);
                Ok(())
            }
            Message::SyncRequest { doc_id, .. } => self.handle_sync_request(conn_id, doc_id).await,
            Message::Delta(delta) => self.handle_delta(conn_id, delta).await,
            Message::DeltaBatch { deltas, .. } => {
                for delta in deltas {
                    self.handle_delta(conn_id, delta).await?;
                }
                Ok(())
            }
            Message::Ack { message_id } => {
                self.acks.acknowledge(&message_id);
                Ok(())
            }
            Message::AwarenessSubscribe { doc_id } => {
                self.handle_awareness_subscribe(conn_id, doc_id).await
            }
            Message::AwarenessUpdate(update) => {
                self.handle_awareness_update(conn_id, update).await
            }
            other => {
                debug!(message_type = other.message_type().as_str(), "ignoring client message");
                Ok(())
            }
        }
    }

    async fn handle_auth(
        self: &Arc<Self>,
        conn_id: &ConnectionId,
        token: String,
        client_id: Option<ClientId>,
        authenticated: &mut bool,
    ) -> SyncResult<()> {
        let Some(conn) = self.connections.get(conn_id) else {
            return Err(SyncError::ConnectionClosed);
        };
        match self.verifier.verify(&token).await {
            Ok(payload) => {
                let client_id = client_id.unwrap_or_else(|| ClientId::from(conn_id.as_str()));
                self.connections
                    .authenticate(conn_id, client_id, payload.permissions.clone());
                *authenticated = true;
                info!(conn_id = %conn_id, user_id = %payload.user_id, "connection authenticated");
                conn.send(Message::AuthSuccess {
                    user_id: payload.user_id,
                    permissions: payload.permissions,
                });
            }
            Err(e) => {
                conn.send(Message::AuthError {
                    error: e.to_string(),
                    code: e.code().to_string(),
                });
            }
        }
        Ok(())
    }

    async fn handle_subscribe(
        self: &Arc<Self>,
        conn_id: &ConnectionId,
        doc_id: DocumentId,
    ) -> SyncResult<()> {
        let Some(conn) = self.connections.get(conn_id) else {
            return Err(SyncError::ConnectionClosed);
        };
        if !conn.permissions.allows_read(&doc_id) {
            return Err(AuthError::PermissionDenied {
                doc_id: doc_id.to_string(),
                access: "read",
            }
            .into());
        }
        self.subscriptions.subscribe(conn_id, &doc_id);
        self.send_sync_response(&conn, doc_id).await
    }

    async fn handle_sync_request(
        self: &Arc<Self>,
        conn_id: &ConnectionId,
        doc_id: DocumentId,
    ) -> SyncResult<()> {
        let Some(conn) = self.connections.get(conn_id) else {
            return Err(SyncError::ConnectionClosed);
        };
        if !conn.permissions.allows_read(&doc_id) {
            return Err(AuthError::PermissionDenied {
                doc_id: doc_id.to_string(),
                access: "read",
            }
            .into());
        }
        self.send_sync_response(&conn, doc_id).await
    }

    async fn send_sync_response(
        self: &Arc<Self>,
        conn: &crate::connection::ConnectionHandle,
        doc_id: DocumentId,
    ) -> SyncResult<()> {
        let doc_arc = self.doc_entry(&doc_id).await?;
        let (state, vector_clock) = {
            let doc = doc_arc.lock().await;
            (
                serde_json::to_value(&*doc).map_err(|e| {
                    synckit_core::errors::StorageError::Serialization(e.to_string())
                })?,
                doc.clock.clone(),
            )
        };
        conn.send(Message::SyncResponse {
            doc_id,
            state,
            vector_clock,
        });
        Ok(())
    }

    /// The DELTA pipeline, steps 1–7.
    #[instrument(skip(self, delta), fields(doc_id = %delta.doc_id, delta_id = %delta.id))]
    pub async fn handle_delta(
        self: &Arc<Self>,
        conn_id: &ConnectionId,
        delta: DeltaMessage,
    ) -> SyncResult<()> {
        let Some(conn) = self.connections.get(conn_id) else {
            return Err(SyncError::ConnectionClosed);
        };

        // 1. Auth guard. No state mutation on failure.
        if !conn.permissions.allows_write(&delta.doc_id) {
            return Err(AuthError::PermissionDenied {
                doc_id: delta.doc_id.to_string(),
                access: "write",
            }
            .into());
        }
        if !self.limiter.admit(conn_id) {
            return Err(SyncError::RateLimitExceeded {
                connection_id: conn_id.clone(),
            });
        }

        // 2. Auto-subscribe the sender (implicit SUBSCRIBE).
        self.subscriptions.subscribe(conn_id, &delta.doc_id);

        let envelopes = envelopes_from(&delta)?;
        let doc_arc = self.doc_entry(&delta.doc_id).await?;

        // 3–4. Persist + apply + build the authoritative delta, serialized
        // per document.
        let authoritative = {
            let mut doc = doc_arc.lock().await;

            // Reject before mutating: every operation must fit the doc kind.
            for envelope in &envelopes {
                if !op_matches_kind(&envelope.op, &doc.state) {
                    return Err(SyncError::MalformedOperation(format!(
                        "operation does not fit document {}",
                        delta.doc_id
                    )));
                }
            }

            // Write-ahead: the submitted delta is durable before apply.
            let delta_bytes = serde_json::to_vec(&delta).map_err(|e| {
                synckit_core::errors::StorageError::Serialization(e.to_string())
            })?;
            self.save_with_retry(&format!("{}:delta", delta.doc_id), &delta_bytes)
                .await?;

            let mut resolved_fields: BTreeMap<String, Value> = BTreeMap::new();
            let mut meta: BTreeMap<String, FieldMeta> = BTreeMap::new();
            let mut applied_ops: Vec<OperationEnvelope> = Vec::new();

            for envelope in &envelopes {
                let outcome = doc.apply(envelope)?;
                if outcome.resolved_fields.is_empty() {
                    applied_ops.push(envelope.clone());
                }
                for (field, register) in outcome.resolved_fields {
                    // The broadcast carries RESOLVED values: a submitted
                    // write that lost shows up as the winner here.
                    resolved_fields.insert(field.as_str().to_string(), register.value.clone());
                    meta.insert(
                        field.as_str().to_string(),
                        FieldMeta {
                            clock: register.clock,
                            writer: register.writer.clone(),
                        },
                    );
                }
            }

            // Persist the resolved state under the document key.
            let state_bytes = serde_json::to_vec(&*doc).map_err(|e| {
                synckit_core::errors::StorageError::Serialization(e.to_string())
            })?;
            self.save_with_retry(&keys::document_key(&delta.doc_id), &state_bytes)
                .await?;

            // Snapshot triggers, off the foreground path.
            if self
                .snapshots
                .note_ops(&delta.doc_id, envelopes.len() as u64, doc.state_size())
                && self.snapshots.begin(&delta.doc_id)
            {
                let blob = SnapshotBlob::capture(&doc)?;
                let scheduler = self.snapshots.clone();
                let doc_id = delta.doc_id.clone();
                tokio::spawn(async move {
                    scheduler.write(&doc_id, blob).await;
                });
            }

            let body = if applied_ops.is_empty() {
                DeltaBody::Fields(resolved_fields)
            } else {
                DeltaBody::Ops(applied_ops)
            };
            DeltaMessage {
                id: Message::new_message_id(),
                doc_id: delta.doc_id.clone(),
                delta: body,
                vector_clock: doc.clock.clone(),
                writer: delta.writer.clone(),
                logical_clock: delta.logical_clock,
                meta: if meta.is_empty() { None } else { Some(meta) },
            }
        };

        // 5. Broadcast to every subscriber including the sender.
        self.enqueue_broadcast(&delta.doc_id, authoritative.clone())
            .await;

        // 6. ACK the sender with the original message id.
        conn.send(Message::Ack {
            message_id: delta.id.clone(),
        });

        // 7. Publish so other instances serve their subscribers identically.
        let payload = serde_json::to_vec(&authoritative).map_err(|e| {
            synckit_core::errors::StorageError::Serialization(e.to_string())
        })?;
        self.pubsub
            .publish(PubSubMessage {
                channel: document_channel(&delta.doc_id),
                origin: self.instance_id.clone(),
                payload,
            })
            .await?;
        Ok(())
    }

    async fn handle_awareness_subscribe(
        self: &Arc<Self>,
        conn_id: &ConnectionId,
        doc_id: DocumentId,
    ) -> SyncResult<()> {
        let Some(conn) = self.connections.get(conn_id) else {
            return Err(SyncError::ConnectionClosed);
        };
        if !conn.permissions.allows_read(&doc_id) {
            return Err(AuthError::PermissionDenied {
                doc_id: doc_id.to_string(),
                access: "read",
            }
            .into());
        }
        self.awareness_subs.subscribe(conn_id, &doc_id);
        // Seed the newcomer with the current room.
        for payload in self.awareness.on_document(&doc_id) {
            if payload.client_id != conn.client_id {
                conn.send(Message::AwarenessState(payload));
            }
        }
        Ok(())
    }

    async fn handle_awareness_update(
        self: &Arc<Self>,
        conn_id: &ConnectionId,
        update: synckit_protocol::AwarenessUpdatePayload,
    ) -> SyncResult<()> {
        let Some(conn) = self.connections.get(conn_id) else {
            return Err(SyncError::ConnectionClosed);
        };
        // Publishing implies subscribing to the room.
        self.awareness_subs.subscribe(conn_id, &update.doc_id);
        let changed = self.awareness.update(
            &update.doc_id,
            &conn.client_id,
            update.state.clone(),
            update.clock,
        );
        if changed {
            let payload = AwarenessStatePayload {
                doc_id: update.doc_id.clone(),
                client_id: conn.client_id.clone(),
                state: update.state,
                clock: update.clock,
            };
            self.broadcast_awareness(&update.doc_id, payload, Some(conn_id))
                .await;
        }
        Ok(())
    }

    /// Fan one awareness payload out to the document's awareness
    /// subscribers, optionally excluding the originator.
    pub async fn broadcast_awareness(
        self: &Arc<Self>,
        doc_id: &DocumentId,
        payload: AwarenessStatePayload,
        exclude: Option<&ConnectionId>,
    ) {
        for subscriber in self.awareness_subs.subscribers(doc_id) {
            if exclude == Some(&subscriber) {
                continue;
            }
            if let Some(handle) = self.connections.get(&subscriber) {
                handle.send(Message::AwarenessState(payload.clone()));
            }
        }
    }

    /// Connection teardown: subscriptions, pending acks, rate counters, and
    /// awareness tombstones.
    pub async fn handle_disconnect(self: &Arc<Self>, conn_id: &ConnectionId) {
        let handle = self.connections.remove(conn_id);
        self.subscriptions.drop_connection(conn_id);
        self.awareness_subs.drop_connection(conn_id);
        self.acks.drop_connection(conn_id);
        self.limiter.forget(conn_id);

        if let Some(handle) = handle {
            for tombstone in self.awareness.drop_client(&handle.client_id) {
                let doc_id = tombstone.doc_id.clone();
                self.broadcast_awareness(&doc_id, tombstone, Some(conn_id))
                    .await;
            }
        }
        debug!(conn_id = %conn_id, "connection cleaned up");
    }

    /// TTL sweep: evict idle awareness entries and tombstone them to peers.
    pub async fn sweep_awareness(self: &Arc<Self>) {
        for tombstone in self.awareness.sweep() {
            let doc_id = tombstone.doc_id.clone();
            self.broadcast_awareness(&doc_id, tombstone, None).await;
        }
    }

    /// Apply a foreign instance's authoritative delta: same LWW rules, local
    /// fan-out only, never re-published.
    pub async fn apply_foreign_delta(self: &Arc<Self>, delta: DeltaMessage) -> SyncResult<()> {
        let envelopes = envelopes_from(&delta)?;
        let doc_arc = self.doc_entry(&delta.doc_id).await?;
        {
            let mut doc = doc_arc.lock().await;
            for envelope in &envelopes {
                doc.apply(envelope)?;
            }
            let state_bytes = serde_json::to_vec(&*doc).map_err(|e| {
                synckit_core::errors::StorageError::Serialization(e.to_string())
            })?;
            self.save_with_retry(&keys::document_key(&delta.doc_id), &state_bytes)
                .await?;
        }
        let doc_id = delta.doc_id.clone();
        self.enqueue_broadcast(&doc_id, delta).await;
        Ok(())
    }

    /// Bridge pub/sub traffic into this instance until the channel closes.
    pub fn spawn_pubsub_bridge(self: &Arc<Self>) {
        let mut rx = self.pubsub.subscribe();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if message.origin == this.instance_id {
                            continue;
                        }
                        match serde_json::from_slice::<DeltaMessage>(&message.payload) {
                            Ok(delta) => {
                                if let Err(e) = this.apply_foreign_delta(delta).await {
                                    warn!(error = %e, "foreign delta rejected");
                                }
                            }
                            Err(e) => warn!(error = %e, "undecodable pub/sub payload"),
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "pub/sub receiver lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    /// Queue an authoritative delta into the document's coalescing window;
    /// the window's first delta arms the flush timer.
    async fn enqueue_broadcast(self: &Arc<Self>, doc_id: &DocumentId, delta: DeltaMessage) {
        if self.config.batch_window_ms == 0 {
            self.broadcast_now(doc_id, delta).await;
            return;
        }
        let batcher = self
            .batchers
            .entry(doc_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(DeltaCoalescer::new())))
            .clone();
        let arm_timer = {
            let mut guard = batcher.lock().await;
            let was_empty = guard.is_empty();
            guard.push(delta);
            was_empty
        };
        if arm_timer {
            let this = self.clone();
            let doc_id = doc_id.clone();
            let window = Duration::from_millis(self.config.batch_window_ms);
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let (merged, ops_tail) = {
                    let mut guard = batcher.lock().await;
                    let merged = guard.flush();
                    let ops_tail = guard.flush_ops(Message::new_message_id());
                    (merged, ops_tail)
                };
                if let Some(delta) = merged {
                    this.broadcast_now(&doc_id, delta).await;
                }
                if let Some(delta) = ops_tail {
                    this.broadcast_now(&doc_id, delta).await;
                }
            });
        }
    }

    /// Send one delta to every subscriber, each copy tracked for ACK.
    async fn broadcast_now(self: &Arc<Self>, doc_id: &DocumentId, delta: DeltaMessage) {
        for subscriber in self.subscriptions.subscribers(doc_id) {
            if let Some(handle) = self.connections.get(&subscriber) {
                let mut copy = delta.clone();
                copy.id = Message::new_message_id();
                self.acks.track(
                    subscriber.clone(),
                    doc_id.clone(),
                    copy.id.clone(),
                    Message::Delta(copy.clone()),
                );
                handle.send(Message::Delta(copy));
            }
        }
    }

    /// Load (or create) a document entry. Prefers the persisted document
    /// state, falls back to the newest snapshot, then to an empty document.
    async fn doc_entry(&self, doc_id: &DocumentId) -> SyncResult<Arc<Mutex<ReplicatedDoc>>> {
        if let Some(entry) = self.docs.get(doc_id) {
            return Ok(entry.value().clone());
        }

        let doc = match self.adapter.load(&keys::document_key(doc_id)).await? {
            Some(bytes) => serde_json::from_slice::<ReplicatedDoc>(&bytes).unwrap_or_else(|e| {
                warn!(doc_id = %doc_id, error = %e, "stored document unreadable, starting fresh");
                ReplicatedDoc::new(doc_id.clone(), self.replica.clone())
            }),
            None => match self.latest_snapshot(doc_id).await {
                Some(doc) => doc,
                None => ReplicatedDoc::new(doc_id.clone(), self.replica.clone()),
            },
        };

        let entry = self
            .docs
            .entry(doc_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(doc)));
        Ok(entry.value().clone())
    }

    async fn latest_snapshot(&self, doc_id: &DocumentId) -> Option<ReplicatedDoc> {
        let prefix = keys::retained_snapshot_prefix(&self.config.snapshots.snapshot_prefix, doc_id);
        let mut candidates: Vec<(i64, String)> = self
            .adapter
            .list(&prefix)
            .await
            .ok()?
            .into_iter()
            .filter_map(|key| keys::snapshot_key_timestamp(&key).map(|ts| (ts, key)))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        let (_, key) = candidates.into_iter().next()?;
        let bytes = self.adapter.load(&key).await.ok()??;
        let blob = SnapshotBlob::decode(&key, &bytes).ok()?;
        blob.restore().ok()
    }

    /// Storage writes retry once before failing the delta (transient-error
    /// policy); the failure never affects other documents.
    async fn save_with_retry(&self, key: &str, bytes: &[u8]) -> SyncResult<()> {
        if let Err(first) = self.adapter.save(key, bytes).await {
            warn!(key = %key, error = %first, "storage write failed, retrying once");
            self.adapter.save(key, bytes).await?;
        }
        Ok(())
    }

    /// Register a fresh connection handle (pre-auth).
    pub fn register_connection(
        &self,
        conn_id: ConnectionId,
        outbound: tokio::sync::mpsc::UnboundedSender<Message>,
    ) {
        let permissions = if self.config.auth_required {
            Permissions::default()
        } else {
            // Anonymous deployments grant blanket access without admin.
            Permissions {
                can_read: vec!["*".to_string()],
                can_write: vec!["*".to_string()],
                is_admin: false,
            }
        };
        self.connections.insert(crate::connection::ConnectionHandle {
            id: conn_id.clone(),
            client_id: ClientId::from(conn_id.as_str()),
            permissions,
            outbound,
        });
    }
}

/// Turn a wire delta into operation envelopes. Field-map deltas become one
/// Set/Delete per field stamped from the per-field meta (or the
/// message-level writer and logical clock); op deltas pass through after
/// validation.
fn envelopes_from(delta: &DeltaMessage) -> SyncResult<Vec<OperationEnvelope>> {
    match &delta.delta {
        DeltaBody::Fields(fields) => {
            let mut envelopes = Vec::with_capacity(fields.len());
            for (field, value) in fields {
                if field.is_empty() {
                    return Err(SyncError::MalformedOperation(
                        "empty field path".to_string(),
                    ));
                }
                let (clock, writer) = match delta.meta.as_ref().and_then(|m| m.get(field)) {
                    Some(meta) => (meta.clock, meta.writer.clone()),
                    None => (
                        delta.logical_clock.ok_or_else(|| {
                            SyncError::MalformedOperation(
                                "field delta without logical clock".to_string(),
                            )
                        })?,
                        delta.writer.clone(),
                    ),
                };
                let op = if is_tombstone(value) {
                    Operation::Delete {
                        field: FieldPath::from(field.as_str()),
                    }
                } else {
                    Operation::Set {
                        field: FieldPath::from(field.as_str()),
                        value: value.clone(),
                    }
                };
                envelopes.push(OperationEnvelope {
                    document_id: delta.doc_id.clone(),
                    writer,
                    logical_clock: clock,
                    timestamp: Utc::now(),
                    clock: delta.vector_clock.clone(),
                    op,
                });
            }
            Ok(envelopes)
        }
        DeltaBody::Ops(envelopes) => {
            for envelope in envelopes {
                if envelope.document_id != delta.doc_id {
                    return Err(SyncError::MalformedOperation(format!(
                        "envelope for {} inside delta for {}",
                        envelope.document_id, delta.doc_id
                    )));
                }
                if envelope.writer.as_str().is_empty() {
                    return Err(SyncError::MalformedOperation(
                        "envelope without writer".to_string(),
                    ));
                }
            }
            Ok(envelopes.clone())
        }
    }
}

/// Cheap pre-check so a malformed delta is rejected before any mutation.
fn op_matches_kind(op: &Operation, state: &DocState) -> bool {
    matches!(
        (state, op),
        (
            DocState::Lww(_),
            Operation::Set { .. } | Operation::Delete { .. }
        ) | (
            DocState::Text(_),
            Operation::InsertChar { .. }
                | Operation::DeleteChar { .. }
                | Operation::Format { .. }
                | Operation::Unformat { .. }
        ) | (
            DocState::Counter(_),
            Operation::CounterInc { .. } | Operation::CounterDec { .. }
        ) | (
            DocState::Set(_),
            Operation::SetAdd { .. } | Operation::SetRemove { .. }
        )
    )
}
