//! The client sync runtime.
//!
//! Owns the replicated documents, the offline queue, and the connection
//! lifecycle. Local edits apply optimistically, persist to the queue, and
//! (on the leader tab) flow to the server as DELTAs; authoritative
//! broadcasts supersede local state; ACKs retire queue entries. Follower
//! tabs route their edits through the leader and refresh their documents
//! from the storage adapter's change signal.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, info, instrument, warn};

use synckit_core::config::ClientConfig;
use synckit_core::errors::AuthError;
use synckit_core::{ClientId, DocumentId, FieldPath, ReplicaId, SyncResult};
use synckit_crdt::doc::DocState;
use synckit_crdt::{LwwRegister, Operation, OperationEnvelope, ReplicatedDoc};
use synckit_protocol::{
    decode_frame, encode_frame, DeltaBody, DeltaMessage, Message,
};
use synckit_storage::StorageAdapter;

use crate::awareness::{AwarenessPeers, AwarenessPublisher};
use crate::connection::{ClientTransport, ConnectionState, ReconnectPolicy, TransportLink};
use crate::queue::OfflineQueue;
use crate::tabs::{TabCoordinator, TabMessage, TabRole};

/// A high-level local edit, resolved into operations against the live
/// document inside the runtime (text edits need the document to mint
/// character origins).
#[derive(Debug, Clone)]
pub enum Edit {
    SetField {
        field: FieldPath,
        value: Value,
    },
    DeleteField {
        field: FieldPath,
    },
    InsertText {
        pos: usize,
        text: String,
    },
    DeleteText {
        pos: usize,
        len: usize,
    },
    FormatText {
        start: usize,
        end: usize,
        attrs: std::collections::BTreeMap<String, Value>,
    },
    UnformatText {
        start: usize,
        end: usize,
        attrs: Vec<String>,
    },
    CounterInc {
        amount: u64,
    },
    CounterDec {
        amount: u64,
    },
    SetAdd {
        element: Value,
    },
    SetRemove {
        element: Value,
    },
}

enum Command {
    Register(DocumentId),
    Edit(DocumentId, Edit),
    Awareness(DocumentId, Value),
    /// An envelope routed from a follower tab.
    Forwarded(OperationEnvelope),
    /// Reload a document from storage (follower path).
    Refresh(DocumentId),
    Shutdown,
}

/// Cloneable command-and-read surface of a running [`SyncRuntime`].
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    shared: Arc<Mutex<RuntimeShared>>,
}

impl SyncHandle {
    pub async fn register_document(&self, doc_id: DocumentId) {
        let _ = self.commands.send(Command::Register(doc_id)).await;
    }

    pub async fn edit(&self, doc_id: DocumentId, edit: Edit) {
        let _ = self.commands.send(Command::Edit(doc_id, edit)).await;
    }

    pub async fn set_awareness(&self, doc_id: DocumentId, state: Value) {
        let _ = self.commands.send(Command::Awareness(doc_id, state)).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Rendered state of a local document.
    pub async fn render_document(&self, doc_id: &DocumentId) -> Option<Value> {
        self.shared
            .lock()
            .await
            .docs
            .get(doc_id)
            .map(|doc| doc.render())
    }

    /// Operations still waiting for server acknowledgement.
    pub async fn queued_len(&self) -> usize {
        self.shared.lock().await.queue.len()
    }

    /// Live awareness peers on one document.
    pub async fn awareness_peers(&self, doc_id: &DocumentId) -> Vec<(ClientId, Value)> {
        self.shared
            .lock()
            .await
            .peers
            .on_document(doc_id)
            .into_iter()
            .map(|(client, state)| (client.clone(), state.clone()))
            .collect()
    }
}

/// Shared document and queue state behind the runtime task.
struct RuntimeShared {
    docs: HashMap<DocumentId, ReplicatedDoc>,
    queue: OfflineQueue,
    publishers: HashMap<DocumentId, AwarenessPublisher>,
    pub peers: AwarenessPeers,
}

/// The per-client sync runtime. Construct, then call [`SyncRuntime::run`].
pub struct SyncRuntime {
    replica: ReplicaId,
    client_id: ClientId,
    token: String,
    config: ClientConfig,
    adapter: Arc<dyn StorageAdapter>,
    transport: Arc<dyn ClientTransport>,
    tabs: Option<Arc<TabCoordinator>>,
    shared: Arc<Mutex<RuntimeShared>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
}

impl SyncRuntime {
    pub async fn new(
        replica: ReplicaId,
        client_id: ClientId,
        token: String,
        config: ClientConfig,
        adapter: Arc<dyn StorageAdapter>,
        transport: Arc<dyn ClientTransport>,
        tabs: Option<Arc<TabCoordinator>>,
    ) -> SyncResult<Self> {
        let queue = OfflineQueue::open(adapter.clone(), &replica, config.queue.clone()).await?;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (commands_tx, commands_rx) = mpsc::channel(256);
        Ok(Self {
            replica,
            client_id,
            token,
            config,
            adapter,
            transport,
            tabs,
            shared: Arc::new(Mutex::new(RuntimeShared {
                docs: HashMap::new(),
                queue,
                publishers: HashMap::new(),
                peers: AwarenessPeers::new(),
            })),
            state_tx,
            state_rx,
            commands_tx,
            commands_rx,
        })
    }

    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            commands: self.commands_tx.clone(),
            state: self.state_rx.clone(),
            shared: self.shared.clone(),
        }
    }

    fn is_leader(&self) -> bool {
        match &self.tabs {
            Some(tabs) => tabs.role() == TabRole::Leader,
            // A tab-less runtime owns its connection.
            None => true,
        }
    }

    /// Drive the runtime until shutdown. Reconnects with jittered backoff;
    /// edits made while disconnected accumulate in the queue.
    pub async fn run(mut self) -> SyncResult<()> {
        self.spawn_tab_intake();
        self.spawn_storage_watch();

        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        loop {
            if !self.is_leader() {
                // Followers do not own a connection; they serve commands
                // locally until elected.
                if self.follower_loop().await {
                    return Ok(());
                }
                continue;
            }

            let _ = self.state_tx.send(ConnectionState::Connecting);
            match self.transport.connect().await {
                Ok(link) => match self.session(link, &mut policy).await {
                    Ok(SessionEnd::Shutdown) => {
                        let _ = self.state_tx.send(ConnectionState::Disconnected);
                        return Ok(());
                    }
                    Ok(SessionEnd::ConnectionLost) => {}
                    Err(e) => {
                        warn!(error = %e, "session ended with error");
                        if matches!(e, synckit_core::SyncError::Auth(_)) {
                            let _ = self.state_tx.send(ConnectionState::Failed);
                            return Err(e);
                        }
                    }
                },
                Err(e) => {
                    debug!(error = %e, "connect attempt failed");
                }
            }

            match policy.next_delay() {
                Some(delay) => {
                    let _ = self.state_tx.send(ConnectionState::Reconnecting);
                    // Keep serving local edits while waiting: they apply
                    // optimistically and accumulate in the queue.
                    let deadline = Instant::now() + delay;
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep_until(deadline) => break,
                            command = self.commands_rx.recv() => match command {
                                None | Some(Command::Shutdown) => {
                                    let _ = self.state_tx.send(ConnectionState::Disconnected);
                                    return Ok(());
                                }
                                Some(command) => {
                                    if let Err(e) = self.handle_command_offline(command).await {
                                        warn!(error = %e, "offline command failed");
                                    }
                                }
                            }
                        }
                    }
                }
                None => {
                    let _ = self.state_tx.send(ConnectionState::Failed);
                    return Ok(());
                }
            }
        }
    }

    /// Serve commands while another tab leads. Returns true on shutdown.
    async fn follower_loop(&mut self) -> bool {
        let _ = self.state_tx.send(ConnectionState::Disconnected);
        let mut role_rx = match &self.tabs {
            Some(tabs) => tabs.watch_role(),
            None => return false,
        };
        loop {
            tokio::select! {
                command = self.commands_rx.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => return true,
                        Some(command) => {
                            if let Err(e) = self.handle_command_offline(command).await {
                                warn!(error = %e, "follower command failed");
                            }
                        }
                    }
                }
                changed = role_rx.changed() => {
                    if changed.is_err() || *role_rx.borrow() == TabRole::Leader {
                        // Promoted: take over the connection.
                        return false;
                    }
                }
            }
        }
    }

    /// One authenticated connection from AUTH to close.
    async fn session(
        &mut self,
        mut link: Box<dyn TransportLink>,
        policy: &mut ReconnectPolicy,
    ) -> SyncResult<SessionEnd> {
        send(&mut link, &Message::Auth {
            token: self.token.clone(),
            client_id: Some(self.client_id.clone()),
        })
        .await?;

        // Wait for the auth verdict before anything else.
        loop {
            match recv(&mut link).await? {
                None => return Ok(SessionEnd::ConnectionLost),
                Some(Message::AuthSuccess { user_id, .. }) => {
                    info!(user_id = %user_id, "authenticated");
                    break;
                }
                Some(Message::AuthError { error, code }) => {
                    return Err(AuthError::TokenInvalid {
                        reason: format!("{code}: {error}"),
                    }
                    .into());
                }
                // Anything else pre-auth is dropped.
                Some(_) => {}
            }
        }
        let _ = self.state_tx.send(ConnectionState::Connected);
        policy.reset();

        // Subscribe every registered document, then replay the queue.
        let mut inflight: HashMap<String, u64> = HashMap::new();
        {
            let shared = self.shared.lock().await;
            let doc_ids: Vec<DocumentId> = shared.docs.keys().cloned().collect();
            for doc_id in doc_ids {
                send(&mut link, &Message::Subscribe {
                    doc_id: doc_id.clone(),
                })
                .await?;
                let since = if shared.queue.needs_full_sync() {
                    None
                } else {
                    shared.docs.get(&doc_id).map(|doc| doc.clock.clone())
                };
                send(&mut link, &Message::SyncRequest {
                    doc_id,
                    since_vector_clock: since,
                })
                .await?;
            }
            let entries = shared.queue.peek(usize::MAX);
            for entry in entries {
                let message_id = Message::new_message_id();
                inflight.insert(message_id.clone(), entry.seq);
                let delta = delta_for(&entry.envelope, message_id);
                send(&mut link, &Message::Delta(delta)).await?;
            }
        }

        let mut heartbeat = interval(Duration::from_millis(self.config.heartbeat.interval_ms));
        heartbeat.tick().await; // first tick fires immediately
        let pong_timeout = Duration::from_millis(self.config.heartbeat.timeout_ms);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            // Placeholder when no PONG is pending; the guard below disarms it.
            let deadline =
                pong_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));
            tokio::select! {
                incoming = recv(&mut link) => {
                    match incoming? {
                        None => return Ok(SessionEnd::ConnectionLost),
                        Some(message) => {
                            if matches!(message, Message::Pong) {
                                pong_deadline = None;
                            }
                            self.handle_incoming(message, &mut link, &mut inflight).await?;
                        }
                    }
                }
                command = self.commands_rx.recv() => {
                    match command {
                        None | Some(Command::Shutdown) => return Ok(SessionEnd::Shutdown),
                        Some(command) => {
                            self.handle_command_online(command, &mut link).await?;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    send(&mut link, &Message::Ping).await?;
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + pong_timeout);
                    }
                }
                _ = tokio::time::sleep_until(deadline), if pong_deadline.is_some() => {
                    warn!("heartbeat timed out, closing connection");
                    return Ok(SessionEnd::ConnectionLost);
                }
            }
        }
    }

    #[instrument(skip_all)]
    async fn handle_incoming(
        &mut self,
        message: Message,
        link: &mut Box<dyn TransportLink>,
        inflight: &mut HashMap<String, u64>,
    ) -> SyncResult<()> {
        match message {
            Message::Ping => send(link, &Message::Pong).await?,
            Message::Pong => {}
            Message::Ack { message_id } => {
                if let Some(seq) = inflight.remove(&message_id) {
                    let mut shared = self.shared.lock().await;
                    shared.queue.ack(seq).await?;
                    if shared.queue.is_empty() {
                        shared.queue.mark_synced().await?;
                    }
                }
            }
            Message::Delta(delta) => {
                let id = delta.id.clone();
                self.apply_authoritative(delta).await?;
                send(link, &Message::Ack { message_id: id }).await?;
            }
            Message::DeltaBatch { deltas, .. } => {
                for delta in deltas {
                    let id = delta.id.clone();
                    self.apply_authoritative(delta).await?;
                    send(link, &Message::Ack { message_id: id }).await?;
                }
            }
            Message::SyncResponse {
                doc_id,
                state,
                vector_clock,
            } => {
                {
                    let mut shared = self.shared.lock().await;
                    if let Some(doc) = shared.docs.get_mut(&doc_id) {
                        match serde_json::from_value::<ReplicatedDoc>(state) {
                            Ok(remote) => {
                                doc.merge(&remote)?;
                                doc.clock.merge(&vector_clock);
                            }
                            Err(e) => {
                                warn!(doc_id = %doc_id, error = %e, "undecodable sync response")
                            }
                        }
                    }
                }
                self.persist_doc(&doc_id).await?;
            }
            Message::AwarenessState(payload) => {
                let mut shared = self.shared.lock().await;
                shared.peers.apply(&payload);
            }
            Message::Error(payload) => {
                warn!(code = %payload.code, error = %payload.error, "server error");
            }
            other => {
                debug!(message_type = other.message_type().as_str(), "ignoring message");
            }
        }
        Ok(())
    }

    /// Authoritative broadcast: supersede local state with resolved values.
    async fn apply_authoritative(&mut self, delta: DeltaMessage) -> SyncResult<()> {
        {
            let mut shared = self.shared.lock().await;
            let doc = shared
                .docs
                .entry(delta.doc_id.clone())
                .or_insert_with(|| ReplicatedDoc::new(delta.doc_id.clone(), self.replica.clone()));
            match delta.delta {
                DeltaBody::Fields(fields) => {
                    if let DocState::Lww(lww) = &mut doc.state {
                        for (field, value) in fields {
                            let meta = delta.meta.as_ref().and_then(|m| m.get(&field));
                            let (clock, writer) = match meta {
                                Some(meta) => (meta.clock, meta.writer.clone()),
                                None => (
                                    delta.logical_clock.unwrap_or_default(),
                                    delta.writer.clone(),
                                ),
                            };
                            lww.supersede(
                                FieldPath::from(field.as_str()),
                                LwwRegister::new(value, clock, writer),
                            );
                        }
                    }
                }
                DeltaBody::Ops(envelopes) => {
                    for envelope in &envelopes {
                        doc.apply(envelope)?;
                    }
                }
            }
            doc.clock.merge(&delta.vector_clock);
        }
        self.persist_doc(&delta.doc_id).await
    }

    async fn handle_command_online(
        &mut self,
        command: Command,
        link: &mut Box<dyn TransportLink>,
    ) -> SyncResult<()> {
        match command {
            Command::Register(doc_id) => {
                self.register(doc_id.clone()).await;
                send(link, &Message::Subscribe {
                    doc_id: doc_id.clone(),
                })
                .await?;
                send(link, &Message::SyncRequest {
                    doc_id,
                    since_vector_clock: None,
                })
                .await?;
            }
            Command::Edit(doc_id, edit) => {
                let envelopes = self.apply_local_edit(&doc_id, edit).await?;
                for envelope in envelopes {
                    self.dispatch_envelope(envelope, Some(&mut *link)).await?;
                }
            }
            Command::Forwarded(envelope) => {
                // Apply to our copy, then deliver under the original writer.
                let doc_id = envelope.document_id.clone();
                {
                    let mut shared = self.shared.lock().await;
                    let replica = self.replica.clone();
                    let doc = shared
                        .docs
                        .entry(doc_id.clone())
                        .or_insert_with(|| ReplicatedDoc::new(doc_id.clone(), replica));
                    doc.apply(&envelope)?;
                }
                self.persist_doc(&doc_id).await?;
                self.dispatch_envelope(envelope, Some(&mut *link)).await?;
            }
            Command::Awareness(doc_id, state) => {
                let payload = {
                    let mut shared = self.shared.lock().await;
                    let publisher = shared
                        .publishers
                        .entry(doc_id.clone())
                        .or_insert_with(|| AwarenessPublisher::new(doc_id.clone()));
                    publisher.update(state)
                };
                send(link, &Message::AwarenessSubscribe { doc_id }).await?;
                send(link, &Message::AwarenessUpdate(payload)).await?;
            }
            Command::Refresh(doc_id) => {
                self.refresh_from_storage(&doc_id).await?;
            }
            Command::Shutdown => {}
        }
        Ok(())
    }

    async fn handle_command_offline(&mut self, command: Command) -> SyncResult<()> {
        match command {
            Command::Register(doc_id) => self.register(doc_id).await,
            Command::Edit(doc_id, edit) => {
                let envelopes = self.apply_local_edit(&doc_id, edit).await?;
                for envelope in envelopes {
                    self.dispatch_envelope(envelope, None).await?;
                }
            }
            Command::Forwarded(envelope) => {
                let doc_id = envelope.document_id.clone();
                {
                    let mut shared = self.shared.lock().await;
                    let replica = self.replica.clone();
                    let doc = shared
                        .docs
                        .entry(doc_id.clone())
                        .or_insert_with(|| ReplicatedDoc::new(doc_id.clone(), replica));
                    doc.apply(&envelope)?;
                }
                self.dispatch_envelope(envelope, None).await?;
            }
            Command::Awareness(doc_id, state) => {
                let mut shared = self.shared.lock().await;
                let publisher = shared
                    .publishers
                    .entry(doc_id.clone())
                    .or_insert_with(|| AwarenessPublisher::new(doc_id.clone()));
                // Clock keeps advancing; the next connection republishes.
                let _ = publisher.update(state);
            }
            Command::Refresh(doc_id) => self.refresh_from_storage(&doc_id).await?,
            Command::Shutdown => {}
        }
        Ok(())
    }

    async fn register(&mut self, doc_id: DocumentId) {
        let mut shared = self.shared.lock().await;
        let replica = self.replica.clone();
        shared
            .docs
            .entry(doc_id.clone())
            .or_insert_with(|| ReplicatedDoc::new(doc_id, replica));
    }

    /// Resolve an edit against the live document into enveloped operations,
    /// applying locally as we go.
    async fn apply_local_edit(
        &mut self,
        doc_id: &DocumentId,
        edit: Edit,
    ) -> SyncResult<Vec<OperationEnvelope>> {
        let mut shared = self.shared.lock().await;
        let replica = self.replica.clone();
        let doc = shared
            .docs
            .entry(doc_id.clone())
            .or_insert_with(|| ReplicatedDoc::new(doc_id.clone(), replica.clone()));

        let ops: Vec<Operation> = match edit {
            Edit::SetField { field, value } => vec![Operation::Set { field, value }],
            Edit::DeleteField { field } => vec![Operation::Delete { field }],
            Edit::InsertText { pos, text } => match &mut doc.state {
                DocState::Text(text_doc) => text_doc.text.insert(pos, &text),
                _ => vec![],
            },
            Edit::DeleteText { pos, len } => match &mut doc.state {
                DocState::Text(text_doc) => text_doc.text.delete(pos, len),
                _ => vec![],
            },
            Edit::FormatText { start, end, attrs } => match &mut doc.state {
                DocState::Text(text_doc) => {
                    let clock = doc.clock.get(&replica) + 1;
                    text_doc
                        .formats
                        .format(&text_doc.text, start, end, attrs, replica.clone(), clock)
                        .map(|span| vec![Operation::Format { span }])
                        .unwrap_or_default()
                }
                _ => vec![],
            },
            Edit::UnformatText { start, end, attrs } => match &mut doc.state {
                DocState::Text(text_doc) => {
                    let clock = doc.clock.get(&replica) + 1;
                    text_doc
                        .formats
                        .unformat(&text_doc.text, start, end, &attrs, replica.clone(), clock)
                        .map(|span| vec![Operation::Unformat { span }])
                        .unwrap_or_default()
                }
                _ => vec![],
            },
            Edit::CounterInc { amount } => vec![Operation::CounterInc { amount }],
            Edit::CounterDec { amount } => vec![Operation::CounterDec { amount }],
            Edit::SetAdd { element } => {
                let seq = doc.clock.get(&replica) + 1;
                let tag = synckit_crdt::AddTag {
                    replica: replica.clone(),
                    seq,
                };
                vec![Operation::SetAdd { element, tag }]
            }
            Edit::SetRemove { element } => match &doc.state {
                DocState::Set(set) => {
                    let tags = set.observed_tags(&element);
                    vec![Operation::SetRemove { element, tags }]
                }
                _ => vec![],
            },
        };

        let mut envelopes = Vec::with_capacity(ops.len());
        for op in ops {
            let logical_clock = doc.clock.get(&replica) + 1;
            let mut clock = doc.clock.clone();
            clock.observe(&replica, logical_clock);
            let envelope = OperationEnvelope {
                document_id: doc_id.clone(),
                writer: replica.clone(),
                logical_clock,
                timestamp: Utc::now(),
                clock,
                op,
            };
            doc.apply(&envelope)?;
            envelopes.push(envelope);
        }
        drop(shared);
        self.persist_doc(doc_id).await?;
        Ok(envelopes)
    }

    /// Queue an envelope and, when we own a live link, send it now. A
    /// follower forwards instead of queueing.
    async fn dispatch_envelope(
        &mut self,
        envelope: OperationEnvelope,
        link: Option<&mut Box<dyn TransportLink>>,
    ) -> SyncResult<()> {
        if !self.is_leader() {
            if let Some(tabs) = &self.tabs {
                return tabs.forward_op(self.client_id.clone(), envelope).await;
            }
        }
        let mut shared = self.shared.lock().await;
        shared.queue.enqueue(envelope.clone()).await?;
        drop(shared);

        if let Some(link) = link {
            let message_id = Message::new_message_id();
            let delta = delta_for(&envelope, message_id);
            send(link, &Message::Delta(delta)).await?;
        }
        Ok(())
    }

    async fn persist_doc(&self, doc_id: &DocumentId) -> SyncResult<()> {
        let bytes = {
            let shared = self.shared.lock().await;
            match shared.docs.get(doc_id) {
                Some(doc) => serde_json::to_vec(doc).map_err(|e| {
                    synckit_core::errors::StorageError::Serialization(e.to_string())
                })?,
                None => return Ok(()),
            }
        };
        self.adapter.save(doc_id.as_str(), &bytes).await
    }

    async fn refresh_from_storage(&mut self, doc_id: &DocumentId) -> SyncResult<()> {
        if let Some(bytes) = self.adapter.load(doc_id.as_str()).await? {
            if let Ok(doc) = serde_json::from_slice::<ReplicatedDoc>(&bytes) {
                let mut shared = self.shared.lock().await;
                shared.docs.insert(doc_id.clone(), doc);
            }
        }
        Ok(())
    }

    /// Route follower-tab operations into the command loop. Only the
    /// current leader consumes them; a follower re-forwarding would echo
    /// the operation around the channel forever.
    fn spawn_tab_intake(&self) {
        let Some(tabs) = &self.tabs else { return };
        let mut rx = tabs.channel_subscribe();
        let own_tab = tabs.tab_id().to_string();
        let tabs = tabs.clone();
        let commands = self.commands_tx.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(TabMessage::ForwardOp {
                        tab_id, envelope, ..
                    }) if tab_id != own_tab && tabs.role() == TabRole::Leader => {
                        if commands.send(Command::Forwarded(envelope)).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    /// Follower tabs refresh documents when the leader persists them.
    fn spawn_storage_watch(&self) {
        if self.tabs.is_none() {
            return;
        }
        let mut watcher = self.adapter.watch();
        let commands = self.commands_tx.clone();
        tokio::spawn(async move {
            loop {
                match watcher.recv().await {
                    Ok(event) => {
                        if event.key.starts_with("queue:") || event.key.starts_with("undo:") {
                            continue;
                        }
                        let doc_id = DocumentId::from(event.key.as_str());
                        if commands.send(Command::Refresh(doc_id)).await.is_err() {
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }
}

enum SessionEnd {
    ConnectionLost,
    Shutdown,
}

/// Build the wire DELTA for one envelope: field-map body for LWW ops,
/// enveloped-ops body for everything else.
fn delta_for(envelope: &OperationEnvelope, message_id: String) -> DeltaMessage {
    let body = match &envelope.op {
        Operation::Set { field, value } => {
            let mut fields = BTreeMap::new();
            fields.insert(field.as_str().to_string(), value.clone());
            DeltaBody::Fields(fields)
        }
        Operation::Delete { field } => {
            let mut fields = BTreeMap::new();
            fields.insert(field.as_str().to_string(), synckit_crdt::tombstone());
            DeltaBody::Fields(fields)
        }
        _ => DeltaBody::Ops(vec![envelope.clone()]),
    };
    DeltaMessage {
        id: message_id,
        doc_id: envelope.document_id.clone(),
        delta: body,
        vector_clock: envelope.clock.clone(),
        writer: envelope.writer.clone(),
        logical_clock: Some(envelope.logical_clock),
        meta: None,
    }
}

async fn send(link: &mut Box<dyn TransportLink>, message: &Message) -> SyncResult<()> {
    let frame = encode_frame(message, Utc::now().timestamp_millis() as u64)?;
    link.send(frame).await
}

async fn recv(link: &mut Box<dyn TransportLink>) -> SyncResult<Option<Message>> {
    match link.recv().await? {
        Some(bytes) => Ok(Some(decode_frame(&bytes)?.message)),
        None => Ok(None),
    }
}

/// Resolve an envelope into its wire DELTA (shared with tests and the
/// forwarding path).
pub fn wire_delta(envelope: &OperationEnvelope, message_id: String) -> DeltaMessage {
    delta_for(envelope, message_id)
}
