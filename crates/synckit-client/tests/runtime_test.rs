//! Sync runtime tests against a scripted in-process server.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use synckit_client::{
    ClientTransport, ConnectionState, Edit, SyncRuntime, TransportLink,
};
use synckit_core::config::ClientConfig;
use synckit_core::{ClientId, DocumentId, Permissions, ReplicaId, SyncError, SyncResult};
use synckit_crdt::ReplicatedDoc;
use synckit_protocol::{decode_frame, encode_frame, DeltaBody, DeltaMessage, Message};
use synckit_storage::{MemoryAdapter, StorageAdapter};

// =============================================================================
// In-process transport plumbing
// =============================================================================

struct TestLink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl TransportLink for TestLink {
    async fn send(&mut self, frame: Vec<u8>) -> SyncResult<()> {
        self.tx.send(frame).map_err(|_| SyncError::ConnectionClosed)
    }

    async fn recv(&mut self) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }
}

/// The server half of one link.
struct ServerEnd {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ServerEnd {
    async fn send(&self, message: &Message) {
        let frame = encode_frame(message, 0).unwrap();
        let _ = self.tx.send(frame);
    }

    async fn recv(&mut self) -> Option<Message> {
        let bytes = self.rx.recv().await?;
        Some(decode_frame(&bytes).unwrap().message)
    }
}

fn link_pair() -> (TestLink, ServerEnd) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        TestLink {
            tx: client_tx,
            rx: client_rx,
        },
        ServerEnd {
            tx: server_tx,
            rx: server_rx,
        },
    )
}

/// Hands out pre-built links, then fails every further connect.
struct ScriptedTransport {
    links: Mutex<VecDeque<TestLink>>,
}

#[async_trait]
impl ClientTransport for ScriptedTransport {
    async fn connect(&self) -> SyncResult<Box<dyn TransportLink>> {
        match self.links.lock().await.pop_front() {
            Some(link) => Ok(Box::new(link)),
            None => Err(SyncError::ConnectionClosed),
        }
    }
}

/// A minimal compliant server: authenticates, answers subscribes and sync
/// requests with empty state, ACKs deltas, answers pings. Received DELTAs
/// are collected for assertions.
fn spawn_mock_server(mut end: ServerEnd) -> Arc<Mutex<Vec<DeltaMessage>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    tokio::spawn(async move {
        while let Some(message) = end.recv().await {
            match message {
                Message::Auth { .. } => {
                    end.send(&Message::AuthSuccess {
                        user_id: "u1".to_string(),
                        permissions: Permissions::admin(),
                    })
                    .await;
                }
                Message::Subscribe { doc_id } | Message::SyncRequest { doc_id, .. } => {
                    let empty = ReplicatedDoc::new(doc_id.clone(), ReplicaId::from("server"));
                    end.send(&Message::SyncResponse {
                        doc_id,
                        state: serde_json::to_value(&empty).unwrap(),
                        vector_clock: empty.clock.clone(),
                    })
                    .await;
                }
                Message::Delta(delta) => {
                    let id = delta.id.clone();
                    sink.lock().await.push(delta);
                    end.send(&Message::Ack { message_id: id }).await;
                }
                Message::Ping => end.send(&Message::Pong).await,
                _ => {}
            }
        }
    });
    received
}

async fn wait_for_state(
    handle: &synckit_client::SyncHandle,
    wanted: ConnectionState,
) {
    let mut watcher = handle.watch_state();
    for _ in 0..200 {
        if *watcher.borrow() == wanted {
            return;
        }
        let _ = tokio::time::timeout(Duration::from_millis(100), watcher.changed()).await;
    }
    panic!("never reached {wanted:?}");
}

async fn build_runtime(
    transport: Arc<dyn ClientTransport>,
    adapter: Arc<dyn StorageAdapter>,
) -> SyncRuntime {
    SyncRuntime::new(
        ReplicaId::from("replica-1"),
        ClientId::from("client-1"),
        "token".to_string(),
        ClientConfig::default(),
        adapter,
        transport,
        None,
    )
    .await
    .unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn connects_edits_flow_and_acks_drain_the_queue() {
    let (link, server_end) = link_pair();
    let received = spawn_mock_server(server_end);
    let transport = Arc::new(ScriptedTransport {
        links: Mutex::new(VecDeque::from([link])),
    });
    let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());

    let runtime = build_runtime(transport, adapter).await;
    let handle = runtime.handle();
    tokio::spawn(runtime.run());

    wait_for_state(&handle, ConnectionState::Connected).await;

    let doc: DocumentId = "profile".into();
    handle.register_document(doc.clone()).await;
    handle
        .edit(
            doc.clone(),
            Edit::SetField {
                field: "name".into(),
                value: json!("Ada"),
            },
        )
        .await;

    // Local state is optimistic.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        handle.render_document(&doc).await.unwrap()["name"],
        json!("Ada")
    );

    // The server received the DELTA and the ACK drained the queue.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let deltas = received.lock().await;
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].doc_id, doc);
    match &deltas[0].delta {
        DeltaBody::Fields(fields) => assert_eq!(fields["name"], json!("Ada")),
        other => panic!("expected field delta, got {other:?}"),
    }
    drop(deltas);
    assert_eq!(handle.queued_len().await, 0);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn offline_edits_queue_and_replay_on_reconnect() {
    // First connect fails (no link yet); edits accumulate offline.
    let transport = Arc::new(ScriptedTransport {
        links: Mutex::new(VecDeque::new()),
    });
    let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());

    let runtime = build_runtime(transport.clone(), adapter).await;
    let handle = runtime.handle();
    tokio::spawn(runtime.run());

    let doc: DocumentId = "notes".into();
    handle.register_document(doc.clone()).await;
    for i in 0..10 {
        handle
            .edit(
                doc.clone(),
                Edit::SetField {
                    field: format!("f{i}").as_str().into(),
                    value: json!(i),
                },
            )
            .await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.queued_len().await, 10);

    // Now the network comes back.
    let (link, server_end) = link_pair();
    let received = spawn_mock_server(server_end);
    transport.links.lock().await.push_back(link);

    wait_for_state(&handle, ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // All ten ops arrived in sender order, and the queue is empty.
    let deltas = received.lock().await;
    assert_eq!(deltas.len(), 10);
    let clocks: Vec<Option<u64>> = deltas.iter().map(|d| d.logical_clock).collect();
    let sorted = {
        let mut c = clocks.clone();
        c.sort();
        c
    };
    assert_eq!(clocks, sorted);
    drop(deltas);
    assert_eq!(handle.queued_len().await, 0);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn authoritative_delta_supersedes_local_state() {
    let (link, mut server_end) = link_pair();
    let transport = Arc::new(ScriptedTransport {
        links: Mutex::new(VecDeque::from([link])),
    });
    let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());

    let runtime = build_runtime(transport, adapter).await;
    let handle = runtime.handle();
    tokio::spawn(runtime.run());

    // Handshake by hand.
    let auth = server_end.recv().await.unwrap();
    assert!(matches!(auth, Message::Auth { .. }));
    server_end
        .send(&Message::AuthSuccess {
            user_id: "u1".to_string(),
            permissions: Permissions::admin(),
        })
        .await;
    wait_for_state(&handle, ConnectionState::Connected).await;

    let doc: DocumentId = "profile".into();
    handle.register_document(doc.clone()).await;
    handle
        .edit(
            doc.clone(),
            Edit::SetField {
                field: "name".into(),
                value: json!("local"),
            },
        )
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The server decided differently: broadcast the resolved value with
    // winning register metadata.
    let mut fields = std::collections::BTreeMap::new();
    fields.insert("name".to_string(), json!("authoritative"));
    let mut meta = std::collections::BTreeMap::new();
    meta.insert(
        "name".to_string(),
        synckit_protocol::FieldMeta {
            clock: 99,
            writer: ReplicaId::from("replica-9"),
        },
    );
    let mut clock = synckit_crdt::VectorClock::new();
    clock.observe(&ReplicaId::from("replica-9"), 99);
    server_end
        .send(&Message::Delta(DeltaMessage {
            id: "srv-1".to_string(),
            doc_id: doc.clone(),
            delta: DeltaBody::Fields(fields),
            vector_clock: clock,
            writer: ReplicaId::from("replica-9"),
            logical_clock: Some(99),
            meta: Some(meta),
        }))
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        handle.render_document(&doc).await.unwrap()["name"],
        json!("authoritative")
    );

    // The client acknowledged the broadcast.
    let mut saw_ack = false;
    for _ in 0..20 {
        match tokio::time::timeout(Duration::from_millis(100), server_end.recv()).await {
            Ok(Some(Message::Ack { message_id })) if message_id == "srv-1" => {
                saw_ack = true;
                break;
            }
            Ok(Some(_)) => continue,
            _ => break,
        }
    }
    assert!(saw_ack);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_fails_the_runtime() {
    let (link, mut server_end) = link_pair();
    let transport = Arc::new(ScriptedTransport {
        links: Mutex::new(VecDeque::from([link])),
    });
    let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());

    let runtime = build_runtime(transport, adapter).await;
    let handle = runtime.handle();
    let task = tokio::spawn(runtime.run());

    let _auth = server_end.recv().await.unwrap();
    server_end
        .send(&Message::AuthError {
            error: "bad token".to_string(),
            code: "AUTH_FAILED".to_string(),
        })
        .await;

    wait_for_state(&handle, ConnectionState::Failed).await;
    let result = task.await.unwrap();
    assert!(matches!(result, Err(SyncError::Auth(_))));
}
