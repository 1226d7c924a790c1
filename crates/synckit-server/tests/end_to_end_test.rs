//! End-to-end scenarios: full client runtimes against a real server,
//! offline replay, text convergence, and multi-instance pub/sub.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use common::{duplex_pair, start_server, test_verifier, ServerTransport, TestPeer};
use synckit_client::{ClientTransport, ConnectionState, Edit, SyncHandle, SyncRuntime};
use synckit_core::config::{ClientConfig, ServerConfig};
use synckit_core::{ClientId, DocumentId, ReplicaId, SyncResult};
use synckit_protocol::FramedLink;
use synckit_server::{InProcessPubSub, NoLimit, PubSub, SyncCoordinator, SyncServer};
use synckit_storage::{MemoryAdapter, StorageAdapter};

fn fast_server() -> Arc<SyncServer> {
    start_server(ServerConfig {
        batch_window_ms: 0,
        ..ServerConfig::default()
    })
}

async fn start_client(
    server: &Arc<SyncServer>,
    replica: &str,
) -> (SyncHandle, tokio::task::JoinHandle<SyncResult<()>>) {
    let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
    let runtime = SyncRuntime::new(
        ReplicaId::from(replica),
        ClientId::from(replica),
        "writer-token".to_string(),
        ClientConfig::default(),
        adapter,
        Arc::new(ServerTransport::new(server.clone())),
        None,
    )
    .await
    .unwrap();
    let handle = runtime.handle();
    let task = tokio::spawn(runtime.run());
    (handle, task)
}

async fn wait_connected(handle: &SyncHandle) {
    let mut watcher = handle.watch_state();
    for _ in 0..200 {
        if *watcher.borrow() == ConnectionState::Connected {
            return;
        }
        let _ = tokio::time::timeout(Duration::from_millis(100), watcher.changed()).await;
    }
    panic!("client never connected");
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition never held");
}

// =============================================================================
// Authoritative convergence through the server
// =============================================================================

#[tokio::test(start_paused = true)]
async fn two_clients_converge_on_the_servers_resolution() {
    let server = fast_server();
    let doc: DocumentId = "profile".into();

    let (a, _task_a) = start_client(&server, "clientA").await;
    let (b, _task_b) = start_client(&server, "clientB").await;
    wait_connected(&a).await;
    wait_connected(&b).await;

    a.register_document(doc.clone()).await;
    b.register_document(doc.clone()).await;

    a.edit(
        doc.clone(),
        Edit::SetField {
            field: "name".into(),
            value: json!("from-a"),
        },
    )
    .await;
    b.edit(
        doc.clone(),
        Edit::SetField {
            field: "name".into(),
            value: json!("from-b"),
        },
    )
    .await;

    // Both clients settle on one identical authoritative value.
    wait_until(|| async {
        let va = a.render_document(&doc).await.and_then(|v| v.get("name").cloned());
        let vb = b.render_document(&doc).await.and_then(|v| v.get("name").cloned());
        va.is_some() && va == vb
    })
    .await;

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn offline_burst_replays_in_order_and_reaches_other_subscribers() {
    // Scenario: a client queues a burst of operations while disconnected,
    // reconnects, and every op lands exactly once, in sender order, on the
    // server and on every other subscriber.
    let server = fast_server();
    let doc: DocumentId = "journal".into();

    // Observer client, connected the whole time.
    let (observer, _observer_task) = start_client(&server, "observer").await;
    wait_connected(&observer).await;
    observer.register_document(doc.clone()).await;

    // The writer starts with a dead transport: everything queues.
    let flaky = Arc::new(FlakyTransport {
        server: server.clone(),
        allow: Mutex::new(false),
    });
    let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());
    let runtime = SyncRuntime::new(
        ReplicaId::from("burst-writer"),
        ClientId::from("burst-writer"),
        "writer-token".to_string(),
        ClientConfig::default(),
        adapter,
        flaky.clone(),
        None,
    )
    .await
    .unwrap();
    let writer = runtime.handle();
    let _writer_task = tokio::spawn(runtime.run());

    writer.register_document(doc.clone()).await;
    const BURST: usize = 500;
    for i in 0..BURST {
        writer
            .edit(
                doc.clone(),
                Edit::SetField {
                    field: format!("entry-{i:03}").as_str().into(),
                    value: json!(i),
                },
            )
            .await;
    }
    wait_until(|| async { writer.queued_len().await == BURST }).await;

    // Reconnect.
    *flaky.allow.lock().await = true;
    wait_connected(&writer).await;

    // Every entry reaches the observer; the queue fully drains.
    wait_until(|| async {
        observer
            .render_document(&doc)
            .await
            .and_then(|v| v.as_object().map(|o| o.len()))
            == Some(BURST)
    })
    .await;
    wait_until(|| async { writer.queued_len().await == 0 }).await;

    // Exactly once: entry values match their index.
    let rendered = observer.render_document(&doc).await.unwrap();
    for i in 0..BURST {
        assert_eq!(rendered[&format!("entry-{i:03}")], json!(i));
    }

    writer.shutdown().await;
    observer.shutdown().await;
}

/// Transport whose connects fail until allowed.
struct FlakyTransport {
    server: Arc<SyncServer>,
    allow: Mutex<bool>,
}

#[async_trait]
impl ClientTransport for FlakyTransport {
    async fn connect(&self) -> SyncResult<Box<dyn FramedLink>> {
        if !*self.allow.lock().await {
            return Err(synckit_core::SyncError::ConnectionClosed);
        }
        let (client_side, server_side) = duplex_pair();
        self.server.accept(Box::new(server_side)).await;
        Ok(Box::new(client_side))
    }
}

// =============================================================================
// Text documents through the server
// =============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_text_inserts_converge_identically_everywhere() {
    // Scenario: initial text "HELLO"; two clients concurrently insert "X"
    // and "Y" between H and E; every replica converges to the same choice.
    let server = fast_server();
    let doc: DocumentId = "pad:text:1".into();

    let (a, _task_a) = start_client(&server, "siteA").await;
    let (b, _task_b) = start_client(&server, "siteB").await;
    wait_connected(&a).await;
    wait_connected(&b).await;
    a.register_document(doc.clone()).await;
    b.register_document(doc.clone()).await;

    a.edit(
        doc.clone(),
        Edit::InsertText {
            pos: 0,
            text: "HELLO".to_string(),
        },
    )
    .await;

    // Wait until B has the base text.
    wait_until(|| async {
        b.render_document(&doc).await.map(|v| v["text"] == json!("HELLO")) == Some(true)
    })
    .await;

    a.edit(
        doc.clone(),
        Edit::InsertText {
            pos: 1,
            text: "X".to_string(),
        },
    )
    .await;
    b.edit(
        doc.clone(),
        Edit::InsertText {
            pos: 1,
            text: "Y".to_string(),
        },
    )
    .await;

    wait_until(|| async {
        let va = a.render_document(&doc).await.map(|v| v["text"].clone());
        let vb = b.render_document(&doc).await.map(|v| v["text"].clone());
        va == vb
            && matches!(
                va.as_ref().and_then(|v| v.as_str()),
                Some("HXYELLO") | Some("HYXELLO")
            )
    })
    .await;

    a.shutdown().await;
    b.shutdown().await;
}

// =============================================================================
// Pub/sub across instances
// =============================================================================

#[tokio::test(start_paused = true)]
async fn two_instances_share_one_pubsub_and_serve_identically() {
    let pubsub: Arc<dyn PubSub> = Arc::new(InProcessPubSub::new());
    let make_instance = |pubsub: Arc<dyn PubSub>| {
        let coordinator = SyncCoordinator::new(
            ServerConfig {
                batch_window_ms: 0,
                ..ServerConfig::default()
            },
            Arc::new(MemoryAdapter::new()),
            pubsub,
            Arc::new(test_verifier()),
            Arc::new(NoLimit),
        );
        SyncServer::start(coordinator)
    };
    let instance_one = make_instance(pubsub.clone());
    let instance_two = make_instance(pubsub.clone());

    // A subscriber on instance two...
    let mut remote_peer = TestPeer::connect(&instance_two).await;
    remote_peer.authenticate("writer-token", "remote").await;
    remote_peer
        .send(&synckit_protocol::Message::Subscribe {
            doc_id: "shared".into(),
        })
        .await;
    remote_peer
        .recv_until(|m| matches!(m, synckit_protocol::Message::SyncResponse { .. }))
        .await
        .unwrap();

    // ...sees a write accepted by instance one.
    let (writer, _writer_task) = start_client(&instance_one, "writer-1").await;
    wait_connected(&writer).await;
    writer.register_document("shared".into()).await;
    writer
        .edit(
            "shared".into(),
            Edit::SetField {
                field: "headline".into(),
                value: json!("hello across instances"),
            },
        )
        .await;

    let delta = remote_peer
        .recv_until(|m| matches!(m, synckit_protocol::Message::Delta(_)))
        .await
        .expect("no cross-instance delta");
    match delta {
        synckit_protocol::Message::Delta(delta) => {
            match delta.delta {
                synckit_protocol::DeltaBody::Fields(fields) => {
                    assert_eq!(fields["headline"], json!("hello across instances"));
                }
                other => panic!("unexpected body: {other:?}"),
            }
        }
        other => panic!("unexpected: {other:?}"),
    }

    writer.shutdown().await;
}
