//! Coordinator tests: auth guard, subscribe/sync, the DELTA pipeline, and
//! authoritative resolution.

mod common;

use std::collections::BTreeMap;

use serde_json::json;

use common::{start_server, TestPeer};
use synckit_core::config::ServerConfig;
use synckit_core::ReplicaId;
use synckit_crdt::{ReplicatedDoc, VectorClock};
use synckit_protocol::{DeltaBody, DeltaMessage, Message};

fn fast_config() -> ServerConfig {
    ServerConfig {
        batch_window_ms: 0,
        ..ServerConfig::default()
    }
}

fn field_delta(
    id: &str,
    doc: &str,
    writer: &str,
    clock: u64,
    field: &str,
    value: serde_json::Value,
) -> Message {
    let writer = ReplicaId::from(writer);
    let mut vector_clock = VectorClock::new();
    vector_clock.observe(&writer, clock);
    let mut fields = BTreeMap::new();
    fields.insert(field.to_string(), value);
    Message::Delta(DeltaMessage {
        id: id.to_string(),
        doc_id: doc.into(),
        delta: DeltaBody::Fields(fields),
        vector_clock,
        writer,
        logical_clock: Some(clock),
        meta: None,
    })
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn anonymous_messages_get_auth_required() {
    let server = start_server(fast_config());
    let mut peer = TestPeer::connect(&server).await;

    peer.send(&Message::Subscribe {
        doc_id: "d1".into(),
    })
    .await;
    let verdict = peer
        .recv_until(|m| matches!(m, Message::AuthError { .. }))
        .await
        .unwrap();
    match verdict {
        Message::AuthError { code, .. } => assert_eq!(code, "AUTH_REQUIRED"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn bad_token_is_rejected_good_token_succeeds() {
    let server = start_server(fast_config());
    let mut peer = TestPeer::connect(&server).await;

    let verdict = peer.authenticate("nope", "c1").await;
    assert!(matches!(verdict, Message::AuthError { .. }));

    let verdict = peer.authenticate("writer-token", "c1").await;
    match verdict {
        Message::AuthSuccess { user_id, .. } => assert_eq!(user_id, "writer"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn anonymous_allowed_when_auth_not_required() {
    let server = start_server(ServerConfig {
        auth_required: false,
        batch_window_ms: 0,
        ..ServerConfig::default()
    });
    let mut peer = TestPeer::connect(&server).await;

    peer.send(&Message::Subscribe {
        doc_id: "d1".into(),
    })
    .await;
    let response = peer
        .recv_until(|m| matches!(m, Message::SyncResponse { .. }))
        .await;
    assert!(response.is_some());
}

// =============================================================================
// Subscribe and sync
// =============================================================================

#[tokio::test]
async fn subscribe_returns_authoritative_state() {
    let server = start_server(fast_config());

    let mut writer = TestPeer::connect(&server).await;
    writer.authenticate("writer-token", "w1").await;
    writer
        .send(&field_delta("m1", "profile", "replica-w", 1, "name", json!("Ada")))
        .await;
    writer
        .recv_until(|m| matches!(m, Message::Ack { .. }))
        .await
        .unwrap();

    let mut reader = TestPeer::connect(&server).await;
    reader.authenticate("reader-token", "r1").await;
    reader
        .send(&Message::Subscribe {
            doc_id: "profile".into(),
        })
        .await;
    let response = reader
        .recv_until(|m| matches!(m, Message::SyncResponse { .. }))
        .await
        .unwrap();
    match response {
        Message::SyncResponse { state, .. } => {
            let doc: ReplicatedDoc = serde_json::from_value(state).unwrap();
            assert_eq!(doc.render()["name"], json!("Ada"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

// =============================================================================
// The DELTA pipeline
// =============================================================================

#[tokio::test]
async fn delta_is_acked_and_broadcast_to_all_subscribers_including_sender() {
    let server = start_server(fast_config());

    let mut a = TestPeer::connect(&server).await;
    a.authenticate("writer-token", "a").await;
    let mut b = TestPeer::connect(&server).await;
    b.authenticate("writer-token", "b").await;

    for peer in [&mut a, &mut b] {
        peer.send(&Message::Subscribe {
            doc_id: "profile".into(),
        })
        .await;
        peer.recv_until(|m| matches!(m, Message::SyncResponse { .. }))
            .await
            .unwrap();
    }

    a.send(&field_delta("m1", "profile", "replica-a", 1, "name", json!("Ada")))
        .await;

    // The sender gets its ACK with the original message id...
    let ack = a
        .recv_until(|m| matches!(m, Message::Ack { .. }))
        .await
        .unwrap();
    match ack {
        Message::Ack { message_id } => assert_eq!(message_id, "m1"),
        other => panic!("unexpected: {other:?}"),
    }

    // ...and both subscribers (sender included) see the broadcast.
    for peer in [&mut a, &mut b] {
        let delta = peer
            .recv_until(|m| matches!(m, Message::Delta(_)))
            .await
            .unwrap();
        match delta {
            Message::Delta(delta) => match delta.delta {
                DeltaBody::Fields(fields) => assert_eq!(fields["name"], json!("Ada")),
                other => panic!("unexpected body: {other:?}"),
            },
            other => panic!("unexpected: {other:?}"),
        }
    }
}

#[tokio::test]
async fn equal_clock_writers_resolve_to_greater_replica_everywhere() {
    // Scenario: A sets name="A" at clock 1 as clientA; B sets name="B" at
    // clock 1 as clientB. Everyone converges to "B".
    let server = start_server(fast_config());

    let mut a = TestPeer::connect(&server).await;
    a.authenticate("writer-token", "a").await;
    let mut b = TestPeer::connect(&server).await;
    b.authenticate("writer-token", "b").await;

    a.send(&field_delta("m1", "profile", "clientA", 1, "name", json!("A")))
        .await;
    a.recv_until(|m| matches!(m, Message::Ack { .. })).await.unwrap();

    b.send(&field_delta("m2", "profile", "clientB", 1, "name", json!("B")))
        .await;
    b.recv_until(|m| matches!(m, Message::Ack { .. })).await.unwrap();

    // A's second broadcast (B's resolved write) carries "B" — the
    // lexicographically greater replica id wins the tie.
    let mut last_seen = None;
    while let Some(Message::Delta(delta)) = a
        .recv_until(|m| matches!(m, Message::Delta(_)))
        .await
    {
        if let DeltaBody::Fields(fields) = &delta.delta {
            last_seen = fields.get("name").cloned();
        }
        if last_seen == Some(json!("B")) {
            break;
        }
    }
    assert_eq!(last_seen, Some(json!("B")));
}

#[tokio::test]
async fn losing_delete_broadcasts_the_winning_write() {
    // Scenario: status written at clock 2000, deleted at clock 1000 — the
    // delete loses and the broadcast carries the winning write.
    let server = start_server(fast_config());

    let mut writer = TestPeer::connect(&server).await;
    writer.authenticate("writer-token", "w").await;

    writer
        .send(&field_delta("m1", "profile", "replicaA", 2000, "status", json!("active")))
        .await;
    writer
        .recv_until(|m| matches!(m, Message::Ack { .. }))
        .await
        .unwrap();

    writer
        .send(&field_delta(
            "m2",
            "profile",
            "replicaB",
            1000,
            "status",
            json!({"__deleted": true}),
        ))
        .await;

    // Drain broadcasts until the one for the losing delete: it must carry
    // the resolved (winning) value, not the tombstone.
    let mut resolved = None;
    for _ in 0..4 {
        match writer.recv_until(|m| matches!(m, Message::Delta(_))).await {
            Some(Message::Delta(delta)) => {
                if let DeltaBody::Fields(fields) = &delta.delta {
                    resolved = fields.get("status").cloned();
                    if let Some(meta) = &delta.meta {
                        if meta.get("status").map(|m| m.clock) == Some(2000) {
                            break;
                        }
                    }
                }
            }
            _ => break,
        }
    }
    assert_eq!(resolved, Some(json!("active")));
}

#[tokio::test]
async fn winning_delete_broadcasts_a_tombstone() {
    let server = start_server(fast_config());

    let mut writer = TestPeer::connect(&server).await;
    writer.authenticate("writer-token", "w").await;

    writer
        .send(&field_delta("m1", "profile", "replicaA", 1000, "status", json!("active")))
        .await;
    writer
        .recv_until(|m| matches!(m, Message::Ack { .. }))
        .await
        .unwrap();
    writer
        .send(&field_delta(
            "m2",
            "profile",
            "replicaB",
            2000,
            "status",
            json!({"__deleted": true}),
        ))
        .await;

    let mut saw_tombstone = false;
    for _ in 0..4 {
        match writer.recv_until(|m| matches!(m, Message::Delta(_))).await {
            Some(Message::Delta(delta)) => {
                if let DeltaBody::Fields(fields) = &delta.delta {
                    if fields.get("status") == Some(&json!({"__deleted": true})) {
                        saw_tombstone = true;
                        break;
                    }
                }
            }
            _ => break,
        }
    }
    assert!(saw_tombstone);
}

#[tokio::test]
async fn read_only_token_cannot_write() {
    let server = start_server(fast_config());

    let mut reader = TestPeer::connect(&server).await;
    reader.authenticate("reader-token", "r").await;

    reader
        .send(&field_delta("m1", "profile", "replica-r", 1, "name", json!("hack")))
        .await;
    let error = reader
        .recv_until(|m| matches!(m, Message::Error(_)))
        .await
        .unwrap();
    match error {
        Message::Error(payload) => assert_eq!(payload.code, "PERMISSION_DENIED"),
        other => panic!("unexpected: {other:?}"),
    }

    // No state was mutated: a fresh subscriber sees an empty document.
    let mut observer = TestPeer::connect(&server).await;
    observer.authenticate("writer-token", "o").await;
    observer
        .send(&Message::Subscribe {
            doc_id: "profile".into(),
        })
        .await;
    match observer
        .recv_until(|m| matches!(m, Message::SyncResponse { .. }))
        .await
        .unwrap()
    {
        Message::SyncResponse { state, .. } => {
            let doc: ReplicatedDoc = serde_json::from_value(state).unwrap();
            assert_eq!(doc.render().as_object().unwrap().len(), 0);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn kind_mismatched_operation_is_malformed() {
    let server = start_server(fast_config());
    let mut writer = TestPeer::connect(&server).await;
    writer.authenticate("writer-token", "w").await;

    // A field write against a counter document.
    writer
        .send(&field_delta("m1", "votes:counter:1", "replica-w", 1, "x", json!(1)))
        .await;
    let error = writer
        .recv_until(|m| matches!(m, Message::Error(_)))
        .await
        .unwrap();
    match error {
        Message::Error(payload) => assert_eq!(payload.code, "MALFORMED_OPERATION"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_frame_closes_the_connection() {
    let server = start_server(fast_config());
    let mut peer = TestPeer::connect(&server).await;
    peer.authenticate("writer-token", "w").await;

    // Unknown type byte.
    peer.send_raw(vec![0x7f, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).await;
    let error = peer
        .recv_until(|m| matches!(m, Message::Error(_)))
        .await
        .unwrap();
    match error {
        Message::Error(payload) => assert_eq!(payload.code, "UNKNOWN_MESSAGE_TYPE"),
        other => panic!("unexpected: {other:?}"),
    }
    // The server closed: the link drains to None.
    assert!(peer.recv().await.is_none());
}
