//! Shared builders for SyncKit test suites.
//!
//! Keeps envelope construction out of individual tests: every suite that
//! feeds operations into a document or a coordinator goes through these.

use chrono::Utc;
use serde_json::Value;

use synckit_core::{DocumentId, FieldPath, ReplicaId};
use synckit_crdt::{Operation, OperationEnvelope, VectorClock};

/// Wrap an operation in an envelope with a single-entry vector clock at
/// `(writer, logical_clock)`.
pub fn envelope(
    doc_id: &str,
    writer: &str,
    logical_clock: u64,
    op: Operation,
) -> OperationEnvelope {
    let writer = ReplicaId::from(writer);
    let mut clock = VectorClock::new();
    clock.observe(&writer, logical_clock);
    OperationEnvelope {
        document_id: DocumentId::from(doc_id),
        writer,
        logical_clock,
        timestamp: Utc::now(),
        clock,
        op,
    }
}

/// Envelope for an LWW field write.
pub fn set_field(
    doc_id: &str,
    writer: &str,
    logical_clock: u64,
    field: &str,
    value: Value,
) -> OperationEnvelope {
    envelope(
        doc_id,
        writer,
        logical_clock,
        Operation::Set {
            field: FieldPath::from(field),
            value,
        },
    )
}

/// Envelope for an LWW field delete.
pub fn delete_field(
    doc_id: &str,
    writer: &str,
    logical_clock: u64,
    field: &str,
) -> OperationEnvelope {
    envelope(
        doc_id,
        writer,
        logical_clock,
        Operation::Delete {
            field: FieldPath::from(field),
        },
    )
}

/// Wrap a batch of text operations in envelopes with consecutive logical
/// clocks starting at `first_clock`.
pub fn text_envelopes(
    doc_id: &str,
    writer: &str,
    first_clock: u64,
    ops: Vec<Operation>,
) -> Vec<OperationEnvelope> {
    ops.into_iter()
        .enumerate()
        .map(|(i, op)| envelope(doc_id, writer, first_clock + i as u64, op))
        .collect()
}
