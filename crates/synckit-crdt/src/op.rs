//! The operation union exchanged between replicas.
//!
//! Every mutation anywhere in the system is one of these variants wrapped in
//! an [`OperationEnvelope`] carrying the writer, its logical clock, and the
//! writer's post-operation vector clock. The `(writer, logical_clock)` pair
//! is the operation's identity and the idempotence key for at-least-once
//! delivery.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::VectorClock;
use crate::orset::AddTag;
use crate::richtext::FormatSpan;
use crate::text::CharId;
use synckit_core::{DocumentId, FieldPath, ReplicaId};

/// One mutation. Serialized with an internal tag so deltas read cleanly in
/// queue entries and wire payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Operation {
    /// Install a field register (LWW).
    Set { field: FieldPath, value: Value },
    /// Tombstone a field register (LWW).
    Delete { field: FieldPath },
    /// Insert one codepoint between its origins (Fugue).
    InsertChar {
        id: CharId,
        left: Option<CharId>,
        right: Option<CharId>,
        ch: char,
    },
    /// Tombstone one character (Fugue).
    DeleteChar { id: CharId },
    /// Apply a format span (Peritext).
    Format { span: FormatSpan },
    /// Apply a remove-marker span (Peritext).
    Unformat { span: FormatSpan },
    /// Grow the writer's increment half (PN-Counter).
    CounterInc { amount: u64 },
    /// Grow the writer's decrement half (PN-Counter).
    CounterDec { amount: u64 },
    /// Add an element under a fresh tag (OR-Set).
    SetAdd { element: Value, tag: AddTag },
    /// Tombstone the observed tags of an element (OR-Set).
    SetRemove {
        element: Value,
        tags: HashSet<AddTag>,
    },
}

/// An operation with its routing and causality context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEnvelope {
    pub document_id: DocumentId,
    pub writer: ReplicaId,
    /// The writer's logical clock after this operation.
    pub logical_clock: u64,
    pub timestamp: DateTime<Utc>,
    /// The writer's vector clock after this operation.
    pub clock: VectorClock,
    pub op: Operation,
}

impl OperationEnvelope {
    /// The operation's identity: the idempotence key for duplicate applies.
    pub fn op_key(&self) -> (ReplicaId, u64) {
        (self.writer.clone(), self.logical_clock)
    }
}
