//! One replicated document behind a uniform apply / merge / serialize
//! surface.
//!
//! The server and the client runtime both hold documents through this type;
//! the CRDT kind is chosen from the document id's namespace hint. Apply is
//! idempotent by operation identity, and for LWW operations it reports the
//! resolved per-field registers so the server can broadcast authoritative
//! values rather than submitted ones.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::clock::VectorClock;
use crate::counter::PnCounter;
use crate::lww::{LwwDocument, LwwRegister};
use crate::op::{Operation, OperationEnvelope};
use crate::orset::OrSet;
use crate::richtext::RichTextLayer;
use crate::text::FugueText;
use synckit_core::ids::DocKind;
use synckit_core::{DocumentId, ReplicaId, SyncError, SyncResult};

/// A Fugue sequence with its Peritext format layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDocument {
    pub text: FugueText,
    pub formats: RichTextLayer,
}

/// The state variant behind a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DocState {
    Lww(LwwDocument),
    Text(TextDocument),
    Counter(PnCounter),
    Set(OrSet),
}

/// Result of applying one operation.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    /// Whether the operation changed state. Duplicates and losing LWW
    /// writes report `false`; both are normal, not errors.
    pub changed: bool,
    /// For LWW operations: the authoritative register now held at each
    /// touched field. A submitted write that lost shows the winner here.
    pub resolved_fields: Vec<(synckit_core::FieldPath, LwwRegister)>,
}

/// One document's full replicated state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatedDoc {
    pub id: DocumentId,
    pub state: DocState,
    /// The document's vector clock: pointwise max over every applied
    /// envelope.
    pub clock: VectorClock,
    /// Identities of every applied operation; the idempotence guard for
    /// at-least-once delivery.
    seen: HashSet<(ReplicaId, u64)>,
}

impl ReplicatedDoc {
    /// Create an empty document of the kind hinted by the id.
    pub fn new(id: DocumentId, replica: ReplicaId) -> Self {
        let state = match id.kind_hint() {
            DocKind::Lww => DocState::Lww(LwwDocument::new()),
            DocKind::Text => DocState::Text(TextDocument {
                text: FugueText::new(replica),
                formats: RichTextLayer::new(),
            }),
            DocKind::Counter => DocState::Counter(PnCounter::new()),
            DocKind::Set => DocState::Set(OrSet::new()),
        };
        Self {
            id,
            state,
            clock: VectorClock::new(),
            seen: HashSet::new(),
        }
    }

    /// Apply one envelope. Errors only on malformed operations (kind
    /// mismatch, empty field path); a losing or duplicate operation is a
    /// successful no-op.
    pub fn apply(&mut self, env: &OperationEnvelope) -> SyncResult<ApplyOutcome> {
        if self.seen.contains(&env.op_key()) {
            return Ok(ApplyOutcome::default());
        }

        let mut outcome = ApplyOutcome::default();
        match (&mut self.state, &env.op) {
            (DocState::Lww(doc), Operation::Set { field, value }) => {
                if field.as_str().is_empty() {
                    return Err(SyncError::MalformedOperation(
                        "empty field path in set".to_string(),
                    ));
                }
                outcome.changed = doc.set(
                    field.clone(),
                    value.clone(),
                    env.writer.clone(),
                    env.logical_clock,
                );
                let resolved = doc
                    .register(field)
                    .cloned()
                    .unwrap_or_else(|| {
                        LwwRegister::new(value.clone(), env.logical_clock, env.writer.clone())
                    });
                outcome.resolved_fields.push((field.clone(), resolved));
            }
            (DocState::Lww(doc), Operation::Delete { field }) => {
                if field.as_str().is_empty() {
                    return Err(SyncError::MalformedOperation(
                        "empty field path in delete".to_string(),
                    ));
                }
                outcome.changed =
                    doc.delete(field.clone(), env.writer.clone(), env.logical_clock);
                if let Some(resolved) = doc.register(field).cloned() {
                    outcome.resolved_fields.push((field.clone(), resolved));
                }
            }
            (DocState::Text(doc), op @ (Operation::InsertChar { .. } | Operation::DeleteChar { .. })) => {
                outcome.changed = doc.text.apply_remote(op);
            }
            (
                DocState::Text(doc),
                Operation::Format { span } | Operation::Unformat { span },
            ) => {
                outcome.changed = doc.formats.apply_span(span.clone());
            }
            (DocState::Counter(counter), Operation::CounterInc { amount }) => {
                counter.increment(&env.writer, *amount);
                outcome.changed = true;
            }
            (DocState::Counter(counter), Operation::CounterDec { amount }) => {
                counter.decrement(&env.writer, *amount);
                outcome.changed = true;
            }
            (DocState::Set(set), Operation::SetAdd { element, tag }) => {
                set.add_with_tag(element.clone(), tag.clone());
                outcome.changed = true;
            }
            (DocState::Set(set), Operation::SetRemove { tags, .. }) => {
                set.remove_tags(tags);
                outcome.changed = true;
            }
            (state, op) => {
                return Err(SyncError::MalformedOperation(format!(
                    "operation {} does not apply to a {} document",
                    op_name(op),
                    kind_name(state),
                )));
            }
        }

        self.seen.insert(env.op_key());
        self.clock.merge(&env.clock);
        self.clock.observe(&env.writer, env.logical_clock);
        Ok(outcome)
    }

    /// Merge full remote state into this document (sync-response path).
    /// Kind mismatches are malformed.
    pub fn merge(&mut self, other: &ReplicatedDoc) -> SyncResult<()> {
        match (&mut self.state, &other.state) {
            (DocState::Lww(a), DocState::Lww(b)) => a.merge(b),
            (DocState::Text(a), DocState::Text(b)) => {
                for node in b.text.nodes() {
                    let op = Operation::InsertChar {
                        id: node.id.clone(),
                        left: node.left_origin.clone(),
                        right: node.right_origin.clone(),
                        ch: node.ch,
                    };
                    a.text.apply_remote(&op);
                    if node.deleted {
                        a.text.apply_remote(&Operation::DeleteChar {
                            id: node.id.clone(),
                        });
                    }
                }
                a.formats.merge(&b.formats);
            }
            (DocState::Counter(a), DocState::Counter(b)) => a.merge(b),
            (DocState::Set(a), DocState::Set(b)) => a.merge(b),
            _ => {
                return Err(SyncError::MalformedOperation(format!(
                    "cannot merge {} state into {} document",
                    kind_name(&other.state),
                    kind_name(&self.state),
                )));
            }
        }
        self.clock.merge(&other.clock);
        for key in &other.seen {
            self.seen.insert(key.clone());
        }
        Ok(())
    }

    /// The user-facing rendering of this document's state.
    pub fn render(&self) -> Value {
        match &self.state {
            DocState::Lww(doc) => Value::Object(doc.render()),
            DocState::Text(doc) => json!({
                "text": doc.text.to_string(),
            }),
            DocState::Counter(counter) => json!(counter.value()),
            DocState::Set(set) => Value::Array(set.elements().into_iter().cloned().collect()),
        }
    }

    /// Serialized byte length of the full state; feeds the snapshot
    /// scheduler's size trigger.
    pub fn state_size(&self) -> usize {
        serde_json::to_vec(&self.state).map(|b| b.len()).unwrap_or(0)
    }

    /// Whether an operation with this identity has already been applied.
    pub fn has_seen(&self, key: &(ReplicaId, u64)) -> bool {
        self.seen.contains(key)
    }
}

fn op_name(op: &Operation) -> &'static str {
    match op {
        Operation::Set { .. } => "set",
        Operation::Delete { .. } => "delete",
        Operation::InsertChar { .. } => "insert_char",
        Operation::DeleteChar { .. } => "delete_char",
        Operation::Format { .. } => "format",
        Operation::Unformat { .. } => "unformat",
        Operation::CounterInc { .. } => "counter_inc",
        Operation::CounterDec { .. } => "counter_dec",
        Operation::SetAdd { .. } => "set_add",
        Operation::SetRemove { .. } => "set_remove",
    }
}

fn kind_name(state: &DocState) -> &'static str {
    match state {
        DocState::Lww(_) => "lww",
        DocState::Text(_) => "text",
        DocState::Counter(_) => "counter",
        DocState::Set(_) => "set",
    }
}
